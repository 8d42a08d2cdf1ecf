//! Blocking coprocessor installation.
//!
//! Attaching a coprocessor is a schema change: the table is described,
//! disabled (unless the cluster applies schema changes online), modified,
//! re-enabled, and then polled until every region has picked up the new
//! schema. Polling is bounded by a timeout and a cancellation flag, and time
//! is read through [`Clock`] so tests can drive it without sleeping.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error};

use crate::backend::BackendConnection;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::table::{CoprocessorSpec, TableName};

pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock whose `sleep` advances time instantly.
#[derive(Default)]
pub struct ManualClock {
    nanos: AtomicU64,
    sleeps: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn sleeps(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(duration);
    }
}

/// Shared flag a caller flips to abandon an in-progress install.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shortest back-off between roll-out polls. A zero interval would spin, and
/// with a clock that only moves on sleep it would never reach the timeout.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Polling policy for one install.
#[derive(Clone)]
pub struct InstallControl {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub clock: Arc<dyn Clock>,
    pub cancellation: CancellationFlag,
}

impl InstallControl {
    /// `poll_interval` is raised to [`MIN_POLL_INTERVAL`] when shorter.
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            timeout,
            clock: Arc::new(SystemClock::new()),
            cancellation: CancellationFlag::new(),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.coprocessor_poll_interval, config.coprocessor_timeout)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CoprocessorOutcome {
    AlreadyInstalled,
    Installed,
    /// The schema change was applied but regions were still rolling out
    /// when the timeout expired.
    TimedOut { regions_remaining: usize },
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InstallStep {
    Describe,
    Disable,
    Attach,
    Enable,
    Poll,
    Done,
}

impl InstallStep {
    fn as_str(self) -> &'static str {
        match self {
            InstallStep::Describe => "describe",
            InstallStep::Disable => "disable",
            InstallStep::Attach => "attach",
            InstallStep::Enable => "enable",
            InstallStep::Poll => "poll",
            InstallStep::Done => "done",
        }
    }
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs the install state machine. The caller holds the admin lock.
pub(crate) fn install(
    connection: &dyn BackendConnection,
    table: &TableName,
    spec: &CoprocessorSpec,
    schema_update_enabled: bool,
    control: &InstallControl,
) -> Result<CoprocessorOutcome> {
    if !connection.supports_coprocessors() {
        return Err(Error::Unsupported("coprocessor installation"));
    }
    let fail = |step: InstallStep, err: Error| {
        error!(
            table = %table,
            coprocessor = %spec.class_name,
            step = %step,
            error = %err,
            "coprocessor install failed"
        );
        Error::CoprocessorInstall {
            table: table.to_string(),
            coprocessor: spec.class_name.clone(),
            step: step.as_str(),
            reason: err.to_string(),
        }
    };

    let mut step = InstallStep::Describe;
    let mut descriptor = None;
    let mut poll_started = Duration::ZERO;
    loop {
        debug!(table = %table, coprocessor = %spec.class_name, step = %step, "coprocessor install step");
        step = match step {
            InstallStep::Describe => {
                let desc = connection
                    .describe_table(table)
                    .map_err(|err| fail(step, err))?;
                if desc.has_coprocessor(&spec.class_name) {
                    debug!(table = %table, coprocessor = %spec.class_name, "coprocessor already installed");
                    return Ok(CoprocessorOutcome::AlreadyInstalled);
                }
                if control.cancellation.is_cancelled() {
                    return Ok(CoprocessorOutcome::Cancelled);
                }
                descriptor = Some(desc);
                InstallStep::Disable
            }
            InstallStep::Disable => {
                if !schema_update_enabled
                    && connection
                        .is_table_enabled(table)
                        .map_err(|err| fail(step, err))?
                {
                    connection
                        .disable_table(table)
                        .map_err(|err| fail(step, err))?;
                }
                InstallStep::Attach
            }
            InstallStep::Attach => {
                let mut desc = descriptor
                    .take()
                    .ok_or_else(|| fail(step, Error::backend("attach", table.as_str(), "missing descriptor")))?;
                desc.add_coprocessor(spec.clone());
                connection.modify_table(desc).map_err(|err| fail(step, err))?;
                InstallStep::Enable
            }
            InstallStep::Enable => {
                if !schema_update_enabled
                    && !connection
                        .is_table_enabled(table)
                        .map_err(|err| fail(step, err))?
                {
                    connection
                        .enable_table(table)
                        .map_err(|err| fail(step, err))?;
                }
                poll_started = control.clock.now();
                InstallStep::Poll
            }
            InstallStep::Poll => {
                let status = connection
                    .alter_status(table)
                    .map_err(|err| fail(step, err))?;
                debug!(
                    table = %table,
                    regions_remaining = status.regions_remaining,
                    regions_total = status.regions_total,
                    "coprocessor roll-out progress"
                );
                if status.is_complete() {
                    InstallStep::Done
                } else if control.cancellation.is_cancelled() {
                    return Ok(CoprocessorOutcome::Cancelled);
                } else {
                    let elapsed = control.clock.now().saturating_sub(poll_started);
                    if elapsed >= control.timeout {
                        return Ok(CoprocessorOutcome::TimedOut {
                            regions_remaining: status.regions_remaining,
                        });
                    }
                    let back_off = control.poll_interval.max(MIN_POLL_INTERVAL);
                    control.clock.sleep(back_off.min(control.timeout - elapsed));
                    InstallStep::Poll
                }
            }
            InstallStep::Done => return Ok(CoprocessorOutcome::Installed),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        clock.sleep(Duration::from_secs(10));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(10_005));
        assert_eq!(clock.sleeps(), 1);
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let flag = CancellationFlag::new();
        let other = flag.clone();
        assert!(!flag.is_cancelled());
        other.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn install_control_follows_config() {
        let config = StoreConfig::default()
            .with_coprocessor_timing(Duration::from_millis(50), Duration::from_secs(1));
        let control = InstallControl::from_config(&config);
        assert_eq!(control.poll_interval, Duration::from_millis(50));
        assert_eq!(control.timeout, Duration::from_secs(1));
    }

    #[test]
    fn zero_poll_interval_is_raised_to_the_minimum() {
        let control = InstallControl::new(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(control.poll_interval, MIN_POLL_INTERVAL);
    }
}
