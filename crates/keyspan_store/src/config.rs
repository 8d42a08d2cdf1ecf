use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Flavour of the HBase-compatible cluster behind a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendVariant {
    #[default]
    HBase,
    /// Bigtable speaks the HBase client API but cannot host coprocessors.
    Bigtable,
}

impl BackendVariant {
    pub fn supports_coprocessors(self) -> bool {
        matches!(self, BackendVariant::HBase)
    }
}

impl fmt::Display for BackendVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendVariant::HBase => f.write_str("hbase"),
            BackendVariant::Bigtable => f.write_str("bigtable"),
        }
    }
}

impl FromStr for BackendVariant {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hbase" => Ok(BackendVariant::HBase),
            "bigtable" => Ok(BackendVariant::Bigtable),
            other => Err(anyhow!("unknown backend variant: {other}")),
        }
    }
}

/// Connection, scan and coprocessor settings for one store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `memory://<name>` selects the in-process backend.
    pub address: String,
    pub namespace: Option<String>,
    pub variant: BackendVariant,
    /// Rows per scanner fetch.
    pub scan_cache_size: usize,
    pub enable_block_cache: bool,
    pub enable_server_side_filtering: bool,
    /// Coprocessor that evaluates pushed-down filters.
    pub coprocessor_class: Option<String>,
    pub coprocessor_jar: Option<String>,
    #[serde(with = "duration_text")]
    pub coprocessor_poll_interval: Duration,
    #[serde(with = "duration_text")]
    pub coprocessor_timeout: Duration,
    /// Mutations buffered by a writer before an implicit flush.
    pub writer_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "memory://default".to_string(),
            namespace: None,
            variant: BackendVariant::HBase,
            scan_cache_size: 1000,
            enable_block_cache: true,
            enable_server_side_filtering: true,
            coprocessor_class: None,
            coprocessor_jar: None,
            coprocessor_poll_interval: Duration::from_secs(10),
            coprocessor_timeout: Duration::from_secs(300),
            writer_buffer_size: 1000,
        }
    }
}

impl StoreConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }

    pub fn with_variant(mut self, variant: BackendVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_scan_cache_size(mut self, rows: usize) -> Self {
        self.scan_cache_size = rows.max(1);
        self
    }

    pub fn with_server_side_filtering(mut self, enabled: bool) -> Self {
        self.enable_server_side_filtering = enabled;
        self
    }

    pub fn with_coprocessor(mut self, class_name: impl Into<String>, jar: Option<String>) -> Self {
        self.coprocessor_class = Some(class_name.into());
        self.coprocessor_jar = jar;
        self
    }

    pub fn with_coprocessor_timing(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.coprocessor_poll_interval = poll_interval;
        self.coprocessor_timeout = timeout;
        self
    }

    pub fn with_writer_buffer_size(mut self, mutations: usize) -> Self {
        self.writer_buffer_size = mutations.max(1);
        self
    }

    /// Reads `KEYSPAN_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let address = std::env::var("KEYSPAN_ADDRESS").unwrap_or(defaults.address);
        let namespace = std::env::var("KEYSPAN_NAMESPACE")
            .ok()
            .filter(|ns| !ns.trim().is_empty());
        let variant = match std::env::var("KEYSPAN_BACKEND").ok() {
            Some(raw) => raw
                .parse::<BackendVariant>()
                .with_context(|| format!("invalid KEYSPAN_BACKEND value: {raw}"))?,
            None => defaults.variant,
        };
        let scan_cache_size = parse_usize(
            std::env::var("KEYSPAN_SCAN_CACHE_SIZE").ok(),
            defaults.scan_cache_size,
        )?
        .max(1);
        let enable_block_cache = parse_bool(
            std::env::var("KEYSPAN_ENABLE_BLOCK_CACHE").ok(),
            defaults.enable_block_cache,
        )?;
        let enable_server_side_filtering = parse_bool(
            std::env::var("KEYSPAN_SERVER_SIDE_FILTERING").ok(),
            defaults.enable_server_side_filtering,
        )?;
        let coprocessor_class = std::env::var("KEYSPAN_COPROCESSOR_CLASS").ok();
        let coprocessor_jar = std::env::var("KEYSPAN_COPROCESSOR_JAR").ok();
        let coprocessor_poll_interval = parse_duration(
            std::env::var("KEYSPAN_COPROCESSOR_POLL_INTERVAL").ok(),
            defaults.coprocessor_poll_interval,
        )?;
        anyhow::ensure!(
            !coprocessor_poll_interval.is_zero(),
            "KEYSPAN_COPROCESSOR_POLL_INTERVAL must be greater than zero"
        );
        let coprocessor_timeout = parse_duration(
            std::env::var("KEYSPAN_COPROCESSOR_TIMEOUT").ok(),
            defaults.coprocessor_timeout,
        )?;
        let writer_buffer_size = parse_usize(
            std::env::var("KEYSPAN_WRITER_BUFFER_SIZE").ok(),
            defaults.writer_buffer_size,
        )?
        .max(1);

        Ok(Self {
            address,
            namespace,
            variant,
            scan_cache_size,
            enable_block_cache,
            enable_server_side_filtering,
            coprocessor_class,
            coprocessor_jar,
            coprocessor_poll_interval,
            coprocessor_timeout,
            writer_buffer_size,
        })
    }
}

fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid usize value: {raw}")),
        None => Ok(default_value),
    }
}

fn parse_bool(value: Option<String>, default_value: bool) -> Result<bool> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<bool>()
            .with_context(|| format!("invalid bool value: {raw}")),
        None => Ok(default_value),
    }
}

/// Accepts humantime strings such as `250ms` or `5m`.
fn parse_duration(value: Option<String>, default_value: Duration) -> Result<Duration> {
    match value {
        Some(raw) => humantime::parse_duration(raw.trim())
            .with_context(|| format!("invalid duration value: {raw}")),
        None => Ok(default_value),
    }
}

/// Durations serialize as humantime strings.
mod duration_text {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "KEYSPAN_ADDRESS",
        "KEYSPAN_NAMESPACE",
        "KEYSPAN_BACKEND",
        "KEYSPAN_SCAN_CACHE_SIZE",
        "KEYSPAN_ENABLE_BLOCK_CACHE",
        "KEYSPAN_SERVER_SIDE_FILTERING",
        "KEYSPAN_COPROCESSOR_CLASS",
        "KEYSPAN_COPROCESSOR_JAR",
        "KEYSPAN_COPROCESSOR_POLL_INTERVAL",
        "KEYSPAN_COPROCESSOR_TIMEOUT",
        "KEYSPAN_WRITER_BUFFER_SIZE",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn from_env_uses_defaults_when_unset() {
        clear_env();
        let config = StoreConfig::from_env().expect("default config");
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    #[serial]
    fn from_env_reads_overrides() {
        clear_env();
        std::env::set_var("KEYSPAN_ADDRESS", "memory://env");
        std::env::set_var("KEYSPAN_NAMESPACE", "geo");
        std::env::set_var("KEYSPAN_BACKEND", "Bigtable");
        std::env::set_var("KEYSPAN_SCAN_CACHE_SIZE", "0");
        std::env::set_var("KEYSPAN_SERVER_SIDE_FILTERING", "false");
        std::env::set_var("KEYSPAN_COPROCESSOR_CLASS", "AggregationEndpoint");
        std::env::set_var("KEYSPAN_COPROCESSOR_POLL_INTERVAL", "250ms");
        std::env::set_var("KEYSPAN_COPROCESSOR_TIMEOUT", "2m");

        let config = StoreConfig::from_env().expect("env config");
        clear_env();

        assert_eq!(config.address, "memory://env");
        assert_eq!(config.namespace.as_deref(), Some("geo"));
        assert_eq!(config.variant, BackendVariant::Bigtable);
        assert_eq!(config.scan_cache_size, 1);
        assert!(!config.enable_server_side_filtering);
        assert_eq!(config.coprocessor_class.as_deref(), Some("AggregationEndpoint"));
        assert_eq!(config.coprocessor_poll_interval, Duration::from_millis(250));
        assert_eq!(config.coprocessor_timeout, Duration::from_secs(120));
    }

    #[test]
    #[serial]
    fn from_env_rejects_malformed_values() {
        clear_env();
        std::env::set_var("KEYSPAN_WRITER_BUFFER_SIZE", "lots");
        let err = StoreConfig::from_env().expect_err("bad buffer size");
        assert!(format!("{err:#}").contains("invalid usize value: lots"));

        clear_env();
        std::env::set_var("KEYSPAN_BACKEND", "cassandra");
        assert!(StoreConfig::from_env().is_err());

        clear_env();
        std::env::set_var("KEYSPAN_COPROCESSOR_POLL_INTERVAL", "0s");
        let err = StoreConfig::from_env().expect_err("zero poll interval");
        assert!(err.to_string().contains("must be greater than zero"));
        clear_env();
    }

    #[test]
    fn config_serializes_durations_as_text() {
        let config = StoreConfig::new("memory://json").with_namespace("");
        let json = serde_json::to_value(&config).expect("serialize config");
        assert_eq!(json["coprocessor_poll_interval"], "10s");
        assert_eq!(json["variant"], "hbase");
        assert!(json["namespace"].is_null());
        let back: StoreConfig = serde_json::from_value(json).expect("deserialize config");
        assert_eq!(back, config);
    }
}
