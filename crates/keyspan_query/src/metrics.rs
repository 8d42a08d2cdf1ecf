//! Lock-free counters for query execution.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Aggregated counters shared by every query that is handed the same
/// instance.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    /// Queries executed.
    queries: AtomicU64,
    /// Queries answered empty without opening a scanner.
    empty_short_circuits: AtomicU64,
    scans_opened: AtomicU64,
    /// Raw rows pulled from scanners.
    rows_scanned: AtomicU64,
    /// Entries handed to callers.
    entries_returned: AtomicU64,
    /// Failures that were logged and turned into empty or truncated results.
    soft_failures: AtomicU64,
    /// Groups of physical rows folded by a merge transform.
    merged_groups: AtomicU64,
    /// Scans that carried a server-side filter payload.
    server_filters_attached: AtomicU64,
}

/// Point-in-time copy of [`QueryMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueryMetricsSnapshot {
    pub queries: u64,
    pub empty_short_circuits: u64,
    pub scans_opened: u64,
    pub rows_scanned: u64,
    pub entries_returned: u64,
    pub soft_failures: u64,
    pub merged_groups: u64,
    pub server_filters_attached: u64,
}

impl QueryMetrics {
    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_short_circuit(&self) {
        self.empty_short_circuits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan_opened(&self, server_filter: bool) {
        self.scans_opened.fetch_add(1, Ordering::Relaxed);
        if server_filter {
            self.server_filters_attached.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_row_scanned(&self) {
        self.rows_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entry_returned(&self) {
        self.entries_returned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_soft_failure(&self) {
        self.soft_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_merged_group(&self) {
        self.merged_groups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueryMetricsSnapshot {
        QueryMetricsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            empty_short_circuits: self.empty_short_circuits.load(Ordering::Relaxed),
            scans_opened: self.scans_opened.load(Ordering::Relaxed),
            rows_scanned: self.rows_scanned.load(Ordering::Relaxed),
            entries_returned: self.entries_returned.load(Ordering::Relaxed),
            soft_failures: self.soft_failures.load(Ordering::Relaxed),
            merged_groups: self.merged_groups.load(Ordering::Relaxed),
            server_filters_attached: self.server_filters_attached.load(Ordering::Relaxed),
        }
    }

    /// Plain `name=value` lines.
    pub fn render_text(&self) -> String {
        let s = self.snapshot();
        format!(
            "queries={}\nempty_short_circuits={}\nscans_opened={}\nrows_scanned={}\nentries_returned={}\nsoft_failures={}\nmerged_groups={}\nserver_filters_attached={}\n",
            s.queries,
            s.empty_short_circuits,
            s.scans_opened,
            s.rows_scanned,
            s.entries_returned,
            s.soft_failures,
            s.merged_groups,
            s.server_filters_attached,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_and_text_agree() {
        let metrics = QueryMetrics::default();
        metrics.record_query();
        metrics.record_scan_opened(true);
        metrics.record_scan_opened(false);
        metrics.record_row_scanned();
        metrics.record_entry_returned();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.scans_opened, 2);
        assert_eq!(snapshot.server_filters_attached, 1);
        let text = metrics.render_text();
        assert!(text.contains("scans_opened=2\n"));
        assert!(text.contains("entries_returned=1\n"));

        let json = serde_json::to_value(snapshot).expect("serialize");
        assert_eq!(json["rows_scanned"], 1);
    }
}
