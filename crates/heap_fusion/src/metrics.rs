//! In-process counters for heap scans and filter pushdown.
//!
//! Counters are lock-free so scan workers can bump them on every tuple.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Aggregated counters shared by every provider of one engine instance.
#[derive(Debug, Default)]
pub struct ScanMetrics {
    /// Filter expressions the host can partially evaluate.
    supports_inexact: AtomicU64,
    /// Filter expressions left entirely to DataFusion.
    supports_unsupported: AtomicU64,
    /// Scans initialized through providers.
    scans: AtomicU64,
    /// Filter expressions handed to scans.
    scan_filters: AtomicU64,
    /// Tuples returned by host cursors.
    rows_scanned: AtomicU64,
    /// Rows emitted in materialized batches.
    rows_emitted: AtomicU64,
    /// Rows emitted as counts only.
    rows_counted: AtomicU64,
    /// Batches handed to DataFusion.
    batches: AtomicU64,
    /// Worker pulls that failed.
    scan_errors: AtomicU64,
    /// Replacement scans resolved to a heap table or view.
    replacements_resolved: AtomicU64,
}

/// Point-in-time copy of [`ScanMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanMetricsSnapshot {
    pub supports_inexact: u64,
    pub supports_unsupported: u64,
    pub scans: u64,
    pub scan_filters: u64,
    pub rows_scanned: u64,
    pub rows_emitted: u64,
    pub rows_counted: u64,
    pub batches: u64,
    pub scan_errors: u64,
    pub replacements_resolved: u64,
}

impl ScanMetrics {
    /// Records the outcome of one `supports_filters_pushdown` check.
    pub fn record_filter_support(&self, pushed: bool) {
        if pushed {
            self.supports_inexact.fetch_add(1, Ordering::Relaxed);
        } else {
            self.supports_unsupported.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records one initialized scan and the number of filters it received.
    pub fn record_scan(&self, filters: u64) {
        self.scans.fetch_add(1, Ordering::Relaxed);
        self.scan_filters.fetch_add(filters, Ordering::Relaxed);
    }

    pub fn record_rows_scanned(&self, rows: u64) {
        self.rows_scanned.fetch_add(rows, Ordering::Relaxed);
    }

    /// Records one emitted batch.
    pub fn record_batch(&self, rows: u64, count_only: bool) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        if count_only {
            self.rows_counted.fetch_add(rows, Ordering::Relaxed);
        } else {
            self.rows_emitted.fetch_add(rows, Ordering::Relaxed);
        }
    }

    pub fn record_scan_error(&self) {
        self.scan_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replacement(&self) {
        self.replacements_resolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Captures a point-in-time copy of all counters.
    pub fn snapshot(&self) -> ScanMetricsSnapshot {
        ScanMetricsSnapshot {
            supports_inexact: self.supports_inexact.load(Ordering::Relaxed),
            supports_unsupported: self.supports_unsupported.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            scan_filters: self.scan_filters.load(Ordering::Relaxed),
            rows_scanned: self.rows_scanned.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
            rows_counted: self.rows_counted.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            scan_errors: self.scan_errors.load(Ordering::Relaxed),
            replacements_resolved: self.replacements_resolved.load(Ordering::Relaxed),
        }
    }

    /// Renders the counters as `key=value` lines.
    pub fn render_text(&self) -> String {
        let s = self.snapshot();
        format!(
            "scan_support_inexact={}\nscan_support_unsupported={}\nscans={}\nscan_filters={}\nscan_rows_scanned={}\nscan_rows_emitted={}\nscan_rows_counted={}\nscan_batches={}\nscan_errors={}\nreplacements_resolved={}\n",
            s.supports_inexact,
            s.supports_unsupported,
            s.scans,
            s.scan_filters,
            s.rows_scanned,
            s.rows_emitted,
            s.rows_counted,
            s.batches,
            s.scan_errors,
            s.replacements_resolved,
        )
    }
}
