use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Lock-free counters for one page's scanning activity.
#[derive(Debug, Default)]
pub struct StatsCollector {
    submitted: AtomicU64,
    blocked: AtomicU64,
    warned: AtomicU64,
    allowed: AtomicU64,
    failed: AtomicU64,
    duplicates_skipped: AtomicU64,
    pages_blocked: AtomicU64,

    detector_total_ms: AtomicU64,
    detector_count: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub blocked: u64,
    pub warned: u64,
    pub allowed: u64,
    pub failed: u64,
    pub duplicates_skipped: u64,
    pub pages_blocked: u64,
    pub avg_detector_ms: u64,
}

impl StatsCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_warned(&self) {
        self.warned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_page_blocked(&self) {
        self.pages_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detector_latency(&self, ms: u64) {
        self.detector_total_ms.fetch_add(ms, Ordering::Relaxed);
        self.detector_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> StatsSnapshot {
        let count = self.detector_count.load(Ordering::Relaxed);
        let total_ms = self.detector_total_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            warned: self.warned.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            pages_blocked: self.pages_blocked.load(Ordering::Relaxed),
            avg_detector_ms: if count > 0 { total_ms / count } else { 0 },
        }
    }

    pub fn dump_stats(&self) {
        let s = self.get_snapshot();
        let flagged = s.blocked + s.warned;
        info!(
            "STATS DUMP: Submitted: {}, Blocked: {}, Warned: {}, Allowed: {}, Failed: {}, Duplicates: {}, Flagged: {:.1}%, Detector avg: {}ms",
            s.submitted,
            s.blocked,
            s.warned,
            s.allowed,
            s.failed,
            s.duplicates_skipped,
            if s.submitted > 0 {
                (flagged as f64 / s.submitted as f64) * 100.0
            } else {
                0.0
            },
            s.avg_detector_ms
        );
    }
}
