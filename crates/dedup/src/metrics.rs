//! Dedup metrics for observability

use std::sync::atomic::{AtomicU64, Ordering};

/// Admission counters for a DedupCache
#[derive(Debug, Default)]
pub struct DedupMetrics {
    /// Keys admitted (first sighting in a window)
    admitted_count: AtomicU64,
    /// Calls rejected as duplicates
    suppressed_count: AtomicU64,
    /// Window resets (ticker or explicit)
    clear_count: AtomicU64,
}

impl DedupMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admitted_count(&self) -> u64 {
        self.admitted_count.load(Ordering::Relaxed)
    }

    pub fn inc_admitted_count(&self) {
        self.admitted_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed_count.load(Ordering::Relaxed)
    }

    pub fn inc_suppressed_count(&self) {
        self.suppressed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clear_count(&self) -> u64 {
        self.clear_count.load(Ordering::Relaxed)
    }

    pub fn inc_clear_count(&self) {
        self.clear_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> DedupSnapshot {
        DedupSnapshot {
            admitted_count: self.admitted_count(),
            suppressed_count: self.suppressed_count(),
            clear_count: self.clear_count(),
        }
    }
}

/// Snapshot of dedup metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupSnapshot {
    pub admitted_count: u64,
    pub suppressed_count: u64,
    pub clear_count: u64,
}

impl DedupSnapshot {
    /// Fraction of calls suppressed, 0.0 when nothing was seen
    pub fn suppression_ratio(&self) -> f64 {
        let total = self.admitted_count + self.suppressed_count;
        if total == 0 {
            0.0
        } else {
            self.suppressed_count as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppression_ratio() {
        let snapshot = DedupSnapshot {
            admitted_count: 1,
            suppressed_count: 3,
            clear_count: 0,
        };
        assert!((snapshot.suppression_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(DedupSnapshot::default().suppression_ratio(), 0.0);
    }
}
