//! Run-scoped statistics shared between stages and progress reporting.
//!
//! Everything here is atomic so a progress reader can sample the numbers
//! while the chain is still writing them.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counts observations and how many of them were "marked" (a miss, a
/// failed predicate). Composed into stages that need to report a ratio.
#[derive(Debug, Default)]
pub struct RatioStats {
    total: AtomicU64,
    marked: AtomicU64,
}

impl RatioStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn observe(&self, marked: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if marked {
            self.marked.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn marked(&self) -> u64 {
        self.marked.load(Ordering::Relaxed)
    }

    /// Marked share in percent, 0.0 before the first observation.
    pub fn percent(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        100.0 * self.marked() as f64 / total as f64
    }
}

/// Counters maintained by the counting sink.
#[derive(Debug, Default)]
pub struct RunCounters {
    handled: AtomicU64,
    flag_false: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub handled: u64,
    pub flag_false: u64,
}

impl RunCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, flag_false: bool) {
        self.handled.fetch_add(1, Ordering::Relaxed);
        if flag_false {
            self.flag_false.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            handled: self.handled.load(Ordering::Relaxed),
            flag_false: self.flag_false.load(Ordering::Relaxed),
        }
    }
}
