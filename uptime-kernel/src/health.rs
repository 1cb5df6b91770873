use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::rollup::RollupReport;
use crate::tracker::TickReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastTick {
    pub at: String,
    pub duration_ms: u64,
    pub probed: usize,
    pub online: usize,
    pub transitions: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastRollup {
    pub day: String,
    pub written: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub hosts_tracked: u32,
    pub ticks_completed: u64,
    pub ticks_skipped: u64,
    pub ticks_aborted: u64,
    pub last_tick: Option<LastTick>,
    pub last_rollup: Option<LastRollup>,
}

/// Counters shared by the scheduler, the rollup job and `/system/health`.
/// Clones share the same counters.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    ticks_completed: Arc<AtomicU64>,
    ticks_skipped: Arc<AtomicU64>,
    ticks_aborted: Arc<AtomicU64>,
    last_tick: Arc<Mutex<Option<LastTick>>>,
    last_rollup: Arc<Mutex<Option<LastRollup>>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            ticks_completed: Arc::new(AtomicU64::new(0)),
            ticks_skipped: Arc::new(AtomicU64::new(0)),
            ticks_aborted: Arc::new(AtomicU64::new(0)),
            last_tick: Arc::new(Mutex::new(None)),
            last_rollup: Arc::new(Mutex::new(None)),
        }
    }

    pub fn record_tick(&self, report: &TickReport, elapsed: Duration) {
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
        *self.last_tick.lock() = Some(LastTick {
            at: report
                .at
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            duration_ms: elapsed.as_millis() as u64,
            probed: report.probed,
            online: report.online,
            transitions: report.transitions,
            failures: report.failures,
        });
    }

    pub fn record_skipped_tick(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted_tick(&self) {
        self.ticks_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollup(&self, report: &RollupReport) {
        *self.last_rollup.lock() = Some(LastRollup {
            day: crate::models::format_day(report.day),
            written: report.written,
            failed: report.failed.len(),
        });
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped.load(Ordering::Relaxed)
    }

    pub fn ticks_completed(&self) -> u64 {
        self.ticks_completed.load(Ordering::Relaxed)
    }

    pub fn get_health(&self, hosts_tracked: usize) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            hosts_tracked: hosts_tracked as u32,
            ticks_completed: self.ticks_completed(),
            ticks_skipped: self.ticks_skipped(),
            ticks_aborted: self.ticks_aborted.load(Ordering::Relaxed),
            last_tick: self.last_tick.lock().clone(),
            last_rollup: self.last_rollup.lock().clone(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let health = HealthTracker::new();
        let clone = health.clone();
        clone.record_skipped_tick();
        clone.record_tick(
            &TickReport { at: datetime!(2024-01-01 00:00 UTC), probed: 3, online: 2, transitions: 1, failures: 0 },
            Duration::from_millis(12),
        );
        let snapshot = health.get_health(3);
        assert_eq!(snapshot.ticks_completed, 1);
        assert_eq!(snapshot.ticks_skipped, 1);
        let last = snapshot.last_tick.unwrap();
        assert_eq!(last.at, "2024-01-01T00:00:00Z");
        assert_eq!(last.duration_ms, 12);
    }
}
