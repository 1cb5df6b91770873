/**
 * DAILY ROLLUP JOB
 *
 * ROLE: one summary row per host per UTC day, recomputed from the transition
 * log with the aggregator's sweep and upserted. Re-running a day overwrites.
 *
 * HOW IT WORKS:
 * - `run_for_day` walks the directory snapshot; a host whose row cannot be
 *   computed or written is logged and reported, siblings continue
 * - `run_daily` sleeps until `run_at` (UTC) and rolls up yesterday
 * - `trigger` is the on-demand entry point, gated by configuration
 */

use serde::Serialize;
use std::sync::Arc;
use time::{Date, Duration, OffsetDateTime, Time, UtcOffset};
use tokio_util::sync::CancellationToken;

use crate::aggregator::UptimeAggregator;
use crate::directory::DirectoryError;
use crate::health::HealthTracker;
use crate::models::{day_bounds, format_day, DailyRollup, HostId};
use crate::store::StoreError;

#[derive(Debug, Clone, Serialize)]
pub struct RollupReport {
    #[serde(serialize_with = "serialize_day")]
    pub day: Date,
    pub hosts: usize,
    pub written: usize,
    pub failed: Vec<HostId>,
}

fn serialize_day<S: serde::Serializer>(day: &Date, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_day(*day))
}

#[derive(Debug, thiserror::Error)]
pub enum RollupError {
    #[error("manual rollups are disabled")]
    Disabled,
    #[error("day {0} has not ended yet")]
    DayNotOver(Date),
    #[error("host directory unavailable: {0}")]
    Directory(#[from] DirectoryError),
    #[error("event store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("rollup for {} incomplete: {} of {} hosts failed", .0.day, .0.failed.len(), .0.hosts)]
    Incomplete(RollupReport),
}

pub struct RollupJob {
    aggregator: Arc<UptimeAggregator>,
    manual_trigger: bool,
    health: HealthTracker,
}

impl RollupJob {
    pub fn new(aggregator: Arc<UptimeAggregator>, manual_trigger: bool, health: HealthTracker) -> Self {
        Self { aggregator, manual_trigger, health }
    }

    /// Recomputes and upserts every host's row for `day`.
    pub fn run_for_day(&self, day: Date) -> Result<RollupReport, RollupError> {
        let (start, end) = day_bounds(day);
        let hosts = self.aggregator.directory().list_hosts()?;
        let states = self.aggregator.store().host_states()?;

        let mut report = RollupReport { day, hosts: hosts.len(), written: 0, failed: Vec::new() };

        for host in &hosts {
            let result = self
                .aggregator
                .host_window(&host.id, start, end, states.get(&host.id))
                .and_then(|coverage| {
                    self.aggregator.store().upsert_rollup(&DailyRollup {
                        host_id: host.id.clone(),
                        day,
                        online_ms: coverage.online_ms(),
                        offline_ms: coverage.offline_ms(),
                        transition_count: coverage.transitions,
                    })
                });

            match result {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::warn!(host_id = %host.id, day = %format_day(day), error = %e, "rollup row skipped");
                    report.failed.push(host.id.clone());
                }
            }
        }

        self.health.record_rollup(&report);

        if report.failed.is_empty() {
            tracing::info!(day = %format_day(day), hosts = report.hosts, written = report.written, "daily rollup complete");
            Ok(report)
        } else {
            Err(RollupError::Incomplete(report))
        }
    }

    /// On-demand rollup. Only days that are fully in the past are accepted.
    pub fn trigger(&self, day: Date, now: OffsetDateTime) -> Result<RollupReport, RollupError> {
        if !self.manual_trigger {
            return Err(RollupError::Disabled);
        }
        if day >= now.to_offset(UtcOffset::UTC).date() {
            return Err(RollupError::DayNotOver(day));
        }
        tracing::info!(day = %format_day(day), "manual rollup requested");
        self.run_for_day(day)
    }

    /// Rolls up yesterday every day at `run_at` UTC until `cancel` fires.
    pub async fn run_daily(self: Arc<Self>, run_at: Time, catch_up: bool, cancel: CancellationToken) {
        tracing::info!(run_at = %run_at, catch_up, "daily rollup job started");

        if catch_up {
            self.roll_yesterday(OffsetDateTime::now_utc()).await;
        }

        loop {
            let now = OffsetDateTime::now_utc();
            let next = next_run_after(now, run_at);
            let wait = std::time::Duration::try_from(next - now).unwrap_or_default();

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("daily rollup job stopping");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    self.roll_yesterday(next).await;
                }
            }
        }
    }

    /// The rollup reads and writes the store synchronously, so it runs on
    /// the blocking pool.
    async fn roll_yesterday(self: &Arc<Self>, now: OffsetDateTime) {
        let yesterday = now.to_offset(UtcOffset::UTC).date() - Duration::DAY;
        let job = Arc::clone(self);
        let result = match tokio::task::spawn_blocking(move || job.run_for_day(yesterday)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(day = %format_day(yesterday), error = %e, "daily rollup task failed");
                return;
            }
        };
        match result {
            Ok(_) => {}
            Err(RollupError::Incomplete(report)) => {
                tracing::warn!(
                    day = %format_day(report.day),
                    failed = report.failed.len(),
                    "daily rollup incomplete, failed rows are retried on the next run"
                );
            }
            Err(e) => tracing::error!(day = %format_day(yesterday), error = %e, "daily rollup failed"),
        }
    }
}

/// First instant strictly after `now` whose UTC wall clock reads `run_at`.
pub fn next_run_after(now: OffsetDateTime, run_at: Time) -> OffsetDateTime {
    let now = now.to_offset(UtcOffset::UTC);
    let today = now.date().with_time(run_at).assume_utc();
    if today > now {
        today
    } else {
        today + Duration::DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::HostDirectory;
    use crate::models::{HostEntry, TransitionEvent};
    use crate::store::{EventStore, MemoryStore};
    use time::macros::{date, datetime, time};

    struct Fixed(Vec<HostEntry>);

    impl HostDirectory for Fixed {
        fn list_hosts(&self) -> Result<Vec<HostEntry>, DirectoryError> {
            Ok(self.0.clone())
        }
    }

    fn job(hosts: &[&str], manual: bool) -> (Arc<MemoryStore>, RollupJob) {
        let store = Arc::new(MemoryStore::new());
        let entries = hosts.iter().map(|id| HostEntry::new(*id, "127.0.0.1", *id)).collect();
        let aggregator = Arc::new(UptimeAggregator::new(store.clone(), Arc::new(Fixed(entries))));
        (store, RollupJob::new(aggregator, manual, HealthTracker::new()))
    }

    #[test]
    fn test_next_run_after() {
        let at = time!(00:05);
        assert_eq!(next_run_after(datetime!(2024-01-01 00:00 UTC), at), datetime!(2024-01-01 00:05 UTC));
        assert_eq!(next_run_after(datetime!(2024-01-01 00:05 UTC), at), datetime!(2024-01-02 00:05 UTC));
        assert_eq!(next_run_after(datetime!(2024-12-31 23:59 UTC), at), datetime!(2025-01-01 00:05 UTC));
        assert_eq!(next_run_after(datetime!(2024-01-01 03:00 +03:00), at), datetime!(2024-01-01 00:05 UTC));
    }

    #[test]
    fn test_day_with_one_outage() {
        let (store, job) = job(&["a"], true);
        store.insert_transitions(&[
            TransitionEvent { host_id: "a".into(), at: datetime!(2024-01-01 10:00 UTC), online: false },
            TransitionEvent { host_id: "a".into(), at: datetime!(2024-01-02 00:00 UTC), online: true },
        ]);
        let report = job.run_for_day(date!(2024 - 01 - 02)).unwrap();
        assert_eq!(report.written, 1);
        let rows = store.rollups_in_range(date!(2024 - 01 - 02), date!(2024 - 01 - 02)).unwrap();
        assert_eq!(rows[0].online_ms, 24 * 3_600_000);
        assert_eq!(rows[0].transition_count, 1);
    }

    #[test]
    fn test_zero_hosts_is_not_an_error() {
        let (store, job) = job(&[], true);
        let report = job.run_for_day(date!(2024 - 01 - 01)).unwrap();
        assert_eq!(report.hosts, 0);
        assert!(store.all_rollups().is_empty());
    }

    #[test]
    fn test_trigger_gates() {
        let now = datetime!(2024-01-10 12:00 UTC);
        let (_, disabled) = job(&["a"], false);
        assert!(matches!(disabled.trigger(date!(2024 - 01 - 09), now), Err(RollupError::Disabled)));

        let (_, enabled) = job(&["a"], true);
        assert!(matches!(enabled.trigger(date!(2024 - 01 - 10), now), Err(RollupError::DayNotOver(_))));
        assert_eq!(enabled.trigger(date!(2024 - 01 - 09), now).unwrap().written, 1);
    }

    #[tokio::test]
    async fn test_catch_up_rolls_yesterday_then_stops_on_cancel() {
        let (store, job) = job(&["a", "b"], false);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::new(job).run_daily(time!(00:05), true, cancel.clone()));

        let yesterday = OffsetDateTime::now_utc().date() - Duration::DAY;
        for _ in 0..50 {
            if store.all_rollups().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        let rows = store.all_rollups();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.day == yesterday && r.online_ms + r.offline_ms == 86_400_000));
    }

    #[test]
    fn test_report_serializes_day_key() {
        let report = RollupReport { day: date!(2024 - 01 - 09), hosts: 1, written: 1, failed: vec![] };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["day"], "2024-01-09");
    }
}
