/**
 * PROBE SCHEDULER
 *
 * ROLE: one recurring timer; each tick probes the whole directory snapshot
 * and hands the results to the tracker.
 *
 * HOW IT WORKS:
 * - fan-out through `buffer_unordered(concurrency)`: at most `concurrency`
 *   probes in flight, whatever the fleet size
 * - every probe is wrapped in `timeout`; errors and timeouts become offline
 *   samples, no retry inside a tick
 * - all samples of a tick share one `now` and are collected before any write
 * - the tracker commit runs on the blocking pool, the store may touch disk
 * - ticks never overlap: the timer loop awaits each tick, and the tick guard
 *   makes any concurrent request (manual tick) return `Skipped`
 */

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ProbeConf;
use crate::directory::HostDirectory;
use crate::health::HealthTracker;
use crate::models::{HostEntry, ProbeSample};
use crate::store::SharedStore;
use crate::tracker::{StatusTracker, TickReport};
use crate::transport::{ProbeReply, ProbeTransport};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub concurrency: usize,
    pub probe_timeout: Duration,
}

impl From<&ProbeConf> for SchedulerSettings {
    fn from(conf: &ProbeConf) -> Self {
        Self {
            interval: Duration::from_secs(conf.interval_secs.max(1)),
            concurrency: conf.concurrency.max(1),
            probe_timeout: Duration::from_millis(conf.timeout_ms.max(1)),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&ProbeConf::default())
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another tick still owned the host states.
    Skipped,
    /// Nothing was written: the directory or the previous states were unreadable.
    Aborted(String),
}

pub struct ProbeScheduler {
    directory: Arc<dyn HostDirectory>,
    transport: Arc<dyn ProbeTransport>,
    tracker: StatusTracker,
    settings: SchedulerSettings,
    health: HealthTracker,
    tick_guard: Mutex<()>,
}

impl ProbeScheduler {
    pub fn new(
        directory: Arc<dyn HostDirectory>,
        transport: Arc<dyn ProbeTransport>,
        store: SharedStore,
        settings: SchedulerSettings,
        health: HealthTracker,
    ) -> Self {
        Self {
            directory,
            transport,
            tracker: StatusTracker::new(store),
            settings,
            health,
            tick_guard: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.settings
    }

    /// Runs ticks until `cancel` fires. A tick in progress is finished first.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            concurrency = self.settings.concurrency,
            timeout_ms = self.settings.probe_timeout.as_millis() as u64,
            "probe scheduler started"
        );
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("probe scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.try_tick().await;
                }
            }
        }
    }

    pub async fn try_tick(&self) -> TickOutcome {
        self.try_tick_at(tick_now()).await
    }

    /// One tick observing `now` for every sample and transition.
    pub async fn try_tick_at(&self, now: OffsetDateTime) -> TickOutcome {
        let Ok(_owned) = self.tick_guard.try_lock() else {
            self.health.record_skipped_tick();
            tracing::warn!("previous tick still running, skipping this one");
            return TickOutcome::Skipped;
        };
        let started = Instant::now();

        let hosts = match self.directory.list_hosts() {
            Ok(hosts) => hosts,
            Err(e) => {
                self.health.record_aborted_tick();
                tracing::error!(error = %e, "tick aborted: host directory unreadable");
                return TickOutcome::Aborted(e.to_string());
            }
        };

        let samples = self.probe_all(&hosts, now).await;

        // journal writes are blocking file I/O
        let tracker = self.tracker.clone();
        let applied = match tokio::task::spawn_blocking(move || tracker.apply(now, samples)).await {
            Ok(applied) => applied.map_err(|e| e.to_string()),
            Err(e) => Err(format!("tick commit task failed: {e}")),
        };

        match applied {
            Ok(report) => {
                let elapsed = started.elapsed();
                self.health.record_tick(&report, elapsed);
                tracing::debug!(
                    probed = report.probed,
                    online = report.online,
                    transitions = report.transitions,
                    failures = report.failures,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "tick complete"
                );
                TickOutcome::Completed(report)
            }
            Err(e) => {
                self.health.record_aborted_tick();
                tracing::error!(error = %e, "tick aborted before commit");
                TickOutcome::Aborted(e)
            }
        }
    }

    /// Probes every host with at most `concurrency` probes in flight.
    pub async fn probe_all(&self, hosts: &[HostEntry], at: OffsetDateTime) -> Vec<ProbeSample> {
        let timeout = self.settings.probe_timeout;
        // owned futures: nothing borrowed from this frame is held across the await
        let probes: Vec<BoxFuture<'static, ProbeSample>> = hosts
            .iter()
            .map(|host| probe_one(Arc::clone(&self.transport), host.clone(), timeout, at).boxed())
            .collect();
        stream::iter(probes).buffer_unordered(self.settings.concurrency).collect().await
    }
}

async fn probe_one(transport: Arc<dyn ProbeTransport>, host: HostEntry, timeout: Duration, at: OffsetDateTime) -> ProbeSample {
    let reply = match tokio::time::timeout(timeout, transport.probe(&host.address, timeout)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            tracing::debug!(host_id = %host.id, address = %host.address, error = %e, "probe failed");
            ProbeReply::down()
        }
        Err(_) => {
            tracing::debug!(host_id = %host.id, address = %host.address, "probe timed out");
            ProbeReply::down()
        }
    };
    ProbeSample {
        host_id: host.id,
        at,
        alive: reply.alive,
        latency_ms: if reply.alive { reply.latency_ms } else { None },
    }
}

/// Wall clock truncated to milliseconds, the resolution of every duration
/// the kernel reports.
pub fn tick_now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_millisecond(now.millisecond()).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_conf() {
        let settings = SchedulerSettings::from(&ProbeConf { concurrency: 0, ..ProbeConf::default() });
        assert_eq!(settings.concurrency, 1);
        assert_eq!(settings.interval, Duration::from_secs(30));
        assert_eq!(settings.probe_timeout, Duration::from_millis(1000));
    }

    // compiles only while both entry points can be handed to tokio::spawn
    #[allow(dead_code)]
    fn spawnable(scheduler: Arc<ProbeScheduler>, cancel: CancellationToken) {
        fn assert_send<F: std::future::Future + Send + 'static>(_: F) {}
        let ticking = Arc::clone(&scheduler);
        assert_send(async move { ticking.try_tick().await });
        assert_send(scheduler.run(cancel));
    }

    #[test]
    fn test_tick_now_has_millisecond_resolution() {
        let now = tick_now();
        assert_eq!(now.nanosecond() % 1_000_000, 0);
    }
}
