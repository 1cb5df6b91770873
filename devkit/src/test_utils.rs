/*!
Test harness for kernel scenarios

Wires the scripted transport, the static directory and the flaky store into
a real scheduler, aggregator and rollup job, so a scenario reads as a list
of ticks at fixed instants followed by queries.
*/

use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uptime_kernel::aggregator::UptimeAggregator;
use uptime_kernel::health::HealthTracker;
use uptime_kernel::rollup::RollupJob;
use uptime_kernel::scheduler::{ProbeScheduler, SchedulerSettings, TickOutcome};
use uptime_kernel::store::{MemoryStore, SharedStore};

use crate::directory_stub::StaticDirectory;
use crate::store_stub::FlakyStore;
use crate::transport_stub::ScriptedTransport;

pub struct TestHarness {
    pub directory: Arc<StaticDirectory>,
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<FlakyStore>,
    pub health: HealthTracker,
    pub scheduler: Arc<ProbeScheduler>,
    pub aggregator: Arc<UptimeAggregator>,
    pub rollups: Arc<RollupJob>,
}

impl TestHarness {
    /// `(id, address)` pairs. Probes default to a 200 ms timeout so hanging
    /// probes keep tests short.
    pub fn new(hosts: &[(&str, &str)]) -> Self {
        Self::with_settings(
            hosts,
            SchedulerSettings {
                interval: Duration::from_secs(30),
                concurrency: 50,
                probe_timeout: Duration::from_millis(200),
            },
        )
    }

    pub fn with_settings(hosts: &[(&str, &str)], settings: SchedulerSettings) -> Self {
        init_tracing();

        let directory = Arc::new(StaticDirectory::with_hosts(hosts));
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(FlakyStore::new(Arc::new(MemoryStore::new())));
        let shared: SharedStore = store.clone();
        let health = HealthTracker::new();

        let scheduler = Arc::new(ProbeScheduler::new(
            directory.clone(),
            transport.clone(),
            shared.clone(),
            settings,
            health.clone(),
        ));
        let aggregator = Arc::new(UptimeAggregator::new(shared, directory.clone()));
        let rollups = Arc::new(RollupJob::new(aggregator.clone(), true, health.clone()));

        Self { directory, transport, store, health, scheduler, aggregator, rollups }
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        self.store.inner()
    }

    /// Runs one tick at the RFC 3339 instant `at`.
    pub async fn tick_at(&self, at: &str) -> TickOutcome {
        self.scheduler.try_tick_at(utc(at)).await
    }
}

/// Parses an RFC 3339 timestamp; panics on bad input since it only ever
/// receives literals written in tests.
pub fn utc(raw: &str) -> OffsetDateTime {
    match OffsetDateTime::parse(raw, &Rfc3339) {
        Ok(t) => t,
        Err(e) => panic!("bad test timestamp {raw:?}: {e}"),
    }
}

/// Routes kernel logs to the test writer; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
