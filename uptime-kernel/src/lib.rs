/**
 * UPTIME KERNEL - host availability tracking core
 *
 * ROLE: probes a fleet of hosts on a fixed tick, records every online/offline
 * transition in an append-only log, and answers availability questions
 * (uptime over a window, fleet ranking by downtime) from that log or from
 * precomputed daily rollups.
 *
 * PIPELINE: scheduler -> tracker -> store -> {rollup job, aggregator}.
 * Both query paths go through the single sweep in `sweep.rs`.
 */

pub mod aggregator;
pub mod config;
pub mod directory;
pub mod health;
pub mod http;
pub mod models;
pub mod retention;
pub mod rollup;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod sweep;
pub mod tracker;
pub mod transport;

pub use aggregator::{QueryError, UptimeAggregator};
pub use config::KernelConfig;
pub use directory::{ConfigDirectory, DirectoryError, HostDirectory};
pub use health::HealthTracker;
pub use models::{
    DailyRollup, DowntimeEntry, HostEntry, HostId, HostUpdate, LiveState, ProbeSample,
    TransitionEvent, UptimeSummary,
};
pub use rollup::{RollupError, RollupJob, RollupReport};
pub use scheduler::{ProbeScheduler, SchedulerSettings, TickOutcome};
pub use store::{BatchOutcome, EventStore, JournalStore, MemoryStore, SharedStore, StoreError};
pub use sweep::{sweep, Coverage};
pub use tracker::{StatusTracker, TickReport};
pub use transport::{ProbeReply, ProbeTransport, TransportError};
