/**
 * EVENT STORE - persistence for the availability history
 *
 * ROLE:
 * Three logical stores behind one trait:
 * - probe samples   : write-once, purged after the retention window
 * - transitions     : append-only, one strictly increasing stream per host
 * - daily rollups   : unique per (host, day), upserted
 * plus the live state table owned by the running tick.
 *
 * HOW IT WORKS:
 * - `EventStore` = the interface the tracker, aggregator and rollup job use
 * - `MemoryStore` = in-memory tables, the reference implementation
 * - `JournalStore` = `MemoryStore` + JSON files on disk, loaded at boot
 * - batch writes report per-host failures instead of failing as a whole
 */

mod journal;
mod memory;

pub use journal::JournalStore;
pub use memory::MemoryStore;

use crate::models::{DailyRollup, HostId, HostUpdate, LiveState, ProbeSample, TransitionEvent};
use std::collections::HashMap;
use std::sync::Arc;
use time::{Date, OffsetDateTime};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transition for {host_id} at {at} is not after the last recorded one")]
    OutOfOrder { host_id: HostId, at: OffsetDateTime },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// One per-host write that did not make it.
#[derive(Debug)]
pub struct WriteFailure {
    pub host_id: HostId,
    pub error: StoreError,
}

/// Result of a partial-failure-tolerant batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub written: usize,
    pub failures: Vec<WriteFailure>,
}

impl BatchOutcome {
    pub fn record(&mut self, host_id: &HostId, result: Result<(), StoreError>) {
        match result {
            Ok(()) => self.written += 1,
            Err(error) => self.failures.push(WriteFailure { host_id: host_id.clone(), error }),
        }
    }

    pub fn all_failed(host_ids: impl IntoIterator<Item = HostId>, reason: &str) -> Self {
        Self {
            written: 0,
            failures: host_ids
                .into_iter()
                .map(|host_id| WriteFailure { host_id, error: StoreError::Unavailable(reason.to_string()) })
                .collect(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub trait EventStore: Send + Sync {
    /// Live state of every host that has ever been probed, by value.
    fn host_states(&self) -> Result<HashMap<HostId, LiveState>, StoreError>;

    fn update_hosts(&self, updates: &[HostUpdate]) -> BatchOutcome;

    fn insert_transitions(&self, events: &[TransitionEvent]) -> BatchOutcome;

    fn insert_samples(&self, samples: &[ProbeSample]) -> BatchOutcome;

    /// Latest transition with `at <= t`.
    fn last_transition_at_or_before(&self, host_id: &HostId, t: OffsetDateTime) -> Result<Option<TransitionEvent>, StoreError>;

    /// Earliest transition with `at > t`.
    fn first_transition_after(&self, host_id: &HostId, t: OffsetDateTime) -> Result<Option<TransitionEvent>, StoreError>;

    /// Transitions with `from <= at < to`, ascending.
    fn transitions_in_range(&self, host_id: &HostId, from: OffsetDateTime, to: OffsetDateTime) -> Result<Vec<TransitionEvent>, StoreError>;

    /// Insert or overwrite the row keyed by (host, day). All-or-nothing.
    fn upsert_rollup(&self, rollup: &DailyRollup) -> Result<(), StoreError>;

    /// Rollups whose day key lies in `[from_day, to_day]`.
    fn rollups_in_range(&self, from_day: Date, to_day: Date) -> Result<Vec<DailyRollup>, StoreError>;

    /// Most recent samples first.
    fn samples_for_host(&self, host_id: &HostId, limit: usize) -> Result<Vec<ProbeSample>, StoreError>;

    fn purge_samples_before(&self, cutoff: OffsetDateTime) -> Result<usize, StoreError>;
}

pub type SharedStore = Arc<dyn EventStore>;
