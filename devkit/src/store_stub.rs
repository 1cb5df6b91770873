/*!
Failure-injecting event store

Wraps a `MemoryStore` and makes chosen writes fail, so tests can check that
one host's failed write neither aborts its siblings nor gets lost.
*/

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::{Date, OffsetDateTime};
use uptime_kernel::models::{DailyRollup, HostId, HostUpdate, LiveState, ProbeSample, TransitionEvent};
use uptime_kernel::store::{BatchOutcome, EventStore, MemoryStore, StoreError};

#[derive(Default)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing_transitions: Mutex<HashSet<HostId>>,
    failing_rollups: Mutex<HashSet<HostId>>,
    states_unreadable: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self { inner, ..Self::default() }
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    pub fn fail_transitions_for(&self, host: &str, failing: bool) {
        toggle(&self.failing_transitions, host, failing);
    }

    pub fn fail_rollups_for(&self, host: &str, failing: bool) {
        toggle(&self.failing_rollups, host, failing);
    }

    pub fn set_states_unreadable(&self, unreadable: bool) {
        self.states_unreadable.store(unreadable, Ordering::SeqCst);
    }
}

fn toggle(set: &Mutex<HashSet<HostId>>, host: &str, on: bool) {
    let mut set = set.lock();
    if on {
        set.insert(HostId::from(host));
    } else {
        set.remove(&HostId::from(host));
    }
}

fn injected(host_id: &HostId) -> StoreError {
    StoreError::Unavailable(format!("injected failure for {host_id}"))
}

impl EventStore for FlakyStore {
    fn host_states(&self) -> Result<HashMap<HostId, LiveState>, StoreError> {
        if self.states_unreadable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("host states switched off by test".into()));
        }
        self.inner.host_states()
    }

    fn update_hosts(&self, updates: &[HostUpdate]) -> BatchOutcome {
        self.inner.update_hosts(updates)
    }

    fn insert_transitions(&self, events: &[TransitionEvent]) -> BatchOutcome {
        let failing = self.failing_transitions.lock().clone();
        let (rejected, accepted): (Vec<_>, Vec<_>) = events.iter().cloned().partition(|e| failing.contains(&e.host_id));

        let mut outcome = self.inner.insert_transitions(&accepted);
        for event in &rejected {
            outcome.record(&event.host_id, Err(injected(&event.host_id)));
        }
        outcome
    }

    fn insert_samples(&self, samples: &[ProbeSample]) -> BatchOutcome {
        self.inner.insert_samples(samples)
    }

    fn last_transition_at_or_before(&self, host_id: &HostId, t: OffsetDateTime) -> Result<Option<TransitionEvent>, StoreError> {
        self.inner.last_transition_at_or_before(host_id, t)
    }

    fn first_transition_after(&self, host_id: &HostId, t: OffsetDateTime) -> Result<Option<TransitionEvent>, StoreError> {
        self.inner.first_transition_after(host_id, t)
    }

    fn transitions_in_range(&self, host_id: &HostId, from: OffsetDateTime, to: OffsetDateTime) -> Result<Vec<TransitionEvent>, StoreError> {
        self.inner.transitions_in_range(host_id, from, to)
    }

    fn upsert_rollup(&self, rollup: &DailyRollup) -> Result<(), StoreError> {
        if self.failing_rollups.lock().contains(&rollup.host_id) {
            return Err(injected(&rollup.host_id));
        }
        self.inner.upsert_rollup(rollup)
    }

    fn rollups_in_range(&self, from_day: Date, to_day: Date) -> Result<Vec<DailyRollup>, StoreError> {
        self.inner.rollups_in_range(from_day, to_day)
    }

    fn samples_for_host(&self, host_id: &HostId, limit: usize) -> Result<Vec<ProbeSample>, StoreError> {
        self.inner.samples_for_host(host_id, limit)
    }

    fn purge_samples_before(&self, cutoff: OffsetDateTime) -> Result<usize, StoreError> {
        self.inner.purge_samples_before(cutoff)
    }
}
