use super::{BatchOutcome, EventStore, StoreError};
use crate::models::{DailyRollup, HostId, HostUpdate, LiveState, ProbeSample, TransitionEvent};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use time::{Date, OffsetDateTime};

#[derive(Default)]
pub(super) struct Tables {
    pub(super) hosts: HashMap<HostId, LiveState>,
    /// Per host, sorted by `at`, strictly increasing.
    pub(super) transitions: HashMap<HostId, Vec<TransitionEvent>>,
    /// Per host, in tick order, so purge pops from the front.
    pub(super) samples: HashMap<HostId, VecDeque<ProbeSample>>,
    pub(super) rollups: BTreeMap<(Date, HostId), DailyRollup>,
}

impl Tables {
    pub(super) fn check_transition(&self, event: &TransitionEvent) -> Result<(), StoreError> {
        let last = self.transitions.get(&event.host_id).and_then(|events| events.last());
        match last {
            Some(last) if last.at >= event.at => Err(StoreError::OutOfOrder {
                host_id: event.host_id.clone(),
                at: event.at,
            }),
            _ => Ok(()),
        }
    }

    pub(super) fn push_transition(&mut self, event: TransitionEvent) -> Result<(), StoreError> {
        self.check_transition(&event)?;
        self.transitions.entry(event.host_id.clone()).or_default().push(event);
        Ok(())
    }

    pub(super) fn push_sample(&mut self, sample: ProbeSample) {
        self.samples.entry(sample.host_id.clone()).or_default().push_back(sample);
    }

    /// Drops samples older than `cutoff` and returns how many went.
    pub(super) fn drop_samples_before(&mut self, cutoff: OffsetDateTime) -> usize {
        let mut dropped = 0;
        self.samples.retain(|_, queue| {
            while queue.front().is_some_and(|s| s.at < cutoff) {
                queue.pop_front();
                dropped += 1;
            }
            !queue.is_empty()
        });
        dropped
    }

    pub(super) fn put_rollup(&mut self, rollup: DailyRollup) {
        self.rollups.insert((rollup.day, rollup.host_id.clone()), rollup);
    }
}

/// In-memory tables. Readers take a short read lock and copy out what they
/// need, so queries never wait on a tick for longer than one batch write.
#[derive(Default)]
pub struct MemoryStore {
    pub(super) tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transition_count(&self) -> usize {
        self.tables.read().transitions.values().map(Vec::len).sum()
    }

    pub fn sample_count(&self) -> usize {
        self.tables.read().samples.values().map(VecDeque::len).sum()
    }

    pub fn all_rollups(&self) -> Vec<DailyRollup> {
        self.tables.read().rollups.values().cloned().collect()
    }
}

impl EventStore for MemoryStore {
    fn host_states(&self) -> Result<HashMap<HostId, LiveState>, StoreError> {
        Ok(self.tables.read().hosts.clone())
    }

    fn update_hosts(&self, updates: &[HostUpdate]) -> BatchOutcome {
        let mut tables = self.tables.write();
        let mut outcome = BatchOutcome::default();
        for update in updates {
            tables.hosts.insert(update.host_id.clone(), update.state.clone());
            outcome.written += 1;
        }
        outcome
    }

    fn insert_transitions(&self, events: &[TransitionEvent]) -> BatchOutcome {
        let mut tables = self.tables.write();
        let mut outcome = BatchOutcome::default();
        for event in events {
            outcome.record(&event.host_id, tables.push_transition(event.clone()));
        }
        outcome
    }

    fn insert_samples(&self, samples: &[ProbeSample]) -> BatchOutcome {
        let mut tables = self.tables.write();
        for sample in samples {
            tables.push_sample(sample.clone());
        }
        BatchOutcome { written: samples.len(), failures: Vec::new() }
    }

    fn last_transition_at_or_before(&self, host_id: &HostId, t: OffsetDateTime) -> Result<Option<TransitionEvent>, StoreError> {
        let tables = self.tables.read();
        let Some(events) = tables.transitions.get(host_id) else {
            return Ok(None);
        };
        let idx = events.partition_point(|e| e.at <= t);
        Ok(idx.checked_sub(1).map(|i| events[i].clone()))
    }

    fn first_transition_after(&self, host_id: &HostId, t: OffsetDateTime) -> Result<Option<TransitionEvent>, StoreError> {
        let tables = self.tables.read();
        let Some(events) = tables.transitions.get(host_id) else {
            return Ok(None);
        };
        let idx = events.partition_point(|e| e.at <= t);
        Ok(events.get(idx).cloned())
    }

    fn transitions_in_range(&self, host_id: &HostId, from: OffsetDateTime, to: OffsetDateTime) -> Result<Vec<TransitionEvent>, StoreError> {
        let tables = self.tables.read();
        let Some(events) = tables.transitions.get(host_id) else {
            return Ok(Vec::new());
        };
        let lo = events.partition_point(|e| e.at < from);
        let hi = events.partition_point(|e| e.at < to);
        Ok(if lo < hi { events[lo..hi].to_vec() } else { Vec::new() })
    }

    fn upsert_rollup(&self, rollup: &DailyRollup) -> Result<(), StoreError> {
        self.tables.write().put_rollup(rollup.clone());
        Ok(())
    }

    fn rollups_in_range(&self, from_day: Date, to_day: Date) -> Result<Vec<DailyRollup>, StoreError> {
        if from_day > to_day {
            return Ok(Vec::new());
        }
        let tables = self.tables.read();
        Ok(tables
            .rollups
            .range((from_day, HostId::default())..)
            .take_while(|((day, _), _)| *day <= to_day)
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn samples_for_host(&self, host_id: &HostId, limit: usize) -> Result<Vec<ProbeSample>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .samples
            .get(host_id)
            .map(|queue| queue.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn purge_samples_before(&self, cutoff: OffsetDateTime) -> Result<usize, StoreError> {
        Ok(self.tables.write().drop_samples_before(cutoff))
    }
}
