/**
 * STATUS TRANSITION TRACKER
 *
 * ROLE: turns one tick's probe samples into live state updates and
 * transition events. An event is emitted only when the observed state differs
 * from the recorded one, so "still offline" never reaches the log.
 *
 * HOW IT WORKS:
 * - `plan_tick` is pure: previous states (a snapshot, by value) + samples -> plan
 * - `commit` writes the plan as two partial-failure-tolerant batches:
 *   events + samples first, then live state
 * - a host whose event could not be written keeps its previous `is_online`,
 *   so the next tick detects the same change again instead of losing it
 */

use crate::models::{HostId, HostUpdate, LiveState, ProbeSample, TransitionEvent};
use crate::store::{BatchOutcome, SharedStore, StoreError};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;

#[derive(Debug, Clone, Default)]
pub struct TickPlan {
    pub samples: Vec<ProbeSample>,
    pub transitions: Vec<TransitionEvent>,
    pub updates: Vec<HostUpdate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub probed: usize,
    pub online: usize,
    pub transitions: usize,
    pub failures: usize,
}

/// Diffs each sample against the host's previous live state.
/// Only the first sample per host counts, so a tick emits at most one event per host.
pub fn plan_tick(at: OffsetDateTime, previous: &HashMap<HostId, LiveState>, samples: Vec<ProbeSample>) -> TickPlan {
    let mut plan = TickPlan::default();
    let mut seen = HashSet::new();

    for sample in samples {
        if !seen.insert(sample.host_id.clone()) {
            continue;
        }
        let before = previous.get(&sample.host_id).cloned().unwrap_or_default();
        let mut after = before.clone();
        after.last_probe_at = Some(at);

        if sample.alive != before.is_online {
            after.is_online = sample.alive;
            after.last_transition_at = Some(at);
            plan.transitions.push(TransitionEvent {
                host_id: sample.host_id.clone(),
                at,
                online: sample.alive,
            });
        }

        plan.updates.push(HostUpdate { host_id: sample.host_id.clone(), state: after });
        plan.samples.push(sample);
    }
    plan
}

#[derive(Clone)]
pub struct StatusTracker {
    store: SharedStore,
}

impl StatusTracker {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Applies one tick. Only a failure to read the previous states aborts;
    /// individual write failures are logged and skipped.
    pub fn apply(&self, at: OffsetDateTime, samples: Vec<ProbeSample>) -> Result<TickReport, StoreError> {
        let previous = self.store.host_states()?;
        let plan = plan_tick(at, &previous, samples);
        Ok(self.commit(at, &previous, plan))
    }

    fn commit(&self, at: OffsetDateTime, previous: &HashMap<HostId, LiveState>, plan: TickPlan) -> TickReport {
        let events = self.store.insert_transitions(&plan.transitions);
        log_failures("transition", &events);
        let unrecorded: HashSet<&HostId> = events.failures.iter().map(|f| &f.host_id).collect();

        for event in &plan.transitions {
            if !unrecorded.contains(&event.host_id) {
                tracing::info!(
                    host_id = %event.host_id,
                    online = event.online,
                    "host {}",
                    if event.online { "came online" } else { "went offline" }
                );
            }
        }

        let samples = self.store.insert_samples(&plan.samples);
        log_failures("sample", &samples);

        let updates: Vec<HostUpdate> = plan
            .updates
            .into_iter()
            .map(|mut update| {
                if unrecorded.contains(&update.host_id) {
                    let before = previous.get(&update.host_id).cloned().unwrap_or_default();
                    update.state.is_online = before.is_online;
                    update.state.last_transition_at = before.last_transition_at;
                }
                update
            })
            .collect();
        let hosts = self.store.update_hosts(&updates);
        log_failures("host state", &hosts);

        TickReport {
            at,
            probed: plan.samples.len(),
            online: plan.samples.iter().filter(|s| s.alive).count(),
            transitions: events.written,
            failures: events.failures.len() + samples.failures.len() + hosts.failures.len(),
        }
    }
}

fn log_failures(kind: &str, outcome: &BatchOutcome) {
    for failure in &outcome.failures {
        tracing::warn!(
            host_id = %failure.host_id,
            error = %failure.error,
            kind,
            "PartialWriteFailure: {kind} write skipped"
        );
    }
}
