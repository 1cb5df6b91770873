//! File-backed store: a `MemoryStore` whose writes are journaled under
//! `data_dir` and replayed at boot.
//!
//! Layout:
//! - `transitions.jsonl` append-only, one event per line
//! - `samples.jsonl`     append-only, rewritten on purge
//! - `rollups.jsonl`     append-only upserts, last line per (host, day) wins
//! - `hosts.json`        live state snapshot, replaced atomically
//!
//! Files are streamed line by line on load; a torn last line (crash
//! mid-write) is skipped.

use super::memory::MemoryStore;
use super::{BatchOutcome, EventStore, StoreError};
use crate::models::{DailyRollup, HostId, HostUpdate, LiveState, ProbeSample, TransitionEvent};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use time::{Date, OffsetDateTime};

const TRANSITIONS_FILE: &str = "transitions.jsonl";
const SAMPLES_FILE: &str = "samples.jsonl";
const ROLLUPS_FILE: &str = "rollups.jsonl";
const HOSTS_FILE: &str = "hosts.json";

pub struct JournalStore {
    memory: MemoryStore,
    dir: PathBuf,
    /// Serializes writers so "check in memory, write to disk, apply" is atomic.
    write_lock: Mutex<()>,
}

impl JournalStore {
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let store = Self {
            memory: MemoryStore::new(),
            dir,
            write_lock: Mutex::new(()),
        };
        store.load_from_disk()?;
        tracing::info!(
            dir = %store.dir.display(),
            transitions = store.memory.transition_count(),
            samples = store.memory.sample_count(),
            "journal store opened"
        );
        Ok(store)
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn load_from_disk(&self) -> Result<(), StoreError> {
        let mut tables = self.memory.tables.write();

        if let Some(hosts) = read_snapshot::<HashMap<HostId, LiveState>>(&self.path(HOSTS_FILE))? {
            tables.hosts = hosts;
        }

        read_lines::<TransitionEvent>(&self.path(TRANSITIONS_FILE), |event| {
            if let Err(e) = tables.push_transition(event) {
                tracing::warn!(error = %e, "skipping journaled transition");
            }
        })?;

        let line_count = read_lines::<DailyRollup>(&self.path(ROLLUPS_FILE), |row| tables.put_rollup(row))?;

        read_lines::<ProbeSample>(&self.path(SAMPLES_FILE), |sample| tables.push_sample(sample))?;

        // compact rollups once superseded rows pile up
        if tables.rollups.len() < line_count {
            let rows: Vec<&DailyRollup> = tables.rollups.values().collect();
            rewrite_lines(&self.path(ROLLUPS_FILE), &rows)?;
            tracing::debug!(kept = rows.len(), dropped = line_count - rows.len(), "compacted rollup journal");
        }
        Ok(())
    }

    fn append<T: Serialize>(&self, file: &str, rows: &[T]) -> Result<(), StoreError> {
        let mut buf = String::new();
        for row in rows {
            buf.push_str(&serde_json::to_string(row)?);
            buf.push('\n');
        }
        let mut f = OpenOptions::new().create(true).append(true).open(self.path(file))?;
        f.write_all(buf.as_bytes())?;
        Ok(())
    }
}

impl EventStore for JournalStore {
    fn host_states(&self) -> Result<HashMap<HostId, LiveState>, StoreError> {
        self.memory.host_states()
    }

    fn update_hosts(&self, updates: &[HostUpdate]) -> BatchOutcome {
        let _guard = self.write_lock.lock();
        let mut next: BTreeMap<HostId, LiveState> = self.memory.tables.read().hosts.clone().into_iter().collect();
        for update in updates {
            next.insert(update.host_id.clone(), update.state.clone());
        }
        if let Err(e) = write_snapshot(&self.path(HOSTS_FILE), &next) {
            tracing::error!(error = %e, "failed to persist host states");
            return BatchOutcome::all_failed(updates.iter().map(|u| u.host_id.clone()), &e.to_string());
        }
        self.memory.update_hosts(updates)
    }

    fn insert_transitions(&self, events: &[TransitionEvent]) -> BatchOutcome {
        let _guard = self.write_lock.lock();
        let mut outcome = BatchOutcome::default();
        for event in events {
            let checked = self.memory.tables.read().check_transition(event);
            let result = checked
                .and_then(|()| self.append(TRANSITIONS_FILE, std::slice::from_ref(event)))
                .and_then(|()| self.memory.tables.write().push_transition(event.clone()));
            outcome.record(&event.host_id, result);
        }
        outcome
    }

    fn insert_samples(&self, samples: &[ProbeSample]) -> BatchOutcome {
        if samples.is_empty() {
            return BatchOutcome::default();
        }
        let _guard = self.write_lock.lock();
        if let Err(e) = self.append(SAMPLES_FILE, samples) {
            tracing::error!(error = %e, "failed to journal probe samples");
            return BatchOutcome::all_failed(samples.iter().map(|s| s.host_id.clone()), &e.to_string());
        }
        self.memory.insert_samples(samples)
    }

    fn last_transition_at_or_before(&self, host_id: &HostId, t: OffsetDateTime) -> Result<Option<TransitionEvent>, StoreError> {
        self.memory.last_transition_at_or_before(host_id, t)
    }

    fn first_transition_after(&self, host_id: &HostId, t: OffsetDateTime) -> Result<Option<TransitionEvent>, StoreError> {
        self.memory.first_transition_after(host_id, t)
    }

    fn transitions_in_range(&self, host_id: &HostId, from: OffsetDateTime, to: OffsetDateTime) -> Result<Vec<TransitionEvent>, StoreError> {
        self.memory.transitions_in_range(host_id, from, to)
    }

    fn upsert_rollup(&self, rollup: &DailyRollup) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        self.append(ROLLUPS_FILE, std::slice::from_ref(rollup))?;
        self.memory.upsert_rollup(rollup)
    }

    fn rollups_in_range(&self, from_day: Date, to_day: Date) -> Result<Vec<DailyRollup>, StoreError> {
        self.memory.rollups_in_range(from_day, to_day)
    }

    fn samples_for_host(&self, host_id: &HostId, limit: usize) -> Result<Vec<ProbeSample>, StoreError> {
        self.memory.samples_for_host(host_id, limit)
    }

    fn purge_samples_before(&self, cutoff: OffsetDateTime) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let kept: Vec<ProbeSample> = {
            let tables = self.memory.tables.read();
            tables.samples.values().flatten().filter(|s| s.at >= cutoff).cloned().collect()
        };
        rewrite_lines(&self.path(SAMPLES_FILE), &kept)?;
        self.memory.purge_samples_before(cutoff)
    }
}

fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&content)?))
}

/// Streams one JSON value per line into `apply`, returning how many parsed.
fn read_lines<T: DeserializeOwned>(path: &Path, mut apply: impl FnMut(T)) -> Result<usize, StoreError> {
    if !path.exists() {
        return Ok(0);
    }
    let reader = BufReader::new(File::open(path)?);
    let mut parsed = 0;
    for (n, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!(file = %path.display(), line = n + 1, error = %e, "skipping undecodable journal line");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(row) => {
                apply(row);
                parsed += 1;
            }
            Err(e) => tracing::warn!(file = %path.display(), line = n + 1, error = %e, "skipping malformed journal line"),
        }
    }
    Ok(parsed)
}

fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn rewrite_lines<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), StoreError> {
    let mut buf = String::new();
    for row in rows {
        buf.push_str(&serde_json::to_string(row)?);
        buf.push('\n');
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, buf)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn test_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let host: HostId = "nas".into();
        {
            let store = JournalStore::open(dir.path()).unwrap();
            let t1 = datetime!(2024-05-01 08:00 UTC);
            let t2 = datetime!(2024-05-01 18:00 UTC);
            assert!(store
                .insert_transitions(&[
                    TransitionEvent { host_id: host.clone(), at: t1, online: true },
                    TransitionEvent { host_id: host.clone(), at: t2, online: false },
                ])
                .is_clean());
            store.update_hosts(&[HostUpdate {
                host_id: host.clone(),
                state: LiveState { is_online: false, last_probe_at: Some(t2), last_transition_at: Some(t2) },
            }]);
            store.insert_samples(&[ProbeSample { host_id: host.clone(), at: t2, alive: false, latency_ms: None }]);
            let row = DailyRollup {
                host_id: host.clone(),
                day: date!(2024 - 05 - 01),
                online_ms: 1,
                offline_ms: 2,
                transition_count: 2,
            };
            store.upsert_rollup(&row).unwrap();
            store.upsert_rollup(&DailyRollup { online_ms: 36_000_000, offline_ms: 50_400_000, ..row }).unwrap();
        }

        let reopened = JournalStore::open(dir.path()).unwrap();
        let events = reopened
            .transitions_in_range(&host, datetime!(2024-05-01 00:00 UTC), datetime!(2024-05-02 00:00 UTC))
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(!reopened.host_states().unwrap()[&host].is_online);
        assert_eq!(reopened.samples_for_host(&host, 10).unwrap().len(), 1);

        let rollups = reopened.rollups_in_range(date!(2024 - 05 - 01), date!(2024 - 05 - 01)).unwrap();
        assert_eq!(rollups.len(), 1);
        assert_eq!(rollups[0].online_ms, 36_000_000);

        // superseded rollup line was compacted away
        let lines = fs::read_to_string(dir.path().join(ROLLUPS_FILE)).unwrap();
        assert_eq!(lines.lines().count(), 1);
    }

    #[test]
    fn test_torn_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(TRANSITIONS_FILE),
            "{\"host_id\":\"a\",\"at\":\"2024-01-01T00:00:00Z\",\"online\":true}\n{\"host_id\":\"a\",\"at\":",
        )
        .unwrap();
        let store = JournalStore::open(dir.path()).unwrap();
        let last = store.last_transition_at_or_before(&"a".into(), datetime!(2024-02-01 00:00 UTC)).unwrap();
        assert!(last.unwrap().online);
    }

    #[test]
    fn test_out_of_order_is_rejected_and_not_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::open(dir.path()).unwrap();
        let t = datetime!(2024-01-01 12:00 UTC);
        let outcome = store.insert_transitions(&[
            TransitionEvent { host_id: "a".into(), at: t, online: true },
            TransitionEvent { host_id: "a".into(), at: t, online: false },
        ]);
        assert_eq!(outcome.written, 1);
        assert_eq!(outcome.failures.len(), 1);
        let lines = fs::read_to_string(dir.path().join(TRANSITIONS_FILE)).unwrap();
        assert_eq!(lines.lines().count(), 1);
    }

    #[test]
    fn test_purge_rewrites_sample_journal() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::open(dir.path()).unwrap();
        store.insert_samples(&[
            ProbeSample { host_id: "a".into(), at: datetime!(2024-01-01 00:00 UTC), alive: true, latency_ms: Some(1.5) },
            ProbeSample { host_id: "b".into(), at: datetime!(2024-01-01 00:00 UTC), alive: false, latency_ms: None },
            ProbeSample { host_id: "a".into(), at: datetime!(2024-03-01 00:00 UTC), alive: true, latency_ms: Some(2.0) },
            ProbeSample { host_id: "b".into(), at: datetime!(2024-03-01 00:00 UTC), alive: false, latency_ms: None },
        ]);
        assert_eq!(store.purge_samples_before(datetime!(2024-02-01 00:00 UTC)).unwrap(), 2);
        let reopened = JournalStore::open(dir.path()).unwrap();
        assert_eq!(reopened.memory.sample_count(), 2);
        let a = reopened.samples_for_host(&"a".into(), 10).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].at, datetime!(2024-03-01 00:00 UTC));
        assert!(!reopened.samples_for_host(&"b".into(), 10).unwrap()[0].alive);
    }
}
