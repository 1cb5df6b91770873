//! Periodic purge of old probe samples.
//!
//! Samples exist for diagnostics only, so dropping them never affects
//! availability figures. Transitions and rollups are kept forever.

use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};
use tokio_util::sync::CancellationToken;

use crate::store::{SharedStore, StoreError};

/// Deletes samples older than `retention_days` before `now`.
pub fn purge_once(store: &SharedStore, retention_days: i64, now: OffsetDateTime) -> Result<usize, StoreError> {
    let cutoff = now - Duration::days(retention_days);
    store.purge_samples_before(cutoff)
}

/// Runs the purge every `every` until `cancel` is triggered.
pub async fn run(store: SharedStore, retention_days: i64, every: StdDuration, cancel: CancellationToken) {
    tracing::info!(retention_days, interval_secs = every.as_secs(), "sample retention job started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("sample retention job stopping");
                break;
            }
            _ = interval.tick() => {
                // the journal rewrites its sample file, keep that off the async workers
                let store = store.clone();
                let purged = tokio::task::spawn_blocking(move || purge_once(&store, retention_days, OffsetDateTime::now_utc())).await;
                match purged {
                    Ok(Ok(0)) => tracing::debug!("sample retention: nothing to purge"),
                    Ok(Ok(deleted)) => tracing::info!(deleted, "sample retention: purged old samples"),
                    Ok(Err(e)) => tracing::error!(error = %e, "sample retention: purge failed"),
                    Err(e) => tracing::error!(error = %e, "sample retention: purge task failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProbeSample;
    use crate::store::{EventStore, MemoryStore};
    use std::sync::Arc;
    use time::macros::datetime;

    #[test]
    fn test_purge_keeps_recent_samples() {
        let memory = Arc::new(MemoryStore::new());
        let store: SharedStore = memory.clone();
        let sample = |at| ProbeSample { host_id: "a".into(), at, alive: true, latency_ms: Some(2.0) };
        memory.insert_samples(&[
            sample(datetime!(2024-01-01 00:00 UTC)),
            sample(datetime!(2024-01-20 00:00 UTC)),
            sample(datetime!(2024-02-01 00:00 UTC)),
        ]);

        let deleted = purge_once(&store, 30, datetime!(2024-02-10 00:00 UTC)).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(memory.sample_count(), 2);
    }
}
