/**
 * UPTIME AGGREGATOR
 *
 * ROLE: answers availability questions from committed data only.
 * - range query: exact sweep over the transition log for one host
 * - fleet ranking: one window `[start(today - D), now)` for every host;
 *   finished days come from daily rollups where a row exists, the remaining
 *   days and the partial current day from the same sweep over the raw log
 *
 * Every read is a by-value snapshot from the store, so queries never hold a
 * lock across computation and run concurrently with ticks and rollups.
 */

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{Date, Duration, OffsetDateTime, UtcOffset};

use crate::directory::{DirectoryError, HostDirectory};
use crate::models::{day_bounds, DowntimeEntry, HostId, LiveState, UptimeSummary};
use crate::store::{SharedStore, StoreError};
use crate::sweep::{initial_state, sweep, Coverage};

pub const MAX_WINDOW_DAYS: u32 = 90;
pub const MAX_RANKING_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("host {0} not found")]
    NotFound(HostId),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "query failed reading the event store");
        QueryError::Internal(e.to_string())
    }
}

impl From<DirectoryError> for QueryError {
    fn from(e: DirectoryError) -> Self {
        tracing::error!(error = %e, "query failed reading the host directory");
        QueryError::Internal(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DowntimeReport {
    #[serde(with = "time::serde::rfc3339")]
    pub from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub to: OffsetDateTime,
    pub days: u32,
    pub items: Vec<DowntimeEntry>,
}

pub struct UptimeAggregator {
    store: SharedStore,
    directory: Arc<dyn HostDirectory>,
}

impl UptimeAggregator {
    pub fn new(store: SharedStore, directory: Arc<dyn HostDirectory>) -> Self {
        Self { store, directory }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn directory(&self) -> &Arc<dyn HostDirectory> {
        &self.directory
    }

    /// Coverage of `[from, to)` for one host. `live` only decides the state
    /// at `from` for a host whose log is empty.
    pub fn host_window(
        &self,
        host_id: &HostId,
        from: OffsetDateTime,
        to: OffsetDateTime,
        live: Option<&LiveState>,
    ) -> Result<Coverage, StoreError> {
        let last_before = self.store.last_transition_at_or_before(host_id, from)?;
        let events = self.store.transitions_in_range(host_id, from, to)?;
        let first_after = match (&last_before, events.first()) {
            (Some(_), _) => None,
            (None, Some(first)) => Some(first.clone()),
            (None, None) => self.store.first_transition_after(host_id, from)?,
        };
        let state0 = initial_state(last_before.as_ref(), first_after.as_ref(), live);
        Ok(sweep(state0, &events, from, to))
    }

    pub fn range_uptime(&self, host_id: &HostId, from: OffsetDateTime, to: OffsetDateTime) -> Result<UptimeSummary, QueryError> {
        if to <= from {
            return Err(QueryError::InvalidRange("`to` must be after `from`".into()));
        }

        let states = self.store.host_states()?;
        let live = states.get(host_id);
        if live.is_none() && self.directory.find_host(host_id.as_str())?.is_none() {
            return Err(QueryError::NotFound(host_id.clone()));
        }

        Ok(self.host_window(host_id, from, to, live)?.summary())
    }

    /// Ranks the directory's hosts by downtime over the last `days` UTC days.
    pub fn top_downtime(&self, days: u32, limit: usize, now: OffsetDateTime) -> Result<DowntimeReport, QueryError> {
        if !(1..=MAX_WINDOW_DAYS).contains(&days) {
            return Err(QueryError::InvalidRange(format!("days must be within 1..={MAX_WINDOW_DAYS}")));
        }
        if !(1..=MAX_RANKING_LIMIT).contains(&limit) {
            return Err(QueryError::InvalidRange(format!("limit must be within 1..={MAX_RANKING_LIMIT}")));
        }

        let now = now.to_offset(UtcOffset::UTC);
        let today = now.date();
        let first_day = today - Duration::days(i64::from(days));
        let (window_start, _) = day_bounds(first_day);

        // today is never rolled up, so only finished days can come from rollups
        let mut rolled: HashMap<HostId, HashMap<Date, (i64, i64)>> = HashMap::new();
        for row in self.store.rollups_in_range(first_day, today - Duration::DAY)? {
            rolled.entry(row.host_id).or_default().insert(row.day, (row.online_ms, row.offline_ms));
        }

        let states = self.store.host_states()?;
        let hosts = self.directory.list_hosts()?;
        let no_rollups = HashMap::new();

        let mut items = Vec::with_capacity(hosts.len());
        for host in hosts {
            let rows = rolled.get(&host.id).unwrap_or(&no_rollups);
            let (uptime_ms, downtime_ms) = self.window_totals(&host.id, rows, first_day, now, states.get(&host.id))?;
            items.push(DowntimeEntry {
                host_id: host.id,
                name: host.display_name,
                address: host.address,
                uptime_ms,
                downtime_ms,
            });
        }

        items.sort_by(|a, b| b.downtime_ms.cmp(&a.downtime_ms).then_with(|| a.host_id.cmp(&b.host_id)));
        items.truncate(limit);

        Ok(DowntimeReport { from: window_start, to: now, days, items })
    }

    /// Online and offline ms over `[start(first_day), now)`. Rolled-up days
    /// contribute their row; every run of days without one, and the current
    /// partial day, is swept from the raw log.
    fn window_totals(
        &self,
        host_id: &HostId,
        rows: &HashMap<Date, (i64, i64)>,
        first_day: Date,
        now: OffsetDateTime,
        live: Option<&LiveState>,
    ) -> Result<(i64, i64), StoreError> {
        let (mut online, mut offline) = (0i64, 0i64);
        let mut gap_start: Option<OffsetDateTime> = None;
        let mut day = first_day;

        while day < now.date() {
            let (day_start, _) = day_bounds(day);
            match rows.get(&day) {
                Some(&(on, off)) => {
                    if let Some(from) = gap_start.take() {
                        let coverage = self.host_window(host_id, from, day_start, live)?;
                        online += coverage.online_ms();
                        offline += coverage.offline_ms();
                    }
                    online += on;
                    offline += off;
                }
                None => {
                    gap_start.get_or_insert(day_start);
                }
            }
            day += Duration::DAY;
        }

        let from = gap_start.unwrap_or_else(|| day_bounds(now.date()).0);
        let coverage = self.host_window(host_id, from, now, live)?;
        Ok((online + coverage.online_ms(), offline + coverage.offline_ms()))
    }
}

/// Parses an RFC 3339 window. A missing `to` means `now`.
pub fn parse_range(from: Option<&str>, to: Option<&str>, now: OffsetDateTime) -> Result<(OffsetDateTime, OffsetDateTime), QueryError> {
    let from = from
        .filter(|raw| !raw.trim().is_empty())
        .ok_or_else(|| QueryError::InvalidRange("`from` is required".into()))?;
    let from = parse_instant("from", from)?;
    let to = match to.filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => parse_instant("to", raw)?,
        None => now,
    };
    if to <= from {
        return Err(QueryError::InvalidRange("`to` must be after `from`".into()));
    }
    Ok((from.to_offset(UtcOffset::UTC), to.to_offset(UtcOffset::UTC)))
}

fn parse_instant(name: &str, raw: &str) -> Result<OffsetDateTime, QueryError> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339).map_err(|e| QueryError::InvalidRange(format!("`{name}` is not an RFC 3339 timestamp: {e}")))
}
