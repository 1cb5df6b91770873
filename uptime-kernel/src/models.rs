use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime};

/// Day keys are UTC calendar dates written as `YYYY-MM-DD`.
pub const DAY_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for HostId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One record of the host directory, as handed to a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub id: HostId,
    pub address: String,
    pub display_name: String,
}

impl HostEntry {
    pub fn new(id: impl Into<HostId>, address: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            display_name: display_name.into(),
        }
    }
}

/// Live state of a host, written only by the tick that currently owns it.
/// A host that was never probed counts as offline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveState {
    pub is_online: bool,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_probe_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_transition_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUpdate {
    pub host_id: HostId,
    pub state: LiveState,
}

/// Raw reachability observation, kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSample {
    pub host_id: HostId,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub alive: bool,
    pub latency_ms: Option<f64>,
}

/// Immutable record of an online/offline change. The only source of truth
/// for historical state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub host_id: HostId,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRollup {
    pub host_id: HostId,
    #[serde(with = "day_key")]
    pub day: Date,
    pub online_ms: i64,
    pub offline_ms: i64,
    pub transition_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeSummary {
    pub uptime_ms: i64,
    pub downtime_ms: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DowntimeEntry {
    pub host_id: HostId,
    pub name: String,
    pub address: String,
    pub uptime_ms: i64,
    pub downtime_ms: i64,
}

/// `[start, end)` of a UTC calendar day.
pub fn day_bounds(day: Date) -> (OffsetDateTime, OffsetDateTime) {
    let start = day.midnight().assume_utc();
    (start, start + Duration::DAY)
}

pub fn parse_day(raw: &str) -> Result<Date, time::error::Parse> {
    Date::parse(raw, DAY_FORMAT)
}

pub fn format_day(day: Date) -> String {
    day.format(DAY_FORMAT).unwrap_or_else(|_| day.to_string())
}

pub(crate) fn whole_ms(d: Duration) -> i64 {
    d.whole_milliseconds() as i64
}

mod day_key {
    use super::*;

    pub fn serialize<S: Serializer>(day: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        let text = day.format(DAY_FORMAT).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_day(&text).map_err(serde::de::Error::custom)
    }
}
