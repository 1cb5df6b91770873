//! Interval sweep over a host's transition log.
//!
//! This is the only place online time is accumulated. Range queries, the
//! fleet ranking fallback and the daily rollup all call [`sweep`], which is
//! what makes rollup sums and on-demand results agree.

use crate::models::{whole_ms, LiveState, TransitionEvent, UptimeSummary};
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coverage {
    pub online: Duration,
    pub offline: Duration,
    /// Events that fell inside the window.
    pub transitions: u32,
}

impl Coverage {
    pub fn total(&self) -> Duration {
        self.online + self.offline
    }

    pub fn online_ms(&self) -> i64 {
        whole_ms(self.online)
    }

    /// Derived from the total so `online_ms + offline_ms == total_ms` holds
    /// after truncation too.
    pub fn offline_ms(&self) -> i64 {
        whole_ms(self.total()) - self.online_ms()
    }

    pub fn percentage(&self) -> f64 {
        percentage(self.online_ms(), whole_ms(self.total()))
    }

    pub fn summary(&self) -> UptimeSummary {
        UptimeSummary {
            uptime_ms: self.online_ms(),
            downtime_ms: self.offline_ms(),
            percentage: self.percentage(),
        }
    }
}

/// `online / total * 100`, rounded to 3 decimals; 0 for an empty window.
pub fn percentage(online_ms: i64, total_ms: i64) -> f64 {
    if total_ms <= 0 {
        return 0.0;
    }
    let pct = online_ms as f64 / total_ms as f64 * 100.0;
    (pct * 1000.0).round() / 1000.0
}

/// State at the window start.
///
/// The last event at or before the start wins. Without one, the host's first
/// later event fixes it: events are only written on change, so the host was
/// in the opposite state until then. A host with no events at all falls back
/// to its live state, else offline.
pub fn initial_state(last_before: Option<&TransitionEvent>, first_after: Option<&TransitionEvent>, live: Option<&LiveState>) -> bool {
    match (last_before, first_after, live) {
        (Some(event), _, _) => event.online,
        (None, Some(next), _) => !next.online,
        (None, None, Some(state)) => state.is_online,
        (None, None, None) => false,
    }
}

/// Accumulates online time over `[from, to)`.
///
/// `events` must be ascending by `at`; events outside the window are ignored.
/// An empty or inverted window yields an all-zero coverage.
pub fn sweep(state0: bool, events: &[TransitionEvent], from: OffsetDateTime, to: OffsetDateTime) -> Coverage {
    if to <= from {
        return Coverage::default();
    }

    let mut cursor = from;
    let mut online = state0;
    let mut up = Duration::ZERO;
    let mut transitions = 0u32;

    for event in events {
        if event.at < from || event.at >= to {
            continue;
        }
        let t = event.at.min(to);
        if online {
            up += t - cursor;
        }
        online = event.online;
        cursor = t;
        transitions += 1;
    }

    if cursor < to && online {
        up += to - cursor;
    }

    Coverage {
        online: up,
        offline: (to - from) - up,
        transitions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn ev(at: OffsetDateTime, online: bool) -> TransitionEvent {
        TransitionEvent { host_id: "h".into(), at, online }
    }

    #[test]
    fn test_single_drop_inside_window() {
        let from = datetime!(2024-01-01 00:00 UTC);
        let to = datetime!(2024-01-01 00:10 UTC);
        let cov = sweep(true, &[ev(datetime!(2024-01-01 00:04 UTC), false)], from, to);
        assert_eq!(cov.online, Duration::minutes(4));
        assert_eq!(cov.offline, Duration::minutes(6));
        assert_eq!(cov.percentage(), 40.0);
        assert_eq!(cov.transitions, 1);
    }

    #[test]
    fn test_no_events_uses_initial_state_for_whole_window() {
        let from = datetime!(2024-01-01 00:00 UTC);
        let to = datetime!(2024-01-01 01:00 UTC);
        assert_eq!(sweep(true, &[], from, to).percentage(), 100.0);
        let down = sweep(false, &[], from, to);
        assert_eq!(down.online, Duration::ZERO);
        assert_eq!(down.percentage(), 0.0);
    }

    #[test]
    fn test_empty_window_is_zero() {
        let t = datetime!(2024-01-01 00:00 UTC);
        let cov = sweep(true, &[], t, t);
        assert_eq!(cov, Coverage::default());
        assert_eq!(cov.percentage(), 0.0);
        assert_eq!(sweep(true, &[], t, t - Duration::HOUR), Coverage::default());
    }

    #[test]
    fn test_events_outside_window_are_ignored() {
        let from = datetime!(2024-01-01 10:00 UTC);
        let to = datetime!(2024-01-01 11:00 UTC);
        let events = [
            ev(datetime!(2024-01-01 09:00 UTC), false),
            ev(datetime!(2024-01-01 10:30 UTC), false),
            ev(datetime!(2024-01-01 11:00 UTC), true),
        ];
        let cov = sweep(true, &events, from, to);
        assert_eq!(cov.online, Duration::minutes(30));
        assert_eq!(cov.transitions, 1);
    }

    #[test]
    fn test_event_at_window_start_overrides_initial_state() {
        let from = datetime!(2024-01-01 00:00 UTC);
        let to = datetime!(2024-01-01 02:00 UTC);
        let cov = sweep(false, &[ev(from, true)], from, to);
        assert_eq!(cov.online, Duration::HOUR * 2);
    }

    #[test]
    fn test_initial_state_fallback_chain() {
        let live_up = LiveState { is_online: true, ..Default::default() };
        let went_down = ev(datetime!(2024-01-01 00:00 UTC), false);
        let came_up = ev(datetime!(2024-01-02 08:00 UTC), true);
        assert!(!initial_state(Some(&went_down), Some(&came_up), Some(&live_up)));
        // a later event outranks whatever the host looks like today
        assert!(!initial_state(None, Some(&came_up), Some(&live_up)));
        assert!(initial_state(None, Some(&went_down), None));
        assert!(initial_state(None, None, Some(&live_up)));
        assert!(!initial_state(None, None, None));
    }

    #[test]
    fn test_durations_always_sum_to_window() {
        // deterministic pseudo-random event sequences
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };
        let base = datetime!(2024-01-01 00:00 UTC);
        for _ in 0..200 {
            let mut events = Vec::new();
            let mut t = base;
            let mut state = next() % 2 == 0;
            for _ in 0..(next() % 12) {
                t += Duration::seconds((next() % 5_000) as i64 + 1);
                state = !state;
                events.push(ev(t, state));
            }
            let from = base + Duration::seconds((next() % 20_000) as i64);
            let to = from + Duration::seconds((next() % 40_000) as i64);
            let cov = sweep(next() % 2 == 0, &events, from, to);
            let total = if to > from { to - from } else { Duration::ZERO };
            assert_eq!(cov.online + cov.offline, total);
            assert_eq!(cov.online_ms() + cov.offline_ms(), whole_ms(total));
            assert!(cov.online >= Duration::ZERO && cov.offline >= Duration::ZERO);
        }
    }

    #[test]
    fn test_percentage_rounds_to_three_decimals() {
        assert_eq!(percentage(1, 3), 33.333);
        assert_eq!(percentage(2, 3), 66.667);
        assert_eq!(percentage(5, 0), 0.0);
    }
}
