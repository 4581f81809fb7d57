//! Uptime: status-interval reconstruction from ping samples
//!
//! Turns a chronological series of up/down samples into run-length
//! intervals. The most recent interval is open and extends to the
//! evaluation instant, so it is recomputed on every query.

use crate::types::{percentage, Status, StatusSample};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// A maximal run of samples with the same status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusInterval {
    pub entity_key: String,
    pub status: Status,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub duration_ms: i64,
    /// True for the open interval ending at "now"
    pub current: bool,
}

impl StatusInterval {
    fn open(sample: &StatusSample) -> Self {
        Self {
            entity_key: sample.entity_key.clone(),
            status: Status::from_up(sample.is_up),
            from: sample.at,
            to: sample.at,
            duration_ms: 0,
            current: false,
        }
    }

    fn close_at(&mut self, to: DateTime<Utc>) {
        self.to = to;
        self.duration_ms = (to - self.from).num_milliseconds();
    }

    pub fn duration(&self) -> Duration {
        Duration::milliseconds(self.duration_ms)
    }
}

/// Rebuild up/down intervals for one entity.
///
/// `samples` must be in ascending `at` order; ties keep their input order.
/// Samples before `window_start` are ignored. The result is ordered most
/// recent first and the first element (if any) is the open interval ending
/// at `now`. A `now` earlier than that interval's start gives it a zero
/// duration.
pub fn reconstruct(
    samples: &[StatusSample],
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<StatusInterval> {
    let mut intervals: Vec<StatusInterval> = Vec::new();

    for sample in samples.iter().filter(|s| s.at >= window_start) {
        let status = Status::from_up(sample.is_up);
        match intervals.last_mut() {
            Some(open) if open.status == status => continue,
            Some(open) => open.close_at(sample.at),
            None => {}
        }
        intervals.push(StatusInterval::open(sample));
    }

    if let Some(last) = intervals.last_mut() {
        let end = now.max(last.from);
        last.close_at(end);
        last.current = true;
    }

    intervals.reverse();
    intervals
}

/// Share of time up vs. down over a set of intervals, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimeInStatus {
    pub up_ms: i64,
    pub down_ms: i64,
}

impl TimeInStatus {
    pub fn from_intervals(intervals: &[StatusInterval]) -> Self {
        intervals.iter().fold(Self::default(), |mut acc, i| {
            match i.status {
                Status::Up => acc.up_ms += i.duration_ms,
                Status::Down => acc.down_ms += i.duration_ms,
            }
            acc
        })
    }
}

/// Uptime and downtime percentages from packet counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UptimeSummary {
    pub uptime_pct: Decimal,
    pub downtime_pct: Decimal,
}

/// `uptime = received * 100 / sent`, `downtime = 100 - uptime`.
/// With nothing sent there is no data and both are 0. `received` is
/// clamped to `0..=sent`, so uptime stays within 0..=100.
pub fn uptime_summary(packets_sent: i64, packets_received: i64) -> UptimeSummary {
    if packets_sent <= 0 {
        return UptimeSummary {
            uptime_pct: Decimal::ZERO,
            downtime_pct: Decimal::ZERO,
        };
    }
    let received = packets_received.clamp(0, packets_sent);
    let uptime_pct = percentage(Decimal::from(received), Decimal::from(packets_sent));
    UptimeSummary {
        uptime_pct,
        downtime_pct: Decimal::ONE_HUNDRED - uptime_pct,
    }
}
