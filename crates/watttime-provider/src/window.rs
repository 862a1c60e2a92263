//! Pure forecast-window selection.
//!
//! Everything here takes `now` explicitly and works on already-fetched
//! points, so the selection rules are testable without a backend.

use chrono::{DateTime, Duration, Utc};

use crate::ForecastPoint;
use carbon_core::SLOT_MINUTES;

/// A point time further than this past `now` is a forecast lookup
pub const FUTURE_TOLERANCE_MINUTES: i64 = 2;

/// Longest horizon requested for a future point lookup (7 days)
pub const MAX_POINT_HORIZON_HOURS: i64 = 168;

/// Default horizon for a future point lookup
pub const MIN_POINT_HORIZON_HOURS: i64 = 24;

pub fn is_future(at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    at > now + Duration::minutes(FUTURE_TOLERANCE_MINUTES)
}

/// Whole hours covering `span`, rounded up; 0 for non-positive spans
fn ceil_hours(span: Duration) -> i64 {
    let ms = span.num_milliseconds();
    if ms <= 0 {
        0
    } else {
        (ms + 3_599_999) / 3_600_000
    }
}

fn to_hours(h: i64) -> u32 {
    u32::try_from(h.max(1)).unwrap_or(u32::MAX)
}

/// Horizon for a point query at `at`
pub fn point_horizon_hours(at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    if !is_future(at, now) {
        return 1;
    }
    let needed = (ceil_hours(at - now) + 1).clamp(1, MAX_POINT_HORIZON_HOURS);
    to_hours(needed.max(MIN_POINT_HORIZON_HOURS))
}

/// Horizon covering `[now, target]`; uncapped
pub fn best_until_horizon_hours(target: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    to_hours(ceil_hours(target - now))
}

pub fn batch_now_horizon_hours(minutes: u32) -> u32 {
    to_hours(ceil_hours(Duration::minutes(i64::from(minutes))))
}

pub fn batch_window_horizon_hours(until: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    to_hours(ceil_hours(until - now))
}

fn sorted(points: &[ForecastPoint]) -> Vec<ForecastPoint> {
    let mut ordered = points.to_vec();
    ordered.sort_by_key(|p| p.start);
    ordered
}

/// Point for a lookup at `at`.
///
/// Future lookups take the interval covering `at`, else the first one
/// starting after it. Otherwise the earliest point stands in for "now".
pub fn point_at(
    points: &[ForecastPoint],
    at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<ForecastPoint> {
    let ordered = sorted(points);
    if !is_future(at, now) {
        return ordered.first().copied();
    }
    ordered
        .iter()
        .find(|p| p.start <= at && at < p.end)
        .or_else(|| ordered.iter().find(|p| p.start > at))
        .copied()
}

/// Minimum-value point starting at or before `target`; earliest wins ties
pub fn best_until(points: &[ForecastPoint], target: DateTime<Utc>) -> Option<ForecastPoint> {
    sorted(points)
        .into_iter()
        .filter(|p| p.start <= target)
        .fold(None, |best: Option<ForecastPoint>, p| match best {
            Some(b) if b.value <= p.value => Some(b),
            _ => Some(p),
        })
}

/// Mean of the intervals overlapping `[now, now + minutes]`
pub fn batch_average(points: &[ForecastPoint], now: DateTime<Utc>, minutes: u32) -> Option<f64> {
    if minutes == 0 {
        return None;
    }
    let window_end = now + Duration::minutes(i64::from(minutes));
    let values: Vec<f64> = points
        .iter()
        .filter(|p| p.start < window_end && p.end > now)
        .map(|p| p.value)
        .collect();
    mean(&values)
}

/// Clamp a schedule window: `from` not before `now`, `until` after `from`
pub fn clamp_window(
    now: DateTime<Utc>,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = from.max(now);
    let until = if until > from {
        until
    } else {
        from + Duration::minutes(SLOT_MINUTES)
    };
    (from, until)
}

/// Lowest-mean window of `minutes` fitting in `[from, until]` (already clamped).
///
/// A window is `ceil(minutes / 5)` consecutive points whose starts are
/// exactly 5 minutes apart; a gap in the series breaks the window. Returns
/// the mean and the window start; the earliest window wins ties.
pub fn best_batch_window(
    points: &[ForecastPoint],
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    minutes: u32,
) -> Option<(f64, DateTime<Utc>)> {
    if minutes == 0 {
        return None;
    }
    let slots = (minutes as usize).div_ceil(SLOT_MINUTES as usize);
    let span = Duration::minutes(i64::from(minutes));
    let step = Duration::minutes(SLOT_MINUTES);

    let ordered: Vec<ForecastPoint> = sorted(points)
        .into_iter()
        .filter(|p| p.start >= from)
        .collect();

    let mut best: Option<(f64, DateTime<Utc>)> = None;
    for window in ordered.windows(slots) {
        let start = window[0].start;
        if start + span > until {
            continue;
        }
        if window.windows(2).any(|pair| pair[1].start - pair[0].start != step) {
            continue;
        }
        let values: Vec<f64> = window.iter().map(|p| p.value).collect();
        let Some(avg) = mean(&values) else { continue };
        if best.map_or(true, |(b, _)| avg < b) {
            best = Some((avg, start));
        }
    }
    best
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
