use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::model::*;

/// Longest DST gap we step across when a local time does not exist.
const MAX_GAP_MINUTES: i64 = 180;

/// Local calendar date of an instant in `tz`.
pub fn local_date(tz: Tz, t: Ms) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(t)
        .unwrap_or_default()
        .with_timezone(&tz)
        .date_naive()
}

/// 0 = Sunday .. 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Instant of `minute` minutes after local midnight of `date`.
///
/// Ambiguous local times resolve to the earliest instant; local times inside
/// a DST gap resolve to the first valid instant after them.
pub fn local_to_ms(tz: Tz, date: NaiveDate, minute: u16) -> Option<Ms> {
    let midnight = date.and_time(NaiveTime::MIN);
    let naive = midnight + chrono::Duration::minutes(minute as i64);
    for shift in 0..=MAX_GAP_MINUTES {
        let candidate = naive + chrono::Duration::minutes(shift);
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return Some(dt.timestamp_millis()),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest.timestamp_millis()),
            LocalResult::None => continue,
        }
    }
    None
}

/// Opening hours in effect on `date`, as instants.
///
/// A closed exception wins; otherwise open exceptions replace the weekly
/// rules; otherwise every weekly rule for the weekday applies.
pub fn effective_open_spans(cfg: &ResourceConfig, calendar: &Calendar, date: NaiveDate) -> Vec<Span> {
    let covering: Vec<&CalendarException> = calendar
        .exceptions
        .iter()
        .filter(|e| e.covers(date))
        .collect();

    if covering.iter().any(|e| e.kind == ExceptionKind::Closed) {
        return Vec::new();
    }

    let mut local: Vec<(u16, u16)> = covering
        .iter()
        .filter_map(|e| match e.kind {
            ExceptionKind::Open {
                start_minute,
                end_minute,
            } => Some((start_minute, end_minute)),
            ExceptionKind::Closed => None,
        })
        .collect();

    if local.is_empty() {
        let weekday = weekday_index(date);
        local = calendar
            .working_hours
            .iter()
            .filter(|r| r.weekday == weekday)
            .map(|r| (r.start_minute, r.end_minute))
            .collect();
    }

    let tz = cfg.tz();
    let mut spans: Vec<Span> = local
        .into_iter()
        .filter_map(|(start, end)| {
            let s = local_to_ms(tz, date, start)?;
            let e = local_to_ms(tz, date, end)?;
            (s < e).then(|| Span::new(s, e))
        })
        .collect();
    spans.sort_by_key(|s| s.start);
    spans
}
