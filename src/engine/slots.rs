use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::model::*;

use super::calendar::{effective_open_spans, local_date};

// ── Slot generation ───────────────────────────────────────────────

/// Bookable slots of `cfg` inside `window`, ordered by start and unique by start.
///
/// Pure: everything time-dependent comes in through `now`. `occupied` must
/// cover the window widened by a day on each side so daily capacity and
/// buffers see intervals just outside it.
pub fn generate_slots(
    cfg: &ResourceConfig,
    calendar: &Calendar,
    occupied: &[Occupied],
    window: &Span,
    now: Ms,
) -> Vec<Span> {
    if !cfg.is_active || cfg.slot_granularity == 0 || cfg.duration == 0 {
        return Vec::new();
    }

    let tz = cfg.tz();
    let notice = now + cfg.min_notice_ms();
    let horizon = cfg.horizon(now);
    let blocked = blocked_spans(occupied, cfg.concurrent_capacity);
    let duration = cfg.duration_ms();
    let step = cfg.granularity_ms();
    let before = cfg.buffer_before_ms();
    let after = cfg.buffer_after_ms();

    let mut slots = Vec::new();
    let last = local_date(tz, window.end);
    let mut date = local_date(tz, window.start);

    while date <= last {
        if !daily_capacity_reached(cfg, tz, occupied, date, None) {
            for open in effective_open_spans(cfg, calendar, date) {
                let mut cursor = open.start + before;
                while cursor + duration + after <= open.end {
                    let slot = Span::new(cursor, cursor + duration);
                    let offered = cursor >= notice
                        && horizon.is_none_or(|h| cursor <= h)
                        && cursor >= window.start
                        && cursor < window.end;
                    if offered && !overlaps_any(&blocked, &cfg.occupancy_window(&slot)) {
                        slots.push(slot);
                    }
                    cursor += step;
                }
            }
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    slots.sort_by_key(|s| s.start);
    slots.dedup_by_key(|s| s.start);
    slots
}

/// True if bookings and live holds starting on `date` already reach the
/// resource's daily capacity. `exclude` is left out of the count.
pub fn daily_capacity_reached(
    cfg: &ResourceConfig,
    tz: Tz,
    occupied: &[Occupied],
    date: NaiveDate,
    exclude: Option<ulid::Ulid>,
) -> bool {
    let Some(cap) = cfg.daily_capacity else {
        return false;
    };
    let count = occupied
        .iter()
        .filter(|o| o.source != OccupiedSource::External && Some(o.id) != exclude)
        .filter(|o| local_date(tz, o.span.start) == date)
        .count();
    count >= cap as usize
}

/// Spans a candidate occupancy window must not touch: every external event,
/// plus the ranges where bookings and live holds reach `capacity`.
/// Sorted and disjoint.
pub fn blocked_spans(occupied: &[Occupied], capacity: u32) -> Vec<Span> {
    let mut allocs: Vec<Span> = occupied
        .iter()
        .filter(|o| o.source != OccupiedSource::External)
        .map(|o| o.span)
        .collect();
    allocs.sort_by_key(|s| s.start);

    let mut blocked = compute_saturated_spans(&allocs, capacity.max(1));
    blocked.extend(
        occupied
            .iter()
            .filter(|o| o.source == OccupiedSource::External)
            .map(|o| o.span),
    );
    blocked.sort_by_key(|s| s.start);
    merge_overlapping(&blocked)
}

/// Whether `span` intersects any of the sorted, disjoint `blocked` spans.
pub fn overlaps_any(blocked: &[Span], span: &Span) -> bool {
    let idx = blocked.partition_point(|b| b.end <= span.start);
    blocked.get(idx).is_some_and(|b| b.overlaps(span))
}

// ── Interval algebra ──────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Sweep-line algorithm: find time ranges where allocation count >= capacity.
/// Returns sorted, merged spans representing fully-saturated time ranges.
pub fn compute_saturated_spans(allocs: &[Span], capacity: u32) -> Vec<Span> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        return merge_overlapping(allocs);
    }

    // +1 at start, -1 at end; ends sort first so touching spans don't stack.
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result: Vec<Span> = Vec::new();
    let mut count: i64 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        count += *delta as i64;

        if count >= capacity as i64 && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity as i64
            && let Some(start) = saturated_start.take()
            && *time > start {
                result.push(Span::new(start, *time));
            }
    }

    merge_overlapping(&result)
}
