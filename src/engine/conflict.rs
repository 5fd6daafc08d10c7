use ulid::Ulid;

use crate::model::*;

use super::calendar::{effective_open_spans, local_date};
use super::slots::{compute_saturated_spans, daily_capacity_reached, overlaps_any};
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Both ends inside the supported timestamp range.
pub(crate) fn validate_bounds(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    validate_bounds(span)?;
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Which occupied intervals a conflict check considers.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ConflictScope {
    /// Bookings, live holds and external events (hold creation).
    Everything,
    /// Bookings and external events only; every hold is ignored, including
    /// the one being confirmed.
    Confirming { hold_id: Ulid },
}

/// Reject a candidate slot that can never be held, independent of occupancy.
pub(crate) fn validate_candidate(
    cfg: &ResourceConfig,
    calendar: &Calendar,
    span: &Span,
    now: Ms,
) -> Result<(), EngineError> {
    validate_span(span)?;
    if span.duration_ms() != cfg.duration_ms() {
        return Err(EngineError::Validation(format!(
            "slot must last exactly {} minutes",
            cfg.duration
        )));
    }
    if span.start < now + cfg.min_notice_ms() {
        return Err(EngineError::Validation(format!(
            "slot starts inside the {}h notice window",
            cfg.min_notice
        )));
    }
    if let Some(horizon) = cfg.horizon(now)
        && span.start > horizon {
            return Err(EngineError::Validation(format!(
                "slot is beyond the {}-day booking window",
                cfg.booking_window
            )));
        }

    let window = cfg.occupancy_window(span);
    let date = local_date(cfg.tz(), span.start);
    let open = effective_open_spans(cfg, calendar, date);
    if !open.iter().any(|o| o.contains_span(&window)) {
        return Err(EngineError::Validation("slot is outside opening hours".into()));
    }
    Ok(())
}

/// Check the buffered candidate window against the resource's occupied intervals.
pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    span: &Span,
    now: Ms,
    scope: ConflictScope,
) -> Result<(), EngineError> {
    let cfg = &rs.config;
    let window = cfg.occupancy_window(span);
    // Widened by a day so the daily count sees every start on the slot's date.
    let search = Span::new(window.start - DAY_MS, window.end + DAY_MS);

    let mut occupied = rs.occupied(&search, now);
    if let ConflictScope::Confirming { hold_id } = scope {
        occupied.retain(|o| o.source != OccupiedSource::Hold && o.id != hold_id);
    }

    for o in &occupied {
        if o.source == OccupiedSource::External && o.span.overlaps(&window) {
            return Err(EngineError::Conflict(o.id));
        }
    }

    let allocs = collect_allocs(&occupied);
    if cfg.concurrent_capacity <= 1 {
        // Fast path: any overlapping allocation is a conflict
        for o in &allocs {
            if o.span.overlaps(&window) {
                return Err(EngineError::Conflict(o.id));
            }
        }
    } else {
        let spans: Vec<Span> = allocs.iter().map(|o| o.span).collect();
        let saturated = compute_saturated_spans(&spans, cfg.concurrent_capacity);
        if overlaps_any(&saturated, &window) {
            return Err(EngineError::CapacityExceeded(cfg.concurrent_capacity));
        }
    }

    let tz = cfg.tz();
    if daily_capacity_reached(cfg, tz, &occupied, local_date(tz, span.start), None) {
        return Err(EngineError::CapacityExceeded(cfg.daily_capacity.unwrap_or(0)));
    }
    Ok(())
}

/// Bookings and live holds, sorted by start.
fn collect_allocs(occupied: &[Occupied]) -> Vec<Occupied> {
    let mut allocs: Vec<Occupied> = occupied
        .iter()
        .filter(|o| o.source != OccupiedSource::External)
        .copied()
        .collect();
    allocs.sort_by_key(|o| o.span.start);
    allocs
}

/// A write needs a non-empty requester identity.
pub(crate) fn validate_requester(requester: &str) -> Result<(), EngineError> {
    if requester.trim().is_empty() {
        return Err(EngineError::Unauthenticated);
    }
    if requester.len() > crate::limits::MAX_IDENTITY_LEN {
        return Err(EngineError::LimitExceeded("requester identity too long"));
    }
    Ok(())
}

/// Metric label for a rejected candidate.
pub(crate) fn rejection_reason(err: &EngineError) -> &'static str {
    match err {
        EngineError::Conflict(_) => "conflict",
        EngineError::CapacityExceeded(_) => "capacity",
        EngineError::Validation(_) => "validation",
        _ => "other",
    }
}
