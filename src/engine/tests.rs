use std::sync::atomic::{AtomicI64, Ordering};

use chrono::NaiveDate;

use super::*;
use crate::limits::HOLD_TTL_MS;

/// 2030-01-06T12:00Z, a Sunday.
const SUNDAY_NOON: Ms = 1_893_931_200_000;
/// 2030-01-07T00:00Z, the following Monday.
const MONDAY: Ms = 1_893_974_400_000;
/// 2030-01-13T00:00Z, the next Sunday.
const NEXT_SUNDAY: Ms = 1_894_492_800_000;
/// 2030-01-14T00:00Z, the Monday after.
const NEXT_MONDAY: Ms = 1_894_579_200_000;

const OWNER: &str = "owner";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn engine_at(path: PathBuf, now: Ms) -> (Engine, Arc<AtomicI64>) {
    let clock = Arc::new(AtomicI64::new(now));
    let c = clock.clone();
    let engine = Engine::with_clock(path, Arc::new(move || c.load(Ordering::SeqCst))).unwrap();
    (engine, clock)
}

fn fixture(name: &str) -> (Engine, Arc<AtomicI64>) {
    engine_at(test_wal_path(name), SUNDAY_NOON)
}

/// The scenario resource: 4h sessions on a 30 min grid with an hour of
/// buffer on each side, open Mondays 08:00–20:00.
fn studio_config() -> ResourceConfig {
    ResourceConfig {
        slot_granularity: 30,
        duration: 240,
        buffer_before: 60,
        buffer_after: 60,
        kind: "studio".into(),
        ..ResourceConfig::new(Ulid::new(), OWNER, "Studio A")
    }
}

/// Hourly one-hour slots, open Mondays 08:00–20:00.
fn room_config() -> ResourceConfig {
    ResourceConfig::new(Ulid::new(), OWNER, "Room 1")
}

async fn create_with_monday_hours(engine: &Engine, cfg: ResourceConfig) -> Ulid {
    let id = cfg.id;
    engine.create_resource(cfg).await.unwrap();
    let rule = WorkingHours {
        id: Ulid::new(),
        weekday: 1,
        start_minute: 8 * 60,
        end_minute: 20 * 60,
    };
    engine.add_working_hours(id, rule, OWNER).await.unwrap();
    id
}

fn monday_at(hour: i64, minute: i64) -> Ms {
    MONDAY + hour * HOUR_MS + minute * MINUTE_MS
}

fn day(start: Ms) -> Span {
    Span::new(start, start + DAY_MS)
}

fn customer(name: &str) -> CustomerInfo {
    CustomerInfo {
        name: name.into(),
        email: format!("{}@example.com", name.to_lowercase()),
        ..Default::default()
    }
}

// ── Spec scenarios ───────────────────────────────────────

#[tokio::test]
async fn buffers_push_the_first_slot_inside_opening_hours() {
    let (engine, _) = fixture("scenario_a.wal");
    let rid = create_with_monday_hours(&engine, studio_config()).await;

    let avail = engine.availability(rid, day(MONDAY), None, None).await.unwrap();
    assert_eq!(avail.resource_name, "Studio A");
    assert_eq!(avail.resource_kind, "studio");
    assert_eq!(avail.timezone, "UTC");
    assert_eq!(avail.slots.len(), 13);
    assert_eq!(avail.slots[0], Span::new(monday_at(9, 0), monday_at(13, 0)));
    assert_eq!(avail.slots[12], Span::new(monday_at(15, 0), monday_at(19, 0)));
    assert!(avail.slots.windows(2).all(|w| w[1].start - w[0].start == 30 * MINUTE_MS));
}

#[tokio::test]
async fn closed_exception_empties_only_its_day() {
    let (engine, _) = fixture("scenario_b.wal");
    let rid = create_with_monday_hours(&engine, studio_config()).await;
    let monday = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
    let closed = CalendarException {
        id: Ulid::new(),
        from: monday,
        to: monday,
        kind: ExceptionKind::Closed,
    };
    engine.add_exception(rid, closed, OWNER).await.unwrap();

    let that_day = engine.availability(rid, day(MONDAY), None, None).await.unwrap();
    assert!(that_day.slots.is_empty());
    let week_later = engine.availability(rid, day(NEXT_MONDAY), None, None).await.unwrap();
    assert_eq!(week_later.slots.len(), 13);
}

#[tokio::test]
async fn concurrent_holds_on_one_slot_have_one_winner() {
    let (engine, _) = fixture("scenario_c.wal");
    let rid = create_with_monday_hours(&engine, studio_config()).await;
    let slot = Span::new(monday_at(10, 0), monday_at(14, 0));

    let (a, b) = tokio::join!(
        engine.create_hold(Ulid::new(), rid, slot, "alice"),
        engine.create_hold(Ulid::new(), rid, slot, "bob"),
    );
    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(loser, Err(EngineError::Conflict(_))));

    let bookings_possible = engine
        .get_holds(rid, OWNER)
        .await
        .unwrap()
        .into_iter()
        .filter(|h| h.status == HoldStatus::Active)
        .count();
    assert_eq!(bookings_possible, 1);
}

#[tokio::test]
async fn confirming_after_expiry_always_fails() {
    let (engine, clock) = fixture("scenario_d.wal");
    let rid = create_with_monday_hours(&engine, studio_config()).await;
    let slot = Span::new(monday_at(10, 0), monday_at(14, 0));
    let hold = engine.create_hold(Ulid::new(), rid, slot, "alice").await.unwrap();
    assert_eq!(hold.expires_at, SUNDAY_NOON + HOLD_TTL_MS);

    clock.store(hold.expires_at + 1, Ordering::SeqCst);
    let result = engine.confirm_booking(hold.id, customer("Alice"), "alice").await;
    assert!(matches!(result, Err(EngineError::Expired(id)) if id == hold.id));

    // The slot is free, yet the hold is gone for good.
    let holds = engine.get_holds(rid, "alice").await.unwrap();
    assert_eq!(holds[0].status, HoldStatus::Expired);
    let again = engine.confirm_booking(hold.id, customer("Alice"), "alice").await;
    assert!(matches!(again, Err(EngineError::NotFound(_))));
    let avail = engine.availability(rid, day(MONDAY), None, None).await.unwrap();
    assert!(avail.slots.contains(&slot));
}

#[tokio::test]
async fn open_exception_replaces_sunday_rules() {
    let (engine, _) = fixture("scenario_e.wal");
    let cfg = room_config();
    let rid = cfg.id;
    engine.create_resource(cfg).await.unwrap();
    let sunday_rule = WorkingHours {
        id: Ulid::new(),
        weekday: 0,
        start_minute: 6 * 60,
        end_minute: 22 * 60,
    };
    engine.add_working_hours(rid, sunday_rule, OWNER).await.unwrap();
    let sunday = NaiveDate::from_ymd_opt(2030, 1, 13).unwrap();
    let open = CalendarException {
        id: Ulid::new(),
        from: sunday,
        to: sunday,
        kind: ExceptionKind::Open {
            start_minute: 10 * 60,
            end_minute: 14 * 60,
        },
    };
    engine.add_exception(rid, open, OWNER).await.unwrap();

    let avail = engine.availability(rid, day(NEXT_SUNDAY), None, None).await.unwrap();
    let starts: Vec<Ms> = avail.slots.iter().map(|s| (s.start - NEXT_SUNDAY) / HOUR_MS).collect();
    assert_eq!(starts, vec![10, 11, 12, 13]);
}

// ── Holds ────────────────────────────────────────────────

#[tokio::test]
async fn hold_validation_rules() {
    let (engine, _) = fixture("hold_validation.wal");
    let mut cfg = studio_config();
    cfg.min_notice = 24;
    cfg.booking_window = 30;
    let rid = create_with_monday_hours(&engine, cfg).await;

    let wrong_length = Span::new(monday_at(10, 0), monday_at(12, 0));
    let err = engine.create_hold(Ulid::new(), rid, wrong_length, "alice").await;
    assert!(matches!(err, Err(EngineError::Validation(_))));

    // 07:00 would need its buffer from 06:00; the studio opens at 08:00.
    let early = Span::new(monday_at(7, 0), monday_at(11, 0));
    let err = engine.create_hold(Ulid::new(), rid, early, "alice").await;
    assert!(matches!(err, Err(EngineError::Validation(_))));

    // Monday 09:00 is only 21h away.
    let within_notice = Span::new(monday_at(9, 0), monday_at(13, 0));
    let err = engine.create_hold(Ulid::new(), rid, within_notice, "alice").await;
    assert!(matches!(err, Err(EngineError::Validation(_))));

    let too_far = within_notice.start + 35 * DAY_MS;
    let err = engine
        .create_hold(Ulid::new(), rid, Span::new(too_far, too_far + 4 * HOUR_MS), "alice")
        .await;
    assert!(matches!(err, Err(EngineError::Validation(_))));

    let ok = Span::new(monday_at(13, 0), monday_at(17, 0));
    assert!(engine.create_hold(Ulid::new(), rid, ok, "alice").await.is_ok());
}

#[tokio::test]
async fn unknown_inactive_or_anonymous_hold_requests() {
    let (engine, _) = fixture("hold_rejections.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;
    let slot = Span::new(monday_at(9, 0), monday_at(10, 0));

    let err = engine.create_hold(Ulid::new(), rid, slot, "").await;
    tokio_test::assert_err!(&err);
    assert!(matches!(err, Err(EngineError::Unauthenticated)));

    let missing = Ulid::new();
    let err = engine.create_hold(Ulid::new(), missing, slot, "alice").await;
    assert!(matches!(err, Err(EngineError::NotFound(id)) if id == missing));

    let deactivate = ResourcePatch {
        is_active: Some(false),
        ..Default::default()
    };
    engine.update_resource(rid, deactivate, OWNER).await.unwrap();
    let err = engine.create_hold(Ulid::new(), rid, slot, "alice").await;
    assert!(matches!(err, Err(EngineError::NotFound(_))));
    let err = engine.availability(rid, day(MONDAY), None, None).await;
    assert!(matches!(err, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn buffered_windows_may_not_touch() {
    let (engine, _) = fixture("buffered_overlap.wal");
    let rid = create_with_monday_hours(&engine, studio_config()).await;
    // Occupies 08:00..14:00 once buffered.
    let first = Span::new(monday_at(9, 0), monday_at(13, 0));
    engine.create_hold(Ulid::new(), rid, first, "alice").await.unwrap();

    // Buffered 12:30..18:30 overlaps.
    let close = Span::new(monday_at(13, 30), monday_at(17, 30));
    let err = engine.create_hold(Ulid::new(), rid, close, "bob").await;
    assert!(matches!(err, Err(EngineError::Conflict(_))));

    // Buffered 14:00..20:00 only touches.
    let adjacent = Span::new(monday_at(15, 0), monday_at(19, 0));
    engine.create_hold(Ulid::new(), rid, adjacent, "bob").await.unwrap();

    let avail = engine.availability(rid, day(MONDAY), None, None).await.unwrap();
    assert!(avail.slots.is_empty());
}

#[tokio::test]
async fn availability_is_stable_without_writes() {
    let (engine, _) = fixture("idempotent_query.wal");
    let rid = create_with_monday_hours(&engine, studio_config()).await;
    let a = engine.availability(rid, day(MONDAY), None, None).await.unwrap();
    let b = engine.availability(rid, day(MONDAY), None, None).await.unwrap();
    assert_eq!(a, b);

    let limited = engine.availability(rid, day(MONDAY), None, Some(3)).await.unwrap();
    assert_eq!(limited.slots, a.slots[..3].to_vec());

    let preview = engine.availability(rid, day(MONDAY), Some(60), None).await.unwrap();
    assert_eq!(preview.slots[0], Span::new(monday_at(9, 0), monday_at(10, 0)));
    assert_eq!(preview.slots.last().unwrap().start, monday_at(18, 0));
}

#[tokio::test]
async fn availability_rejects_bad_windows() {
    let (engine, _) = fixture("bad_windows.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;
    let err = engine
        .availability(rid, Span { start: MONDAY, end: MONDAY }, None, None)
        .await;
    assert!(matches!(err, Err(EngineError::Validation(_))));
    let err = engine
        .availability(rid, Span::new(MONDAY, MONDAY + 400 * DAY_MS), None, None)
        .await;
    assert!(matches!(err, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn availability_rejects_out_of_range_windows() {
    let (engine, _) = fixture("out_of_range_windows.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;
    let extreme = Span::new(i64::MIN + 1, i64::MAX);
    let err = engine.availability(rid, extreme, None, None).await;
    assert!(matches!(err, Err(EngineError::LimitExceeded("timestamp out of range"))));

    let before_2000 = Span::new(0, DAY_MS);
    let err = engine.availability(rid, before_2000, None, None).await;
    assert!(matches!(err, Err(EngineError::LimitExceeded("timestamp out of range"))));

    let far_future = Span::new(i64::MAX - DAY_MS, i64::MAX);
    let err = engine.availability(rid, far_future, None, None).await;
    assert!(matches!(err, Err(EngineError::LimitExceeded(_))));
}

// ── Entity ids ───────────────────────────────────────────

#[tokio::test]
async fn entity_id_stays_bound_to_its_first_resource() {
    let (engine, _) = fixture("entity_id_rebind.wal");
    let first = create_with_monday_hours(&engine, room_config()).await;
    let second = create_with_monday_hours(&engine, room_config()).await;
    let slot = Span::new(monday_at(9, 0), monday_at(10, 0));

    let id = Ulid::new();
    engine.create_hold(id, first, slot, "alice").await.unwrap();
    let err = engine.create_hold(id, second, slot, "bob").await;
    assert!(matches!(err, Err(EngineError::Validation(_))));
    let err = engine
        .add_external_event(id, second, slot, None, OWNER)
        .await;
    assert!(matches!(err, Err(EngineError::Validation(_))));

    assert_eq!(engine.get_resource_for_entity(&id), Some(first));
    let booking = engine.confirm_booking(id, customer("Alice"), "alice").await.unwrap();
    assert_eq!(booking.resource_id, first);
}

#[tokio::test]
async fn concurrent_inserts_of_one_id_have_one_winner() {
    let (engine, _) = fixture("entity_id_race.wal");
    let first = create_with_monday_hours(&engine, room_config()).await;
    let second = create_with_monday_hours(&engine, room_config()).await;
    let slot = Span::new(monday_at(9, 0), monday_at(10, 0));

    let id = Ulid::new();
    let (a, b) = tokio::join!(
        engine.create_hold(id, first, slot, "alice"),
        engine.create_hold(id, second, slot, "bob"),
    );
    assert_eq!([&a, &b].iter().filter(|r| r.is_ok()).count(), 1);
    let winner = if a.is_ok() { first } else { second };
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(EngineError::Validation(_))));
    assert_eq!(engine.get_resource_for_entity(&id), Some(winner));

    let losing_resource = if winner == first { second } else { first };
    let holds = engine.get_holds(losing_resource, OWNER).await.unwrap();
    assert!(holds.is_empty());
}

#[tokio::test]
async fn rejected_insert_releases_its_id() {
    let (engine, _) = fixture("entity_id_release.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;

    let id = Ulid::new();
    let wrong_length = Span::new(monday_at(9, 0), monday_at(9, 30));
    let err = engine.create_hold(id, rid, wrong_length, "alice").await;
    assert!(matches!(err, Err(EngineError::Validation(_))));
    assert_eq!(engine.get_resource_for_entity(&id), None);

    let slot = Span::new(monday_at(9, 0), monday_at(10, 0));
    let hold = engine.create_hold(id, rid, slot, "alice").await.unwrap();
    assert_eq!(hold.id, id);
    assert_eq!(engine.get_resource_for_entity(&id), Some(rid));
}

// ── Bookings ─────────────────────────────────────────────

#[tokio::test]
async fn confirm_turns_hold_into_pending_booking() {
    let (engine, _) = fixture("confirm.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;
    let slot = Span::new(monday_at(9, 0), monday_at(10, 0));
    let hold = engine.create_hold(Ulid::new(), rid, slot, "alice").await.unwrap();

    let paid = CustomerInfo {
        total_amount: Some(4_500),
        ..customer("Alice")
    };
    let booking = engine.confirm_booking(hold.id, paid, "alice").await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.payment_status, PaymentStatus::Pending);
    assert_eq!(booking.span, slot);
    assert_eq!(booking.hold_id, hold.id);

    let holds = engine.get_holds(rid, "alice").await.unwrap();
    assert_eq!(holds[0].status, HoldStatus::Confirmed);

    // The slot stays taken after the hold is retired.
    let err = engine.create_hold(Ulid::new(), rid, slot, "bob").await;
    assert!(matches!(err, Err(EngineError::Conflict(id)) if id == booking.id));
    let avail = engine.availability(rid, day(MONDAY), None, None).await.unwrap();
    assert!(!avail.slots.contains(&slot));

    // Free bookings need no payment.
    let other = Span::new(monday_at(11, 0), monday_at(12, 0));
    let hold = engine.create_hold(Ulid::new(), rid, other, "bob").await.unwrap();
    let booking = engine.confirm_booking(hold.id, customer("Bob"), "bob").await.unwrap();
    assert_eq!(booking.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn confirm_at_exact_expiry_succeeds() {
    let (engine, clock) = fixture("ttl_boundary.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;
    let slot = Span::new(monday_at(9, 0), monday_at(10, 0));
    let hold = engine.create_hold(Ulid::new(), rid, slot, "alice").await.unwrap();

    clock.store(hold.expires_at, Ordering::SeqCst);
    assert!(engine.confirm_booking(hold.id, customer("Alice"), "alice").await.is_ok());
}

#[tokio::test]
async fn confirm_is_scoped_to_the_hold_creator() {
    let (engine, _) = fixture("confirm_scope.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;
    let slot = Span::new(monday_at(9, 0), monday_at(10, 0));
    let hold = engine.create_hold(Ulid::new(), rid, slot, "alice").await.unwrap();

    let err = engine.confirm_booking(hold.id, customer("Mallory"), "mallory").await;
    assert!(matches!(err, Err(EngineError::NotFound(_))));

    let no_email = CustomerInfo {
        email: String::new(),
        ..customer("Alice")
    };
    let err = engine.confirm_booking(hold.id, no_email, "alice").await;
    assert!(matches!(err, Err(EngineError::Validation(_))));

    let err = engine.confirm_booking(Ulid::new(), customer("Alice"), "alice").await;
    assert!(matches!(err, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn external_event_after_hold_blocks_confirmation() {
    let (engine, _) = fixture("confirm_recheck.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;
    let slot = Span::new(monday_at(9, 0), monday_at(10, 0));
    let hold = engine.create_hold(Ulid::new(), rid, slot, "alice").await.unwrap();

    let block = Ulid::new();
    engine
        .add_external_event(block, rid, Span::new(monday_at(9, 30), monday_at(11, 0)), Some("maintenance".into()), OWNER)
        .await
        .unwrap();
    let err = engine.confirm_booking(hold.id, customer("Alice"), "alice").await;
    assert!(matches!(err, Err(EngineError::Conflict(id)) if id == block));

    engine.remove_external_event(block, OWNER).await.unwrap();
    assert!(engine.confirm_booking(hold.id, customer("Alice"), "alice").await.is_ok());
}

#[tokio::test]
async fn no_two_occupying_bookings_overlap() {
    let (engine, clock) = fixture("no_overlap.wal");
    let rid = create_with_monday_hours(&engine, studio_config()).await;

    // Every grid start, two customers each; expire and retry a few rounds.
    for round in 0..3 {
        let avail = engine.availability(rid, day(MONDAY), None, None).await.unwrap();
        for slot in avail.slots {
            for who in ["alice", "bob"] {
                if let Ok(hold) = engine.create_hold(Ulid::new(), rid, slot, who).await
                    && round % 2 == 0
                {
                    let _ = engine.confirm_booking(hold.id, customer(who), who).await;
                }
            }
        }
        clock.fetch_add(HOLD_TTL_MS + 1, Ordering::SeqCst);
    }

    let cfg = engine.resource_config(rid).await.unwrap();
    let bookings: Vec<Span> = engine
        .get_bookings(rid, OWNER)
        .await
        .unwrap()
        .into_iter()
        .filter(Booking::occupies)
        .map(|b| cfg.occupancy_window(&b.span))
        .collect();
    assert!(!bookings.is_empty());
    for (i, a) in bookings.iter().enumerate() {
        for b in &bookings[i + 1..] {
            assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
        }
    }
}

#[tokio::test]
async fn cancellation_frees_the_slot_and_revival_rechecks() {
    let (engine, _) = fixture("cancel.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;
    let slot = Span::new(monday_at(9, 0), monday_at(10, 0));
    let hold = engine.create_hold(Ulid::new(), rid, slot, "alice").await.unwrap();
    let booking = engine.confirm_booking(hold.id, customer("Alice"), "alice").await.unwrap();

    let err = engine
        .update_booking(booking.id, Some(BookingStatus::Cancelled), None, "mallory")
        .await;
    assert!(matches!(err, Err(EngineError::NotFound(_))));

    let cancelled = engine
        .update_booking(booking.id, Some(BookingStatus::Cancelled), Some(PaymentStatus::Refunded), "alice")
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);

    let hold = engine.create_hold(Ulid::new(), rid, slot, "bob").await.unwrap();
    engine.confirm_booking(hold.id, customer("Bob"), "bob").await.unwrap();

    let err = engine
        .update_booking(booking.id, Some(BookingStatus::Confirmed), None, OWNER)
        .await;
    assert!(matches!(err, Err(EngineError::Conflict(_))));
}

// ── Capacity ─────────────────────────────────────────────

#[tokio::test]
async fn concurrent_capacity_allows_parallel_holds() {
    let (engine, _) = fixture("concurrent_capacity.wal");
    let cfg = ResourceConfig {
        concurrent_capacity: 2,
        ..room_config()
    };
    let rid = create_with_monday_hours(&engine, cfg).await;
    let slot = Span::new(monday_at(9, 0), monday_at(10, 0));

    engine.create_hold(Ulid::new(), rid, slot, "alice").await.unwrap();
    let avail = engine.availability(rid, day(MONDAY), None, None).await.unwrap();
    assert!(avail.slots.contains(&slot));

    engine.create_hold(Ulid::new(), rid, slot, "bob").await.unwrap();
    let avail = engine.availability(rid, day(MONDAY), None, None).await.unwrap();
    assert!(!avail.slots.contains(&slot));

    let err = engine.create_hold(Ulid::new(), rid, slot, "carol").await;
    assert!(matches!(err, Err(EngineError::CapacityExceeded(2))));

    // External events block regardless of capacity.
    let next = Span::new(monday_at(10, 0), monday_at(11, 0));
    engine.add_external_event(Ulid::new(), rid, next, None, OWNER).await.unwrap();
    let err = engine.create_hold(Ulid::new(), rid, next, "carol").await;
    assert!(matches!(err, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn daily_capacity_closes_the_day() {
    let (engine, _) = fixture("daily_capacity.wal");
    let cfg = ResourceConfig {
        daily_capacity: Some(1),
        ..room_config()
    };
    let rid = create_with_monday_hours(&engine, cfg).await;
    let first = Span::new(monday_at(9, 0), monday_at(10, 0));
    engine.create_hold(Ulid::new(), rid, first, "alice").await.unwrap();

    let avail = engine.availability(rid, day(MONDAY), None, None).await.unwrap();
    assert!(avail.slots.is_empty());
    let later = Span::new(monday_at(15, 0), monday_at(16, 0));
    let err = engine.create_hold(Ulid::new(), rid, later, "bob").await;
    assert!(matches!(err, Err(EngineError::CapacityExceeded(1))));

    let next_week = engine.availability(rid, day(NEXT_MONDAY), None, None).await.unwrap();
    assert_eq!(next_week.slots.len(), 12);
}

// ── Configuration ────────────────────────────────────────

#[tokio::test]
async fn configuration_is_owner_only() {
    let (engine, _) = fixture("owner_only.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;

    let rename = ResourcePatch {
        name: Some("Hijacked".into()),
        ..Default::default()
    };
    let err = engine.update_resource(rid, rename.clone(), "mallory").await;
    assert!(matches!(err, Err(EngineError::NotFound(_))));
    let rule = WorkingHours {
        id: Ulid::new(),
        weekday: 2,
        start_minute: 0,
        end_minute: 60,
    };
    let err = engine.add_working_hours(rid, rule.clone(), "mallory").await;
    assert!(matches!(err, Err(EngineError::NotFound(_))));

    let updated = engine.update_resource(rid, rename, OWNER).await.unwrap();
    assert_eq!(updated.name, "Hijacked");
    engine.add_working_hours(rid, rule.clone(), OWNER).await.unwrap();
    let err = engine.remove_working_hours(rule.id, "mallory").await;
    assert!(matches!(err, Err(EngineError::NotFound(_))));
    assert_eq!(engine.remove_working_hours(rule.id, OWNER).await.unwrap(), rid);
    assert_eq!(engine.get_working_hours(rid).await.unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_configuration_rejected() {
    let (engine, _) = fixture("invalid_config.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;

    let err = engine
        .create_resource(ResourceConfig {
            timezone: "Not/AZone".into(),
            ..room_config()
        })
        .await;
    assert!(matches!(err, Err(EngineError::Validation(_))));

    let bad_rule = WorkingHours {
        id: Ulid::new(),
        weekday: 7,
        start_minute: 0,
        end_minute: 60,
    };
    let err = engine.add_working_hours(rid, bad_rule, OWNER).await;
    assert!(matches!(err, Err(EngineError::Validation(_))));

    let backwards = CalendarException {
        id: Ulid::new(),
        from: NaiveDate::from_ymd_opt(2030, 2, 2).unwrap(),
        to: NaiveDate::from_ymd_opt(2030, 2, 1).unwrap(),
        kind: ExceptionKind::Closed,
    };
    let err = engine.add_exception(rid, backwards, OWNER).await;
    assert!(matches!(err, Err(EngineError::Validation(_))));

    let zero = ResourcePatch {
        concurrent_capacity: Some(0),
        ..Default::default()
    };
    let err = engine.update_resource(rid, zero, OWNER).await;
    assert!(matches!(err, Err(EngineError::Validation(_))));
    assert_eq!(engine.resource_config(rid).await.unwrap().concurrent_capacity, 1);
}

#[tokio::test]
async fn timezone_anchors_working_hours() {
    let (engine, _) = fixture("timezone.wal");
    let cfg = ResourceConfig {
        timezone: "America/New_York".into(),
        ..room_config()
    };
    let rid = create_with_monday_hours(&engine, cfg).await;

    // Monday 08:00 in New York (EST, UTC-5) is 13:00Z.
    let window = Span::new(MONDAY, MONDAY + 2 * DAY_MS);
    let avail = engine.availability(rid, window, None, None).await.unwrap();
    assert_eq!(avail.timezone, "America/New_York");
    assert_eq!(avail.slots[0].start, monday_at(13, 0));
    assert_eq!(avail.slots.len(), 12);
}

// ── Durability and housekeeping ──────────────────────────

#[tokio::test]
async fn state_survives_replay() {
    let path = test_wal_path("replay.wal");
    let (engine, _) = engine_at(path.clone(), SUNDAY_NOON);
    let rid = create_with_monday_hours(&engine, studio_config()).await;
    let slot = Span::new(monday_at(9, 0), monday_at(13, 0));
    let hold = engine.create_hold(Ulid::new(), rid, slot, "alice").await.unwrap();
    let booking = engine.confirm_booking(hold.id, customer("Alice"), "alice").await.unwrap();
    engine
        .update_booking(booking.id, Some(BookingStatus::Confirmed), None, "alice")
        .await
        .unwrap();
    drop(engine);

    let (engine, _) = engine_at(path, SUNDAY_NOON);
    let cfg = engine.resource_config(rid).await.unwrap();
    assert_eq!(cfg.name, "Studio A");
    let bookings = engine.get_bookings(rid, "alice").await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].status, BookingStatus::Confirmed);
    assert_eq!(bookings[0].customer.email, "alice@example.com");
    assert_eq!(engine.get_holds(rid, "alice").await.unwrap()[0].status, HoldStatus::Confirmed);
    let err = engine.create_hold(Ulid::new(), rid, slot, "bob").await;
    assert!(matches!(err, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn sweeper_marks_stale_holds_expired() {
    let (engine, clock) = fixture("sweeper.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;
    let slot = Span::new(monday_at(9, 0), monday_at(10, 0));
    let hold = engine.create_hold(Ulid::new(), rid, slot, "alice").await.unwrap();

    assert!(engine.collect_expired_holds(engine.now()).is_empty());
    clock.store(hold.expires_at + 1, Ordering::SeqCst);
    let due = engine.collect_expired_holds(engine.now());
    assert_eq!(due, vec![(hold.id, rid)]);
    assert!(engine.expire_hold(hold.id).await.unwrap());
    assert!(!engine.expire_hold(hold.id).await.unwrap());
    assert_eq!(engine.get_holds(rid, OWNER).await.unwrap()[0].status, HoldStatus::Expired);
}

#[tokio::test]
async fn compaction_drops_finished_holds() {
    let path = test_wal_path("compact.wal");
    let (engine, clock) = engine_at(path.clone(), SUNDAY_NOON);
    let rid = create_with_monday_hours(&engine, room_config()).await;
    let slot = Span::new(monday_at(9, 0), monday_at(10, 0));
    let stale = engine.create_hold(Ulid::new(), rid, slot, "alice").await.unwrap();
    let hold = engine
        .create_hold(Ulid::new(), rid, Span::new(monday_at(11, 0), monday_at(12, 0)), "bob")
        .await
        .unwrap();
    let booking = engine.confirm_booking(hold.id, customer("Bob"), "bob").await.unwrap();

    // A week later the expired hold's slot is in the past.
    clock.store(SUNDAY_NOON + 7 * DAY_MS, Ordering::SeqCst);
    engine.expire_hold(stale.id).await.unwrap();
    assert!(engine.wal_appends_since_compact().await > 0);

    // resource, one rule, one booking; both holds are finished and in the past
    assert_eq!(engine.compact_wal().await.unwrap(), 3);
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    drop(engine);

    let (engine, _) = engine_at(path, SUNDAY_NOON + 7 * DAY_MS);
    assert!(engine.get_holds(rid, OWNER).await.unwrap().is_empty());
    let bookings = engine.get_bookings(rid, OWNER).await.unwrap();
    assert_eq!(bookings, vec![booking]);
}

#[tokio::test]
async fn read_models_are_scoped_to_requester() {
    let (engine, _) = fixture("read_scope.wal");
    let rid = create_with_monday_hours(&engine, room_config()).await;
    for (hour, who) in [(9, "alice"), (11, "bob")] {
        let slot = Span::new(monday_at(hour, 0), monday_at(hour + 1, 0));
        let hold = engine.create_hold(Ulid::new(), rid, slot, who).await.unwrap();
        engine.confirm_booking(hold.id, customer(who), who).await.unwrap();
    }
    assert_eq!(engine.get_bookings(rid, OWNER).await.unwrap().len(), 2);
    let mine = engine.get_bookings(rid, "alice").await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].created_by, "alice");
    assert_eq!(engine.get_holds(rid, "carol").await.unwrap().len(), 0);
    assert_eq!(engine.list_resources().await.len(), 1);
}
