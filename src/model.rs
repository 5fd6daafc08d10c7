use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// Minutes in a day; a rule may end at 24:00.
pub const MINUTES_PER_DAY: u16 = 1440;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Widen by `before` ms on the left and `after` ms on the right.
    pub fn expand(&self, before: Ms, after: Ms) -> Span {
        Span::new(self.start - before, self.end + after)
    }
}

// ── Resource configuration ───────────────────────────────────────

/// Scheduling parameters of a bookable unit. Durations are minutes unless noted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub id: Ulid,
    /// Requester identity of the owner; only the owner edits configuration.
    pub owner: String,
    pub name: String,
    pub kind: String,
    pub slot_granularity: u32,
    pub duration: u32,
    /// Hours before which booking is disallowed.
    pub min_notice: u32,
    /// Days into the future that can be booked. 0 = no horizon.
    pub booking_window: u32,
    pub daily_capacity: Option<u32>,
    pub concurrent_capacity: u32,
    pub buffer_before: u32,
    pub buffer_after: u32,
    pub is_active: bool,
    /// IANA timezone name.
    pub timezone: String,
}

impl ResourceConfig {
    /// A one-hour, hourly-stride resource in UTC with no buffers.
    pub fn new(id: Ulid, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            owner: owner.into(),
            name: name.into(),
            kind: "space".into(),
            slot_granularity: 60,
            duration: 60,
            min_notice: 0,
            booking_window: 0,
            daily_capacity: None,
            concurrent_capacity: 1,
            buffer_before: 0,
            buffer_after: 0,
            is_active: true,
            timezone: "UTC".into(),
        }
    }

    pub fn duration_ms(&self) -> Ms {
        self.duration as Ms * MINUTE_MS
    }

    pub fn granularity_ms(&self) -> Ms {
        self.slot_granularity as Ms * MINUTE_MS
    }

    pub fn buffer_before_ms(&self) -> Ms {
        self.buffer_before as Ms * MINUTE_MS
    }

    pub fn buffer_after_ms(&self) -> Ms {
        self.buffer_after as Ms * MINUTE_MS
    }

    pub fn min_notice_ms(&self) -> Ms {
        self.min_notice as Ms * HOUR_MS
    }

    /// Latest bookable start, if the resource has a horizon.
    pub fn horizon(&self, now: Ms) -> Option<Ms> {
        (self.booking_window > 0).then(|| now + self.booking_window as Ms * DAY_MS)
    }

    /// Parsed timezone; unknown names fall back to UTC (names are validated on write).
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }

    /// Candidate occupancy window: the slot widened by both buffers.
    pub fn occupancy_window(&self, slot: &Span) -> Span {
        slot.expand(self.buffer_before_ms(), self.buffer_after_ms())
    }
}

/// Partial update of a resource. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePatch {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub slot_granularity: Option<u32>,
    pub duration: Option<u32>,
    pub min_notice: Option<u32>,
    pub booking_window: Option<u32>,
    pub daily_capacity: Option<Option<u32>>,
    pub concurrent_capacity: Option<u32>,
    pub buffer_before: Option<u32>,
    pub buffer_after: Option<u32>,
    pub is_active: Option<bool>,
    pub timezone: Option<String>,
}

impl ResourcePatch {
    pub fn apply(self, cfg: &mut ResourceConfig) {
        if let Some(v) = self.name {
            cfg.name = v;
        }
        if let Some(v) = self.kind {
            cfg.kind = v;
        }
        if let Some(v) = self.slot_granularity {
            cfg.slot_granularity = v;
        }
        if let Some(v) = self.duration {
            cfg.duration = v;
        }
        if let Some(v) = self.min_notice {
            cfg.min_notice = v;
        }
        if let Some(v) = self.booking_window {
            cfg.booking_window = v;
        }
        if let Some(v) = self.daily_capacity {
            cfg.daily_capacity = v;
        }
        if let Some(v) = self.concurrent_capacity {
            cfg.concurrent_capacity = v;
        }
        if let Some(v) = self.buffer_before {
            cfg.buffer_before = v;
        }
        if let Some(v) = self.buffer_after {
            cfg.buffer_after = v;
        }
        if let Some(v) = self.is_active {
            cfg.is_active = v;
        }
        if let Some(v) = self.timezone {
            cfg.timezone = v;
        }
    }
}

// ── Calendar rules ───────────────────────────────────────────────

/// Weekly opening hours. `weekday` is 0 = Sunday .. 6 = Saturday;
/// times are minutes after local midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub id: Ulid,
    pub weekday: u8,
    pub start_minute: u16,
    pub end_minute: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionKind {
    /// No availability on the covered dates.
    Closed,
    /// Replaces the weekly hours on the covered dates.
    Open { start_minute: u16, end_minute: u16 },
}

/// Dated override of the weekly hours, `from..=to` in local dates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarException {
    pub id: Ulid,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub kind: ExceptionKind,
}

impl CalendarException {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calendar {
    pub working_hours: Vec<WorkingHours>,
    pub exceptions: Vec<CalendarException>,
}

// ── Holds and bookings ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldStatus {
    Active,
    Confirmed,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    pub created_by: String,
    pub status: HoldStatus,
    pub created_at: Ms,
    pub expires_at: Ms,
}

impl Hold {
    /// `status=active` alone is not trusted: the TTL is checked too.
    pub fn is_live(&self, now: Ms) -> bool {
        self.status == HoldStatus::Active && self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Customer details collected between hold and confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
    /// Minor currency units.
    pub total_amount: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub hold_id: Ulid,
    pub span: Span,
    pub created_by: String,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub customer: CustomerInfo,
    pub created_at: Ms,
}

impl Booking {
    pub fn occupies(&self) -> bool {
        matches!(self.status, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

macro_rules! status_names {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

status_names!(HoldStatus { Active => "active", Confirmed => "confirmed", Expired => "expired" });
status_names!(BookingStatus { Pending => "pending", Confirmed => "confirmed", Cancelled => "cancelled" });
status_names!(PaymentStatus { Pending => "pending", Paid => "paid", Failed => "failed", Refunded => "refunded" });

// ── Resource state ───────────────────────────────────────────────

/// What an occupancy interval represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalKind {
    Hold(Hold),
    Booking(Booking),
    /// Imported calendar block.
    External { label: Option<String> },
}

/// A single interval on a resource's timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

/// Where an occupied interval came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupiedSource {
    Booking,
    Hold,
    External,
}

/// Read-only projection of anything a new candidate must not intersect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupied {
    pub id: Ulid,
    pub span: Span,
    pub source: OccupiedSource,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub config: ResourceConfig,
    pub calendar: Calendar,
    /// Holds, bookings and external events, sorted by `span.start`.
    pub intervals: Vec<Interval>,
}

impl ResourceState {
    pub fn new(config: ResourceConfig) -> Self {
        Self {
            config,
            calendar: Calendar::default(),
            intervals: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.config.id
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Remove interval by id.
    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    pub fn interval_mut(&mut self, id: Ulid) -> Option<&mut Interval> {
        self.intervals.iter_mut().find(|i| i.id == id)
    }

    pub fn hold(&self, id: Ulid) -> Option<&Hold> {
        self.intervals.iter().find_map(|i| match &i.kind {
            IntervalKind::Hold(h) if i.id == id => Some(h),
            _ => None,
        })
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.intervals.iter().find_map(|i| match &i.kind {
            IntervalKind::Booking(b) if i.id == id => Some(b),
            _ => None,
        })
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    /// Occupied intervals overlapping `query`: occupying bookings,
    /// live holds and external events.
    pub fn occupied(&self, query: &Span, now: Ms) -> Vec<Occupied> {
        self.overlapping(query)
            .filter_map(|i| {
                let source = match &i.kind {
                    IntervalKind::Booking(b) if b.occupies() => OccupiedSource::Booking,
                    IntervalKind::Hold(h) if h.is_live(now) => OccupiedSource::Hold,
                    IntervalKind::External { .. } => OccupiedSource::External,
                    _ => return None,
                };
                Some(Occupied {
                    id: i.id,
                    span: i.span,
                    source,
                })
            })
            .collect()
    }
}

/// Flat event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        config: ResourceConfig,
    },
    ResourceUpdated {
        config: ResourceConfig,
    },
    WorkingHoursAdded {
        resource_id: Ulid,
        rule: WorkingHours,
    },
    WorkingHoursRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
    ExceptionAdded {
        resource_id: Ulid,
        exception: CalendarException,
    },
    ExceptionRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
    ExternalEventAdded {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        label: Option<String>,
    },
    ExternalEventRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
    HoldPlaced {
        hold: Hold,
    },
    HoldConfirmed {
        id: Ulid,
        resource_id: Ulid,
    },
    HoldExpired {
        id: Ulid,
        resource_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        resource_id: Ulid,
        status: BookingStatus,
        payment_status: PaymentStatus,
    },
}

impl Event {
    pub fn resource_id(&self) -> Ulid {
        match self {
            Event::ResourceCreated { config } | Event::ResourceUpdated { config } => config.id,
            Event::WorkingHoursAdded { resource_id, .. }
            | Event::WorkingHoursRemoved { resource_id, .. }
            | Event::ExceptionAdded { resource_id, .. }
            | Event::ExceptionRemoved { resource_id, .. }
            | Event::ExternalEventAdded { resource_id, .. }
            | Event::ExternalEventRemoved { resource_id, .. }
            | Event::HoldConfirmed { resource_id, .. }
            | Event::HoldExpired { resource_id, .. }
            | Event::BookingStatusChanged { resource_id, .. } => *resource_id,
            Event::HoldPlaced { hold } => hold.resource_id,
            Event::BookingCreated { booking } => booking.resource_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Bookable slots for a resource plus the resource facts a storefront shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub resource_id: Ulid,
    pub resource_name: String,
    pub resource_kind: String,
    pub timezone: String,
    pub slots: Vec<Span>,
}
