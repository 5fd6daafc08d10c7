use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_bounds;
use super::slots::generate_slots;
use super::{Engine, EngineError};

impl Engine {
    /// Open slots of a resource inside `window`.
    ///
    /// `duration_override` (minutes) previews a different slot length; holds
    /// are still validated against the configured duration.
    pub async fn availability(
        &self,
        resource_id: Ulid,
        window: Span,
        duration_override: Option<u32>,
        limit: Option<usize>,
    ) -> Result<Availability, EngineError> {
        if window.start >= window.end {
            return Err(EngineError::Validation("query end must be after start".into()));
        }
        validate_bounds(&window)?;
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        if duration_override == Some(0) {
            return Err(EngineError::Validation("duration must be positive".into()));
        }

        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        if !guard.config.is_active {
            return Err(EngineError::NotFound(resource_id));
        }

        let mut cfg = guard.config.clone();
        if let Some(d) = duration_override {
            cfg.duration = d;
        }
        let margin = DAY_MS + cfg.buffer_before_ms().max(cfg.buffer_after_ms());
        let search = Span::new(window.start - margin, window.end + margin);
        let now = self.now();
        let occupied = guard.occupied(&search, now);

        let mut slots = generate_slots(&cfg, &guard.calendar, &occupied, &window, now);
        if let Some(n) = limit {
            slots.truncate(n);
        }
        Ok(Availability {
            resource_id,
            resource_name: cfg.name,
            resource_kind: cfg.kind,
            timezone: cfg.timezone,
            slots,
        })
    }

    pub async fn resource_config(&self, id: Ulid) -> Result<ResourceConfig, EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.config.clone())
    }

    /// Every resource of the tenant, ordered by id.
    pub async fn list_resources(&self) -> Vec<ResourceConfig> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for rs in shared {
            out.push(rs.read().await.config.clone());
        }
        out.sort_by_key(|c| c.id);
        out
    }

    pub async fn get_working_hours(&self, resource_id: Ulid) -> Result<Vec<WorkingHours>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        let mut rules = guard.calendar.working_hours.clone();
        rules.sort_by_key(|r| (r.weekday, r.start_minute));
        Ok(rules)
    }

    pub async fn get_exceptions(&self, resource_id: Ulid) -> Result<Vec<CalendarException>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        let mut exceptions = guard.calendar.exceptions.clone();
        exceptions.sort_by_key(|e| e.from);
        Ok(exceptions)
    }

    /// Holds on a resource: all of them for the owner, the requester's own otherwise.
    pub async fn get_holds(&self, resource_id: Ulid, requester: &str) -> Result<Vec<Hold>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        let is_owner = guard.config.owner == requester;
        Ok(guard
            .intervals
            .iter()
            .filter_map(|i| match &i.kind {
                IntervalKind::Hold(h) if is_owner || h.created_by == requester => Some(h.clone()),
                _ => None,
            })
            .collect())
    }

    /// Bookings on a resource, scoped like [`Engine::get_holds`].
    pub async fn get_bookings(
        &self,
        resource_id: Ulid,
        requester: &str,
    ) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        let is_owner = guard.config.owner == requester;
        Ok(guard
            .intervals
            .iter()
            .filter_map(|i| match &i.kind {
                IntervalKind::Booking(b) if is_owner || b.created_by == requester => Some(b.clone()),
                _ => None,
            })
            .collect())
    }
}
