use std::sync::Arc;

use chrono_tz::Tz;
use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{validate_requester, validate_span};
use super::{Engine, EngineError, WalCommand};

fn validate_config(cfg: &ResourceConfig) -> Result<(), EngineError> {
    if cfg.name.trim().is_empty() {
        return Err(EngineError::Validation("resource name is required".into()));
    }
    if cfg.name.len() > MAX_NAME_LEN || cfg.kind.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    if cfg.slot_granularity == 0 || cfg.duration == 0 {
        return Err(EngineError::Validation(
            "slot_granularity and duration must be positive".into(),
        ));
    }
    if cfg.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("duration too long"));
    }
    if cfg.concurrent_capacity == 0 || cfg.daily_capacity == Some(0) {
        return Err(EngineError::Validation("capacity must be at least 1".into()));
    }
    if cfg.buffer_before > MINUTES_PER_DAY as u32 || cfg.buffer_after > MINUTES_PER_DAY as u32 {
        return Err(EngineError::Validation("buffers cannot exceed a day".into()));
    }
    if cfg.timezone.parse::<Tz>().is_err() {
        return Err(EngineError::Validation(format!(
            "unknown timezone {:?}",
            cfg.timezone
        )));
    }
    Ok(())
}

fn validate_minutes(start: u16, end: u16) -> Result<(), EngineError> {
    if start >= end || end > MINUTES_PER_DAY {
        return Err(EngineError::Validation(format!(
            "invalid time range {start}..{end}: need start < end <= {MINUTES_PER_DAY}"
        )));
    }
    Ok(())
}

impl Engine {
    /// Register a new resource. `config.owner` becomes the only identity
    /// allowed to change it.
    pub async fn create_resource(&self, config: ResourceConfig) -> Result<(), EngineError> {
        validate_requester(&config.owner)?;
        validate_config(&config)?;
        let _creation = self.creation.lock().await;
        if self.state.len() >= MAX_RESOURCES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        let id = config.id;
        if self.state.contains_key(&id) || self.entity_to_resource.contains_key(&id) {
            return Err(EngineError::Validation(format!("id {id} already in use")));
        }

        let event = Event::ResourceCreated { config: config.clone() };
        self.wal_append(&event).await?;
        self.state.insert(id, Arc::new(RwLock::new(ResourceState::new(config))));
        info!("resource {id} created");
        Ok(())
    }

    /// Apply `patch` to a resource the requester owns.
    pub async fn update_resource(
        &self,
        id: Ulid,
        patch: ResourcePatch,
        requester: &str,
    ) -> Result<ResourceConfig, EngineError> {
        validate_requester(requester)?;
        let mut guard = self.owned_resource_write(id, requester).await?;
        let mut config = guard.config.clone();
        patch.apply(&mut config);
        validate_config(&config)?;

        let event = Event::ResourceUpdated { config: config.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(config)
    }

    pub async fn add_working_hours(
        &self,
        resource_id: Ulid,
        rule: WorkingHours,
        requester: &str,
    ) -> Result<(), EngineError> {
        validate_requester(requester)?;
        if rule.weekday > 6 {
            return Err(EngineError::Validation(format!(
                "weekday {} out of range 0..=6",
                rule.weekday
            )));
        }
        validate_minutes(rule.start_minute, rule.end_minute)?;

        let mut guard = self.owned_resource_write(resource_id, requester).await?;
        if guard.calendar.working_hours.len() >= MAX_RULES_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many working hours on resource"));
        }
        let claim = self.claim_id(rule.id, resource_id)?;
        let event = Event::WorkingHoursAdded { resource_id, rule };
        self.persist_and_apply(&mut guard, &event).await?;
        claim.commit();
        Ok(())
    }

    pub async fn remove_working_hours(&self, id: Ulid, requester: &str) -> Result<Ulid, EngineError> {
        validate_requester(requester)?;
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let known = guard.calendar.working_hours.iter().any(|r| r.id == id);
        if !known || guard.config.owner != requester {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::WorkingHoursRemoved { id, resource_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(resource_id)
    }

    pub async fn add_exception(
        &self,
        resource_id: Ulid,
        exception: CalendarException,
        requester: &str,
    ) -> Result<(), EngineError> {
        validate_requester(requester)?;
        if exception.from > exception.to {
            return Err(EngineError::Validation(format!(
                "exception ends ({}) before it starts ({})",
                exception.to, exception.from
            )));
        }
        if let ExceptionKind::Open {
            start_minute,
            end_minute,
        } = exception.kind
        {
            validate_minutes(start_minute, end_minute)?;
        }

        let mut guard = self.owned_resource_write(resource_id, requester).await?;
        if guard.calendar.exceptions.len() >= MAX_RULES_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many exceptions on resource"));
        }
        let claim = self.claim_id(exception.id, resource_id)?;
        let event = Event::ExceptionAdded { resource_id, exception };
        self.persist_and_apply(&mut guard, &event).await?;
        claim.commit();
        Ok(())
    }

    pub async fn remove_exception(&self, id: Ulid, requester: &str) -> Result<Ulid, EngineError> {
        validate_requester(requester)?;
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let known = guard.calendar.exceptions.iter().any(|e| e.id == id);
        if !known || guard.config.owner != requester {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ExceptionRemoved { id, resource_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(resource_id)
    }

    /// Block time imported from an outside calendar. External events are
    /// accepted even when they overlap existing bookings.
    pub async fn add_external_event(
        &self,
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        label: Option<String>,
        requester: &str,
    ) -> Result<(), EngineError> {
        validate_requester(requester)?;
        validate_span(&span)?;
        if label.as_ref().is_some_and(|l| l.len() > MAX_LABEL_LEN) {
            return Err(EngineError::LimitExceeded("label too long"));
        }

        let mut guard = self.owned_resource_write(resource_id, requester).await?;
        if guard.intervals.len() >= MAX_INTERVALS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many intervals on resource"));
        }
        let claim = self.claim_id(id, resource_id)?;
        let event = Event::ExternalEventAdded {
            id,
            resource_id,
            span,
            label,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        claim.commit();
        Ok(())
    }

    pub async fn remove_external_event(&self, id: Ulid, requester: &str) -> Result<Ulid, EngineError> {
        validate_requester(requester)?;
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let known = guard
            .intervals
            .iter()
            .any(|i| i.id == id && matches!(i.kind, IntervalKind::External { .. }));
        if !known || guard.config.owner != requester {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ExternalEventRemoved { id, resource_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(resource_id)
    }

    /// Rewrite the WAL with just the events needed to rebuild current state.
    /// Holds that stopped being active and ended before now are dropped.
    ///
    /// Every resource stays read-locked (and resource creation paused) until
    /// the writer has swapped files, so no append can land in the old log
    /// after its resource was snapshotted.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _creation = self.creation.lock().await;
        let now = self.now();

        let mut ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        ids.sort();
        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(rs) = self.get_resource(id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut events = Vec::new();
        for rs in &guards {
            snapshot_events(rs, now, &mut events);
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn snapshot_events(rs: &ResourceState, now: Ms, events: &mut Vec<Event>) {
    let resource_id = rs.id();
    events.push(Event::ResourceCreated {
        config: rs.config.clone(),
    });
    for rule in &rs.calendar.working_hours {
        events.push(Event::WorkingHoursAdded {
            resource_id,
            rule: rule.clone(),
        });
    }
    for exception in &rs.calendar.exceptions {
        events.push(Event::ExceptionAdded {
            resource_id,
            exception: exception.clone(),
        });
    }
    for interval in &rs.intervals {
        match &interval.kind {
            IntervalKind::External { label } => events.push(Event::ExternalEventAdded {
                id: interval.id,
                resource_id,
                span: interval.span,
                label: label.clone(),
            }),
            IntervalKind::Hold(h) => {
                if h.status == HoldStatus::Active || h.span.end > now {
                    events.push(Event::HoldPlaced { hold: h.clone() });
                }
            }
            IntervalKind::Booking(b) => events.push(Event::BookingCreated { booking: b.clone() }),
        }
    }
}
