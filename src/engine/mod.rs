mod bookings;
mod calendar;
mod conflict;
mod error;
mod holds;
mod mutations;
mod queries;
mod slots;
#[cfg(test)]
mod tests;

pub use calendar::{effective_open_spans, local_date, local_to_ms, weekday_index};
pub use error::EngineError;
pub use slots::{blocked_spans, compute_saturated_spans, generate_slots, merge_overlapping};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// Source of "now" for every time-dependent decision.
pub type Clock = Arc<dyn Fn() -> Ms + Send + Sync>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is queued, then a single
/// fsync answers the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Flush what we have before compaction or stats see the log.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// An entity id held in the reverse index while its event is written.
pub(super) struct IdClaim<'a> {
    index: &'a DashMap<Ulid, Ulid>,
    id: Ulid,
    committed: bool,
}

impl IdClaim<'_> {
    pub(super) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.index.remove(&self.id);
        }
    }
}

/// One tenant's booking engine: resource state in memory, every change
/// durably appended to the WAL before it is applied.
pub struct Engine {
    pub state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: entity (rule/exception/hold/booking/event) id → resource id
    pub(super) entity_to_resource: DashMap<Ulid, Ulid>,
    /// Serializes resource creation against compaction snapshots.
    pub(super) creation: Mutex<()>,
    clock: Clock,
}

/// Apply an event directly to a ResourceState (caller holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    let resource_id = rs.id();
    match event {
        Event::ResourceUpdated { config } => {
            rs.config = config.clone();
        }
        Event::WorkingHoursAdded { rule, .. } => {
            rs.calendar.working_hours.push(rule.clone());
            entity_map.insert(rule.id, resource_id);
        }
        Event::WorkingHoursRemoved { id, .. } => {
            rs.calendar.working_hours.retain(|r| r.id != *id);
            entity_map.remove(id);
        }
        Event::ExceptionAdded { exception, .. } => {
            rs.calendar.exceptions.push(exception.clone());
            entity_map.insert(exception.id, resource_id);
        }
        Event::ExceptionRemoved { id, .. } => {
            rs.calendar.exceptions.retain(|e| e.id != *id);
            entity_map.remove(id);
        }
        Event::ExternalEventAdded { id, span, label, .. } => {
            rs.insert_interval(Interval {
                id: *id,
                span: *span,
                kind: IntervalKind::External { label: label.clone() },
            });
            entity_map.insert(*id, resource_id);
        }
        Event::ExternalEventRemoved { id, .. } => {
            rs.remove_interval(*id);
            entity_map.remove(id);
        }
        Event::HoldPlaced { hold } => {
            rs.insert_interval(Interval {
                id: hold.id,
                span: hold.span,
                kind: IntervalKind::Hold(hold.clone()),
            });
            entity_map.insert(hold.id, resource_id);
        }
        Event::HoldConfirmed { id, .. } => set_hold_status(rs, *id, HoldStatus::Confirmed),
        Event::HoldExpired { id, .. } => set_hold_status(rs, *id, HoldStatus::Expired),
        Event::BookingCreated { booking } => {
            rs.insert_interval(Interval {
                id: booking.id,
                span: booking.span,
                kind: IntervalKind::Booking(booking.clone()),
            });
            entity_map.insert(booking.id, resource_id);
        }
        Event::BookingStatusChanged {
            id,
            status,
            payment_status,
            ..
        } => {
            if let Some(Interval {
                kind: IntervalKind::Booking(b),
                ..
            }) = rs.interval_mut(*id)
            {
                b.status = *status;
                b.payment_status = *payment_status;
            }
        }
        // ResourceCreated is handled at the DashMap level, not here
        Event::ResourceCreated { .. } => {}
    }
}

fn set_hold_status(rs: &mut ResourceState, id: Ulid, status: HoldStatus) {
    if let Some(Interval {
        kind: IntervalKind::Hold(h),
        ..
    }) = rs.interval_mut(id)
    {
        h.status = status;
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        Self::with_clock(wal_path, Arc::new(conflict::now_ms))
    }

    /// Replay the WAL at `wal_path` and start its writer task.
    pub fn with_clock(wal_path: PathBuf, clock: Clock) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let entity_to_resource = DashMap::new();
        let mut resources: HashMap<Ulid, ResourceState> = HashMap::new();
        for event in &events {
            match event {
                Event::ResourceCreated { config } => {
                    resources.insert(config.id, ResourceState::new(config.clone()));
                }
                other => {
                    if let Some(rs) = resources.get_mut(&other.resource_id()) {
                        apply_to_resource(rs, other, &entity_to_resource);
                    }
                }
            }
        }

        if !events.is_empty() {
            info!(
                "replayed {} events into {} resources from {}",
                events.len(),
                resources.len(),
                wal_path.display()
            );
        }

        let state = DashMap::new();
        for (id, rs) in resources {
            state.insert(id, Arc::new(RwLock::new(rs)));
        }

        Ok(Self {
            state,
            wal_tx,
            entity_to_resource,
            creation: Mutex::new(()),
            clock,
        })
    }

    pub fn now(&self) -> Ms {
        (self.clock)()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_resource.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.entity_to_resource);
        Ok(())
    }

    /// Lookup entity → resource, get resource, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .get_resource_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.write_owned().await;
        Ok((resource_id, guard))
    }

    /// Reserve a client-supplied entity id for `resource_id`. Call under the
    /// resource write lock; the claim is released on drop unless committed.
    pub(super) fn claim_id(&self, id: Ulid, resource_id: Ulid) -> Result<IdClaim<'_>, EngineError> {
        let in_use = || EngineError::Validation(format!("id {id} already in use"));
        if self.state.contains_key(&id) {
            return Err(in_use());
        }
        match self.entity_to_resource.entry(id) {
            Entry::Occupied(_) => Err(in_use()),
            Entry::Vacant(slot) => {
                slot.insert(resource_id);
                Ok(IdClaim {
                    index: &self.entity_to_resource,
                    id,
                    committed: false,
                })
            }
        }
    }

    /// Resource write lock, only if `requester` owns it. Foreign resources
    /// look the same as missing ones.
    pub(super) async fn owned_resource_write(
        &self,
        resource_id: Ulid,
        requester: &str,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.write_owned().await;
        if guard.config.owner != requester {
            return Err(EngineError::NotFound(resource_id));
        }
        Ok(guard)
    }
}
