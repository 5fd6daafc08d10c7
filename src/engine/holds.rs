use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{HOLDS_EXPIRED_TOTAL, HOLDS_PLACED_TOTAL, SLOT_REJECTIONS_TOTAL};

use super::conflict::{
    check_no_conflict, rejection_reason, validate_candidate, validate_requester, ConflictScope,
};
use super::{Engine, EngineError};

impl Engine {
    /// Reserve `span` on a resource for `HOLD_TTL_MS`.
    ///
    /// Validation, the conflict check and the insert all happen under the
    /// resource write lock, so two requests for the same slot serialize and
    /// the second one sees the first one's hold.
    pub async fn create_hold(
        &self,
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        requester: &str,
    ) -> Result<Hold, EngineError> {
        validate_requester(requester)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if !guard.config.is_active {
            return Err(EngineError::NotFound(resource_id));
        }
        let claim = self.claim_id(id, resource_id)?;
        if guard.intervals.len() >= MAX_INTERVALS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many intervals on resource"));
        }

        let now = self.now();
        let checked = validate_candidate(&guard.config, &guard.calendar, &span, now)
            .and_then(|()| check_no_conflict(&guard, &span, now, ConflictScope::Everything));
        if let Err(e) = checked {
            metrics::counter!(SLOT_REJECTIONS_TOTAL, "stage" => "hold", "reason" => rejection_reason(&e))
                .increment(1);
            debug!("hold on {resource_id} rejected: {e}");
            return Err(e);
        }

        let hold = Hold {
            id,
            resource_id,
            span,
            created_by: requester.to_string(),
            status: HoldStatus::Active,
            created_at: now,
            expires_at: now + HOLD_TTL_MS,
        };
        self.persist_and_apply(&mut guard, &Event::HoldPlaced { hold: hold.clone() })
            .await?;
        claim.commit();
        metrics::counter!(HOLDS_PLACED_TOTAL).increment(1);
        debug!("hold {id} placed on {resource_id} until {}", hold.expires_at);
        Ok(hold)
    }

    /// Active holds past their TTL (strictly after `expires_at`), as `(hold_id, resource_id)`.
    /// Resources whose lock is busy are skipped until the next sweep.
    pub fn collect_expired_holds(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let Ok(guard) = entry.value().try_read() else {
                continue;
            };
            for interval in &guard.intervals {
                if let IntervalKind::Hold(h) = &interval.kind
                    && h.status == HoldStatus::Active
                    && h.expires_at < now
                {
                    expired.push((h.id, guard.id()));
                }
            }
        }
        expired
    }

    /// Mark a hold expired if it is still active past its TTL.
    /// Returns whether anything changed.
    pub async fn expire_hold(&self, id: Ulid) -> Result<bool, EngineError> {
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let now = self.now();
        let due = guard
            .hold(id)
            .is_some_and(|h| h.status == HoldStatus::Active && h.expires_at < now);
        if !due {
            return Ok(false);
        }
        self.persist_and_apply(&mut guard, &Event::HoldExpired { id, resource_id })
            .await?;
        metrics::counter!(HOLDS_EXPIRED_TOTAL).increment(1);
        Ok(true)
    }
}
