use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_CONFIRMED_TOTAL, HOLDS_EXPIRED_TOTAL, SLOT_REJECTIONS_TOTAL};

use super::conflict::{check_no_conflict, rejection_reason, validate_requester, ConflictScope};
use super::{Engine, EngineError};

fn validate_customer(customer: &CustomerInfo) -> Result<(), EngineError> {
    if customer.name.trim().is_empty() {
        return Err(EngineError::Validation("customer_name is required".into()));
    }
    if customer.email.trim().is_empty() {
        return Err(EngineError::Validation("customer_email is required".into()));
    }
    if !customer.email.contains('@') {
        return Err(EngineError::Validation("customer_email is not an address".into()));
    }
    if customer.name.len() > MAX_NAME_LEN
        || customer.email.len() > MAX_NAME_LEN
        || customer.phone.as_ref().is_some_and(|p| p.len() > MAX_NAME_LEN)
    {
        return Err(EngineError::LimitExceeded("customer field too long"));
    }
    if customer.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    if customer.total_amount.is_some_and(|a| a < 0) {
        return Err(EngineError::Validation("total_amount must not be negative".into()));
    }
    Ok(())
}

impl Engine {
    /// Turn the requester's active hold into a pending booking.
    pub async fn confirm_booking(
        &self,
        hold_id: Ulid,
        customer: CustomerInfo,
        requester: &str,
    ) -> Result<Booking, EngineError> {
        validate_requester(requester)?;
        validate_customer(&customer)?;

        let (resource_id, mut guard) = self.resolve_entity_write(&hold_id).await?;
        let hold = match guard.hold(hold_id) {
            Some(h) if h.status == HoldStatus::Active && h.created_by == requester => h.clone(),
            _ => return Err(EngineError::NotFound(hold_id)),
        };
        if guard.intervals.len() >= MAX_INTERVALS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many intervals on resource"));
        }

        let now = self.now();
        if now > hold.expires_at {
            let event = Event::HoldExpired { id: hold_id, resource_id };
            match self.persist_and_apply(&mut guard, &event).await {
                Ok(()) => metrics::counter!(HOLDS_EXPIRED_TOTAL).increment(1),
                Err(e) => warn!("could not record expiry of hold {hold_id}: {e}"),
            }
            return Err(EngineError::Expired(hold_id));
        }

        if let Err(e) = check_no_conflict(&guard, &hold.span, now, ConflictScope::Confirming { hold_id }) {
            metrics::counter!(SLOT_REJECTIONS_TOTAL, "stage" => "confirm", "reason" => rejection_reason(&e))
                .increment(1);
            debug!("confirmation of hold {hold_id} rejected: {e}");
            return Err(e);
        }

        let payment_status = if customer.total_amount.is_some() {
            PaymentStatus::Pending
        } else {
            PaymentStatus::Paid
        };
        let booking = Booking {
            id: Ulid::new(),
            resource_id,
            hold_id,
            span: hold.span,
            created_by: requester.to_string(),
            status: BookingStatus::Pending,
            payment_status,
            customer,
            created_at: now,
        };
        self.persist_and_apply(&mut guard, &Event::BookingCreated { booking: booking.clone() })
            .await?;
        metrics::counter!(BOOKINGS_CONFIRMED_TOTAL).increment(1);
        info!("booking {} created from hold {hold_id} on {resource_id}", booking.id);

        // The booking is durable at this point; a failed status flip only
        // leaves a hold that no longer matters once its TTL runs out.
        let retire = Event::HoldConfirmed { id: hold_id, resource_id };
        if let Err(e) = self.persist_and_apply(&mut guard, &retire).await {
            warn!("booking {} stands but hold {hold_id} was not marked confirmed: {e}", booking.id);
        }
        Ok(booking)
    }

    /// Change a booking's status and/or payment status.
    ///
    /// Allowed for the customer who booked and for the resource owner.
    /// Reviving a cancelled booking re-runs the conflict check.
    pub async fn update_booking(
        &self,
        id: Ulid,
        status: Option<BookingStatus>,
        payment_status: Option<PaymentStatus>,
        requester: &str,
    ) -> Result<Booking, EngineError> {
        validate_requester(requester)?;
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = match guard.booking(id) {
            Some(b) if b.created_by == requester || guard.config.owner == requester => b.clone(),
            _ => return Err(EngineError::NotFound(id)),
        };

        let status = status.unwrap_or(current.status);
        let payment_status = payment_status.unwrap_or(current.payment_status);
        if status == current.status && payment_status == current.payment_status {
            return Ok(current);
        }

        if !current.occupies() && status != BookingStatus::Cancelled {
            let scope = ConflictScope::Confirming { hold_id: current.hold_id };
            check_no_conflict(&guard, &current.span, self.now(), scope)?;
        }

        let event = Event::BookingStatusChanged {
            id,
            resource_id,
            status,
            payment_status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(
            "booking {id} now {}/{}",
            status.as_str(),
            payment_status.as_str()
        );
        Ok(Booking {
            status,
            payment_status,
            ..current
        })
    }
}
