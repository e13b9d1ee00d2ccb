use chrono::{NaiveDate, NaiveTime, Utc};
use tracing::{error, info, warn};

use crate::model::*;
use crate::notify::NotificationKind;
use crate::slot_lock::SlotKey;

use super::conflict::{now_ms, validate_request};
use super::{Engine, EngineError};

/// Customer-submitted booking. Raw duration so callers can pass form input
/// straight through; it is validated on `create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub date: NaiveDate,
    pub time_slot: NaiveTime,
    pub duration_minutes: i64,
    pub customer: CustomerContact,
    /// Requested consultant; `None` books from the shared pool.
    pub consultant: Option<String>,
    /// Minor currency units.
    pub amount: u64,
}

fn invalid(booking: &Booking, action: LifecycleAction) -> EngineError {
    EngineError::InvalidTransition {
        reference_id: booking.reference_id.clone(),
        from: booking.status,
        action: action.label(),
    }
}

fn record_conflict(stage: &'static str) {
    metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL, "stage" => stage).increment(1);
}

impl Engine {
    /// Validate, check the slot, lock it, issue a reference id and write the
    /// draft. Returns the new reference id.
    ///
    /// The lock stays held, tagged with the reference id, until payment
    /// completes, the draft is cancelled or the TTL lapses.
    pub async fn create(&self, req: BookingRequest) -> Result<String, EngineError> {
        let span = validate_request(&req)?;
        let pool = req.consultant.clone().unwrap_or_default();
        let name = &self.profile.name;

        let consultant = match req.consultant.as_deref() {
            Some(id) => match self.available_consultant(id, req.date, &span, None).await? {
                Some(c) => Some(c),
                None => {
                    record_conflict("create");
                    return Err(EngineError::SlotUnavailable(format!(
                        "consultant {id} is not available on {} at {}",
                        req.date, req.time_slot
                    )));
                }
            },
            None => None,
        };

        if let Some(other) = self
            .conflicting_booking(req.date, &span, &pool, None, true)
            .await?
        {
            record_conflict("create");
            return Err(EngineError::SlotUnavailable(format!(
                "overlaps {} on {} at {}",
                other.reference_id, other.date, other.time_slot
            )));
        }

        let key = SlotKey::new(req.date, req.time_slot);
        if !self.locks.acquire_at(key, self.settings.lock_ttl_ms, now_ms()) {
            record_conflict("lock");
            return Err(EngineError::SlotUnavailable(format!(
                "{} at {} is being booked by someone else",
                req.date, req.time_slot
            )));
        }
        self.record_lock_gauge();

        let reference_id = match self.issuer.issue().await {
            Ok(id) => id,
            Err(e) => {
                self.locks.release(key);
                self.record_lock_gauge();
                return Err(e);
            }
        };

        let at = Utc::now();
        let booking = Booking {
            reference_id: reference_id.clone(),
            date: req.date,
            time_slot: req.time_slot,
            duration_minutes: req.duration_minutes as u32,
            customer: req.customer,
            assigned_consultant: pool,
            consultant_contact: consultant.map(|c| c.contact()),
            amount: req.amount,
            payment_status: PaymentStatus::Pending,
            status: BookingStatus::Draft,
            meeting: None,
            reminders: ReminderFlags::default(),
            created_at: at,
            updated_at: at,
            cancelled_at: None,
        };

        if let Err(e) = self.store.insert_booking(booking).await {
            error!("{name}: failed to write draft {reference_id}: {e}");
            self.locks.release(key);
            self.record_lock_gauge();
            return Err(e.into());
        }
        self.locks.tag(key, &reference_id);

        info!(
            "{name}: draft {reference_id} for {} at {} ({} min)",
            req.date, req.time_slot, req.duration_minutes
        );
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        Ok(reference_id)
    }

    /// Payment callback. Re-checks the slot, marks the booking paid, then
    /// attaches a meeting link and sends the confirmation. Calling it again
    /// on a paid booking is a no-op.
    pub async fn mark_payment_completed(&self, reference_id: &str) -> Result<Booking, EngineError> {
        let name = &self.profile.name;
        let updated = {
            let _gate = self.slot_gate.lock().await;
            let booking = self.require_booking(reference_id).await?;
            if booking.is_paid() {
                info!("{name}: payment for {reference_id} already recorded");
                return Ok(booking);
            }
            let action = LifecycleAction::PaymentCompleted;
            let next = booking.status.apply(action).ok_or_else(|| invalid(&booking, action))?;
            let span = booking.span();

            if let Some(id) = booking.consultant_id()
                && self
                    .available_consultant(id, booking.date, &span, Some(reference_id))
                    .await?
                    .is_none()
            {
                record_conflict("payment");
                warn!("{name}: consultant {id} no longer free for paid booking {reference_id}");
                return Err(EngineError::SlotNoLongerAvailable {
                    reference_id: reference_id.to_string(),
                    conflict: format!("consultant {id} is no longer available"),
                });
            }
            if let Some(other) = self
                .conflicting_booking(
                    booking.date,
                    &span,
                    &booking.assigned_consultant,
                    Some(reference_id),
                    false,
                )
                .await?
            {
                record_conflict("payment");
                warn!(
                    "{name}: paid booking {reference_id} collides with {}",
                    other.reference_id
                );
                return Err(EngineError::SlotNoLongerAvailable {
                    reference_id: reference_id.to_string(),
                    conflict: format!("overlaps {}", other.reference_id),
                });
            }

            let patch = BookingPatch {
                status: Some(next),
                payment_status: Some(PaymentStatus::Completed),
                ..BookingPatch::default()
            };
            self.store.update_booking(reference_id, patch, Utc::now()).await?
        };

        self.locks
            .release_held_by(SlotKey::new(updated.date, updated.time_slot), reference_id);
        self.record_lock_gauge();
        info!("{name}: payment completed for {reference_id}");
        metrics::counter!(crate::observability::PAYMENTS_CONFIRMED_TOTAL).increment(1);

        let updated = self.attach_meeting(updated).await;
        self.notify(NotificationKind::Confirmation, &updated).await;
        Ok(updated)
    }

    /// Put a consultant on the booking. The consultant must exist, be active
    /// and be free over the booking's interval.
    pub async fn assign(&self, reference_id: &str, consultant_id: &str) -> Result<Booking, EngineError> {
        super::conflict::validate_consultant_id(consultant_id)?;
        let updated = {
            let _gate = self.slot_gate.lock().await;
            let booking = self.require_booking(reference_id).await?;
            if booking.status.is_terminal() {
                return Err(EngineError::InvalidTransition {
                    reference_id: reference_id.to_string(),
                    from: booking.status,
                    action: "assign",
                });
            }
            let consultant = self
                .available_consultant(consultant_id, booking.date, &booking.span(), Some(reference_id))
                .await?
                .ok_or_else(|| {
                    record_conflict("assign");
                    EngineError::SlotUnavailable(format!(
                        "consultant {consultant_id} is not available on {} at {}",
                        booking.date, booking.time_slot
                    ))
                })?;
            let patch = BookingPatch {
                assigned_consultant: Some(consultant.id.clone()),
                consultant_contact: Some(consultant.contact()),
                ..BookingPatch::default()
            };
            self.store.update_booking(reference_id, patch, Utc::now()).await?
        };
        info!("{}: {reference_id} assigned to {consultant_id}", self.profile.name);

        if let (Some(meetings), Some(meeting)) = (&self.meetings, &updated.meeting)
            && let Err(e) = meetings.update_link(&meeting.external_event_id, &updated).await
        {
            warn!("{}: meeting update for {reference_id} failed: {e}", self.profile.name);
            metrics::counter!(crate::observability::MEETING_LINK_FAILURES_TOTAL).increment(1);
        }
        Ok(updated)
    }

    /// Staff-driven status change. `cancelled` is routed through `cancel`.
    pub async fn set_status(&self, reference_id: &str, to: BookingStatus) -> Result<Booking, EngineError> {
        if to == BookingStatus::Cancelled {
            return self.cancel(reference_id).await;
        }
        let _gate = self.slot_gate.lock().await;
        let booking = self.require_booking(reference_id).await?;
        let action = LifecycleAction::SetStatus(to);
        let next = booking.status.apply(action).ok_or_else(|| invalid(&booking, action))?;
        let patch = BookingPatch {
            status: Some(next),
            ..BookingPatch::default()
        };
        let updated = self.store.update_booking(reference_id, patch, Utc::now()).await?;
        info!("{}: {reference_id} {} -> {next}", self.profile.name, booking.status);
        Ok(updated)
    }

    /// Cancel from any non-terminal status. Frees the slot, tears down the
    /// meeting and, for paid bookings, sends a cancellation notice.
    pub async fn cancel(&self, reference_id: &str) -> Result<Booking, EngineError> {
        let updated = {
            let _gate = self.slot_gate.lock().await;
            let booking = self.require_booking(reference_id).await?;
            let action = LifecycleAction::Cancel;
            let next = booking.status.apply(action).ok_or_else(|| invalid(&booking, action))?;
            let at = Utc::now();
            let patch = BookingPatch {
                status: Some(next),
                cancelled_at: Some(at),
                ..BookingPatch::default()
            };
            self.store.update_booking(reference_id, patch, at).await?
        };

        self.locks
            .release_held_by(SlotKey::new(updated.date, updated.time_slot), reference_id);
        self.record_lock_gauge();
        info!("{}: {reference_id} cancelled", self.profile.name);
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);

        if let (Some(meetings), Some(meeting)) = (&self.meetings, &updated.meeting)
            && let Err(e) = meetings.cancel_link(&meeting.external_event_id).await
        {
            warn!("{}: meeting cancel for {reference_id} failed: {e}", self.profile.name);
            metrics::counter!(crate::observability::MEETING_LINK_FAILURES_TOTAL).increment(1);
        }
        if updated.is_paid() {
            self.notify(NotificationKind::Cancellation, &updated).await;
        }
        Ok(updated)
    }

    /// Best effort: the booking is returned unchanged if the provider or
    /// the write fails.
    async fn attach_meeting(&self, booking: Booking) -> Booking {
        let Some(meetings) = &self.meetings else {
            return booking;
        };
        if booking.meeting.is_some() {
            return booking;
        }
        let link = match meetings.create_link(&booking).await {
            Ok(link) => link,
            Err(e) => {
                warn!("{}: no meeting link for {}: {e}", self.profile.name, booking.reference_id);
                metrics::counter!(crate::observability::MEETING_LINK_FAILURES_TOTAL).increment(1);
                return booking;
            }
        };
        let patch = BookingPatch {
            meeting: Some(link),
            ..BookingPatch::default()
        };
        match self.store.update_booking(&booking.reference_id, patch, Utc::now()).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!(
                    "{}: failed to store meeting link for {}: {e}",
                    self.profile.name, booking.reference_id
                );
                booking
            }
        }
    }
}
