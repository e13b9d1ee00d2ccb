use chrono::{NaiveDate, Utc};

use crate::limits::*;
use crate::model::*;
use crate::window;

use super::lifecycle::BookingRequest;
use super::{Engine, EngineError};

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

pub(crate) fn validate_contact(customer: &CustomerContact) -> Result<(), EngineError> {
    if customer.name.trim().is_empty() {
        return Err(EngineError::InvalidInput("customer name is required".into()));
    }
    if customer.email.trim().is_empty() || !customer.email.contains('@') {
        return Err(EngineError::InvalidInput(format!(
            "invalid customer email: {:?}",
            customer.email
        )));
    }
    if customer.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    if customer.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("customer email too long"));
    }
    if customer.phone.as_ref().is_some_and(|p| p.len() > MAX_PHONE_LEN) {
        return Err(EngineError::LimitExceeded("customer phone too long"));
    }
    Ok(())
}

pub(crate) fn validate_consultant_id(id: &str) -> Result<(), EngineError> {
    if id.trim().is_empty() {
        return Err(EngineError::InvalidInput("consultant id is required".into()));
    }
    if id.len() > MAX_CONSULTANT_ID_LEN {
        return Err(EngineError::LimitExceeded("consultant id too long"));
    }
    Ok(())
}

/// Reject malformed requests before anything is locked or written.
pub(crate) fn validate_request(req: &BookingRequest) -> Result<Span, EngineError> {
    let span = window::to_interval(req.date, req.time_slot, req.duration_minutes)?;
    if req.duration_minutes > i64::from(MAX_DURATION_MINUTES) {
        return Err(EngineError::InvalidInput(format!(
            "duration must be at most {MAX_DURATION_MINUTES} minutes, got {}",
            req.duration_minutes
        )));
    }
    validate_contact(&req.customer)?;
    if let Some(id) = &req.consultant {
        validate_consultant_id(id)?;
    }
    Ok(span)
}

/// First booking among `candidates` that claims the same pool over an
/// overlapping interval.
///
/// Paid, non-cancelled bookings always count. With `hold_ttl` set, unpaid
/// drafts younger than the TTL count too: they are the store-visible trace
/// of a slot lock held by another process.
pub fn find_conflict<'a>(
    candidates: &'a [Booking],
    span: &Span,
    pool: &str,
    exclude: Option<&str>,
    hold_ttl: Option<Ms>,
    now: Ms,
) -> Option<&'a Booking> {
    candidates.iter().find(|b| {
        exclude.is_none_or(|ex| b.reference_id != ex)
            && b.assigned_consultant == pool
            && (b.occupies_slot() || hold_ttl.is_some_and(|ttl| b.is_fresh_draft(now, ttl)))
            && b.span().overlaps(span)
    })
}

impl Engine {
    /// Bookings matching `filter` on every date whose slots can overlap
    /// `span`, which starts on `date`. `filter.date` is ignored.
    pub(super) async fn bookings_around(
        &self,
        date: NaiveDate,
        span: &Span,
        filter: BookingFilter,
    ) -> Result<Vec<Booking>, EngineError> {
        let mut found = Vec::new();
        for day in window::dates_around(date, span) {
            let filter = BookingFilter {
                date: Some(day),
                ..filter.clone()
            };
            found.extend(self.store.query_bookings(&filter).await?);
        }
        Ok(found)
    }

    /// Look for a booking that collides with `span` in `pool`, including
    /// late bookings from the previous date that run past midnight.
    pub(super) async fn conflicting_booking(
        &self,
        date: NaiveDate,
        span: &Span,
        pool: &str,
        exclude: Option<&str>,
        include_holds: bool,
    ) -> Result<Option<Booking>, EngineError> {
        let candidates = self
            .bookings_around(date, span, BookingFilter::default().assigned_to(pool))
            .await?;
        let hold_ttl = include_holds.then_some(self.settings.lock_ttl_ms);
        Ok(find_conflict(&candidates, span, pool, exclude, hold_ttl, now_ms()).cloned())
    }
}
