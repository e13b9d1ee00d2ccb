use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

use crate::model::*;
use crate::window;

use super::{Engine, EngineError};

// ── Pure checks ───────────────────────────────────────────────────

/// Does any blackout overlap `span`? Blackouts on neighbouring dates count
/// when the slot runs across midnight.
pub fn blocked_by_unavailable(consultant: &Consultant, span: &Span) -> bool {
    consultant
        .unavailable_slots
        .iter()
        .filter(|u| u.is_well_formed())
        .any(|u| u.span().overlaps(span))
}

/// Does any slot-occupying booking other than `exclude` overlap `span`?
pub fn busy_with_bookings(bookings: &[Booking], span: &Span, exclude: Option<&str>) -> bool {
    bookings.iter().any(|b| {
        exclude.is_none_or(|ex| b.reference_id != ex) && b.occupies_slot() && b.span().overlaps(span)
    })
}

impl Engine {
    /// Is the consultant active, free of blackouts and free of other paid
    /// bookings over the requested slot?
    pub async fn is_consultant_available(
        &self,
        consultant_id: &str,
        date: NaiveDate,
        time_slot: NaiveTime,
        duration_minutes: i64,
    ) -> Result<bool, EngineError> {
        let span = window::to_interval(date, time_slot, duration_minutes)?;
        Ok(self
            .available_consultant(consultant_id, date, &span, None)
            .await?
            .is_some())
    }

    /// Active consultants free over the slot, ordered by id.
    pub async fn list_available_consultants(
        &self,
        date: NaiveDate,
        time_slot: NaiveTime,
        duration_minutes: i64,
    ) -> Result<Vec<Consultant>, EngineError> {
        let span = window::to_interval(date, time_slot, duration_minutes)?;
        let consultants = self.store.list_consultants(Some(ConsultantStatus::Active)).await?;

        // One query per touched date, grouped per consultant.
        let mut booked: HashMap<String, Vec<Booking>> = HashMap::new();
        for b in self.bookings_around(date, &span, BookingFilter::default().paid()).await? {
            if let Some(id) = b.consultant_id() {
                booked.entry(id.to_string()).or_default().push(b);
            }
        }

        Ok(consultants
            .into_iter()
            .filter(|c| !blocked_by_unavailable(c, &span))
            .filter(|c| {
                booked
                    .get(&c.id)
                    .is_none_or(|bs| !busy_with_bookings(bs, &span, None))
            })
            .collect())
    }

    /// The consultant document if they can take `span` on `date`; `None`
    /// when missing, inactive, blacked out or already booked.
    pub(super) async fn available_consultant(
        &self,
        consultant_id: &str,
        date: NaiveDate,
        span: &Span,
        exclude: Option<&str>,
    ) -> Result<Option<Consultant>, EngineError> {
        let Some(consultant) = self.store.get_consultant(consultant_id).await? else {
            debug!("{}: consultant {consultant_id} not found", self.profile.name);
            return Ok(None);
        };
        if !consultant.is_active() {
            debug!("{}: consultant {consultant_id} is inactive", self.profile.name);
            return Ok(None);
        }
        if blocked_by_unavailable(&consultant, span) {
            return Ok(None);
        }
        let bookings = self
            .bookings_around(date, span, BookingFilter::default().paid().assigned_to(consultant_id))
            .await?;
        if busy_with_bookings(&bookings, span, exclude) {
            return Ok(None);
        }
        Ok(Some(consultant))
    }
}
