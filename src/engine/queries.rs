use chrono::{NaiveDate, NaiveDateTime};

use crate::model::*;
use crate::window;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_booking(&self, reference_id: &str) -> Result<Option<Booking>, EngineError> {
        Ok(self.store.get_booking(reference_id).await?)
    }

    pub(super) async fn require_booking(&self, reference_id: &str) -> Result<Booking, EngineError> {
        self.store
            .get_booking(reference_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(reference_id.to_string()))
    }

    /// Every booking on `date`, any status, ordered by start time.
    pub async fn bookings_on(&self, date: NaiveDate) -> Result<Vec<Booking>, EngineError> {
        Ok(self.store.query_bookings(&BookingFilter::on(date)).await?)
    }

    pub async fn get_consultant(&self, consultant_id: &str) -> Result<Option<Consultant>, EngineError> {
        Ok(self.store.get_consultant(consultant_id).await?)
    }

    pub async fn list_consultants(&self) -> Result<Vec<Consultant>, EngineError> {
        Ok(self.store.list_consultants(None).await?)
    }

    /// Paid, live bookings whose start falls within `kind`'s tolerance of
    /// `now + lead` and whose flag for `kind` is still unset.
    ///
    /// The window may straddle midnight, so every date it touches is read.
    pub async fn reminder_candidates(
        &self,
        kind: ReminderKind,
        now: NaiveDateTime,
    ) -> Result<Vec<Booking>, EngineError> {
        let target = now + kind.lead();
        let from = target - kind.tolerance();
        let to = target + kind.tolerance();
        let (from_ms, to_ms) = (window::instant_ms(from), window::instant_ms(to));

        let mut dates = vec![from.date()];
        if to.date() != from.date() {
            dates.push(to.date());
        }

        let mut due = Vec::new();
        for date in dates {
            let bookings = self.store.query_bookings(&BookingFilter::on(date).paid()).await?;
            due.extend(bookings.into_iter().filter(|b| {
                let start = b.span().start;
                b.wants_reminders() && !b.reminders.is_sent(kind) && from_ms <= start && start <= to_ms
            }));
        }
        Ok(due)
    }

    /// Counter document as stored. Display only.
    pub async fn peek_counter(&self) -> Result<Option<YearCounter>, EngineError> {
        self.issuer.peek().await
    }

    /// Restart the current year's sequence at 1. Not safe against a
    /// concurrent `create`.
    pub async fn reset_counter(&self) -> Result<(), EngineError> {
        self.issuer.reset().await
    }
}
