use std::sync::Arc;

use tracing::warn;

use crate::auth::SharedSecret;
use crate::business::BusinessManager;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::scheduler::{ReminderScheduler, TickReport};

/// Staff operations. Every call presents the shared secret first.
pub struct Admin {
    businesses: Arc<BusinessManager>,
    scheduler: Arc<ReminderScheduler>,
    secret: SharedSecret,
}

impl Admin {
    pub fn new(
        businesses: Arc<BusinessManager>,
        scheduler: Arc<ReminderScheduler>,
        secret: SharedSecret,
    ) -> Self {
        Self {
            businesses,
            scheduler,
            secret,
        }
    }

    /// Check a presented token. Refusals are logged and counted.
    pub fn authorize(&self, token: &str) -> Result<(), EngineError> {
        if self.secret.verify(token) {
            return Ok(());
        }
        warn!("staff operation refused: bad secret");
        metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
        Err(EngineError::Unauthorized)
    }

    fn engine(&self, token: &str, business: &str) -> Result<Arc<Engine>, EngineError> {
        self.authorize(token)?;
        self.businesses
            .get(business)
            .ok_or_else(|| EngineError::NotFound(business.to_string()))
    }

    pub async fn peek_counter(&self, token: &str, business: &str) -> Result<Option<YearCounter>, EngineError> {
        self.engine(token, business)?.peek_counter().await
    }

    pub async fn reset_counter(&self, token: &str, business: &str) -> Result<(), EngineError> {
        self.engine(token, business)?.reset_counter().await
    }

    pub async fn set_status(
        &self,
        token: &str,
        business: &str,
        reference_id: &str,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        self.engine(token, business)?.set_status(reference_id, status).await
    }

    pub async fn assign(
        &self,
        token: &str,
        business: &str,
        reference_id: &str,
        consultant_id: &str,
    ) -> Result<Booking, EngineError> {
        self.engine(token, business)?.assign(reference_id, consultant_id).await
    }

    pub async fn cancel(&self, token: &str, business: &str, reference_id: &str) -> Result<Booking, EngineError> {
        self.engine(token, business)?.cancel(reference_id).await
    }

    pub async fn upsert_consultant(
        &self,
        token: &str,
        business: &str,
        consultant: Consultant,
    ) -> Result<(), EngineError> {
        self.engine(token, business)?.upsert_consultant(consultant).await
    }

    pub async fn set_consultant_status(
        &self,
        token: &str,
        business: &str,
        consultant_id: &str,
        status: ConsultantStatus,
    ) -> Result<Consultant, EngineError> {
        self.engine(token, business)?
            .set_consultant_status(consultant_id, status)
            .await
    }

    pub async fn add_unavailable_slot(
        &self,
        token: &str,
        business: &str,
        consultant_id: &str,
        slot: UnavailableSlot,
    ) -> Result<Consultant, EngineError> {
        self.engine(token, business)?
            .add_unavailable_slot(consultant_id, slot)
            .await
    }

    pub async fn remove_unavailable_slot(
        &self,
        token: &str,
        business: &str,
        consultant_id: &str,
        index: usize,
    ) -> Result<Consultant, EngineError> {
        self.engine(token, business)?
            .remove_unavailable_slot(consultant_id, index)
            .await
    }

    /// Run the coarse then the fine tick immediately, across all businesses.
    pub async fn run_reminders_now(&self, token: &str) -> Result<(TickReport, TickReport), EngineError> {
        self.authorize(token)?;
        let coarse = self.scheduler.coarse_tick().await;
        let fine = self.scheduler.fine_tick().await;
        Ok((coarse, fine))
    }
}
