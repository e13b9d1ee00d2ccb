use tracing::info;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_consultant_id;
use super::{Engine, EngineError};

fn validate_unavailable(slot: &UnavailableSlot) -> Result<(), EngineError> {
    if !slot.is_well_formed() {
        return Err(EngineError::InvalidInput(format!(
            "unavailable slot on {} ends before it starts",
            slot.date
        )));
    }
    if slot.reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
        return Err(EngineError::LimitExceeded("unavailable reason too long"));
    }
    Ok(())
}

fn validate_consultant(c: &Consultant) -> Result<(), EngineError> {
    validate_consultant_id(&c.id)?;
    if c.name.trim().is_empty() {
        return Err(EngineError::InvalidInput("consultant name is required".into()));
    }
    if c.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("consultant name too long"));
    }
    if c.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("consultant email too long"));
    }
    if c.unavailable_slots.len() > MAX_UNAVAILABLE_SLOTS {
        return Err(EngineError::LimitExceeded("too many unavailable slots"));
    }
    c.unavailable_slots.iter().try_for_each(validate_unavailable)
}

impl Engine {
    pub async fn upsert_consultant(&self, consultant: Consultant) -> Result<(), EngineError> {
        validate_consultant(&consultant)?;
        let _gate = self.slot_gate.lock().await;
        info!("{}: upsert consultant {}", self.profile.name, consultant.id);
        self.store.put_consultant(consultant).await?;
        Ok(())
    }

    pub async fn set_consultant_status(
        &self,
        consultant_id: &str,
        status: ConsultantStatus,
    ) -> Result<Consultant, EngineError> {
        self.edit_consultant(consultant_id, |c| {
            c.status = status;
            Ok(())
        })
        .await
    }

    pub async fn add_unavailable_slot(
        &self,
        consultant_id: &str,
        slot: UnavailableSlot,
    ) -> Result<Consultant, EngineError> {
        validate_unavailable(&slot)?;
        self.edit_consultant(consultant_id, move |c| {
            if c.unavailable_slots.len() >= MAX_UNAVAILABLE_SLOTS {
                return Err(EngineError::LimitExceeded("too many unavailable slots"));
            }
            c.unavailable_slots.push(slot);
            Ok(())
        })
        .await
    }

    /// Remove the blackout at `index` in the consultant's list.
    pub async fn remove_unavailable_slot(
        &self,
        consultant_id: &str,
        index: usize,
    ) -> Result<Consultant, EngineError> {
        self.edit_consultant(consultant_id, move |c| {
            if index >= c.unavailable_slots.len() {
                return Err(EngineError::InvalidInput(format!(
                    "no unavailable slot at index {index}"
                )));
            }
            c.unavailable_slots.remove(index);
            Ok(())
        })
        .await
    }

    async fn edit_consultant(
        &self,
        consultant_id: &str,
        edit: impl FnOnce(&mut Consultant) -> Result<(), EngineError>,
    ) -> Result<Consultant, EngineError> {
        let _gate = self.slot_gate.lock().await;
        let mut consultant = self
            .store
            .get_consultant(consultant_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(consultant_id.to_string()))?;
        edit(&mut consultant)?;
        self.store.put_consultant(consultant.clone()).await?;
        info!("{}: updated consultant {consultant_id}", self.profile.name);
        Ok(consultant)
    }
}
