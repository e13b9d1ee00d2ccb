mod availability;
mod conflict;
mod consultants;
mod error;
mod lifecycle;
mod queries;

pub use availability::{blocked_by_unavailable, busy_with_bookings};
pub use conflict::{find_conflict, now_ms};
pub use error::EngineError;
pub use lifecycle::BookingRequest;

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDateTime, Offset, Utc};
use tokio::sync::Mutex;

use crate::meeting::MeetingLinkProvider;
use crate::model::*;
use crate::notify::{BookingPayload, Dispatcher, FanOutReport, NotificationKind, fan_out};
use crate::reference::ReferenceIdIssuer;
use crate::slot_lock::SlotLock;
use crate::store::DocumentStore;
use crate::window::MINUTE_MS;

/// Who a booking engine serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessProfile {
    pub name: String,
    /// Reference id prefix, e.g. `NAB`.
    pub prefix: String,
    /// Copied on every notification when set.
    pub admin_email: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Slot lock lifetime; also how long an unpaid draft holds its slot.
    pub lock_ttl_ms: Ms,
    /// Business-local clock.
    pub utc_offset: FixedOffset,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_ttl_ms: 5 * MINUTE_MS,
            utc_offset: Utc.fix(),
        }
    }
}

/// The booking core of one business.
pub struct Engine {
    pub profile: BusinessProfile,
    pub(super) store: Arc<dyn DocumentStore>,
    pub locks: SlotLock,
    pub(super) issuer: ReferenceIdIssuer,
    pub(super) dispatcher: Arc<dyn Dispatcher>,
    pub(super) meetings: Option<Arc<dyn MeetingLinkProvider>>,
    pub(super) settings: EngineSettings,
    /// Serializes every write that can change who is free when: payment
    /// confirmation, assignment, status changes and consultant edits.
    pub(super) slot_gate: Mutex<()>,
}

impl Engine {
    pub fn new(
        profile: BusinessProfile,
        store: Arc<dyn DocumentStore>,
        dispatcher: Arc<dyn Dispatcher>,
        meetings: Option<Arc<dyn MeetingLinkProvider>>,
        settings: EngineSettings,
    ) -> Self {
        let issuer = ReferenceIdIssuer::new(store.clone(), profile.prefix.clone(), settings.utc_offset);
        Self {
            locks: SlotLock::new(settings.lock_ttl_ms),
            profile,
            store,
            issuer,
            dispatcher,
            meetings,
            settings,
            slot_gate: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn issuer(&self) -> &ReferenceIdIssuer {
        &self.issuer
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Wall clock on the business-local offset, as a naive date-time.
    pub fn local_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.settings.utc_offset).naive_local()
    }

    /// Fan a notification out to everyone on the booking.
    pub async fn notify(&self, kind: NotificationKind, booking: &Booking) -> FanOutReport {
        let payload = BookingPayload::new(&self.profile.name, booking);
        fan_out(
            self.dispatcher.as_ref(),
            kind,
            &payload,
            self.profile.admin_email.as_deref(),
        )
        .await
    }

    pub(super) fn record_lock_gauge(&self) {
        metrics::gauge!(crate::observability::SLOT_LOCKS_ACTIVE, "business" => self.profile.name.clone())
            .set(self.locks.len() as f64);
    }
}
