use std::fmt;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::{Booking, BookingStatus, ConsultantContact, ReminderKind};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Confirmation,
    Reminder(ReminderKind),
    Cancellation,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Confirmation => f.write_str("confirmation"),
            NotificationKind::Reminder(kind) => write!(f, "{} reminder", kind.label()),
            NotificationKind::Cancellation => f.write_str("cancellation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Customer,
    Consultant,
    Admin,
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Recipient::Customer => "customer",
            Recipient::Consultant => "consultant",
            Recipient::Admin => "admin",
        })
    }
}

/// What a template needs to render any of the three notification kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingPayload {
    pub reference_id: String,
    pub business: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub date: NaiveDate,
    pub time_slot: NaiveTime,
    pub duration_minutes: u32,
    pub consultant: Option<ConsultantContact>,
    pub meeting_link: Option<String>,
    pub amount: u64,
    pub status: BookingStatus,
}

impl BookingPayload {
    pub fn new(business: &str, booking: &Booking) -> Self {
        Self {
            reference_id: booking.reference_id.clone(),
            business: business.to_string(),
            customer_name: booking.customer.name.clone(),
            customer_email: booking.customer.email.clone(),
            customer_phone: booking.customer.phone.clone(),
            date: booking.date,
            time_slot: booking.time_slot,
            duration_minutes: booking.duration_minutes,
            consultant: booking.consultant_contact.clone(),
            meeting_link: booking.meeting.as_ref().map(|m| m.url.clone()),
            amount: booking.amount,
            status: booking.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: Ulid,
    pub kind: NotificationKind,
    pub recipient: Recipient,
    pub to: String,
    pub booking: BookingPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    Rejected(String),
    Unavailable(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Rejected(msg) => write!(f, "rejected by dispatcher: {msg}"),
            DispatchError::Unavailable(msg) => write!(f, "dispatcher unavailable: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Outbound notification channel (email relay, queue, ...).
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<DispatchReceipt, DispatchError>;
}

#[derive(Debug, Default)]
pub struct FanOutReport {
    pub delivered: Vec<(Recipient, DispatchReceipt)>,
    pub failed: Vec<(Recipient, DispatchError)>,
}

impl FanOutReport {
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

/// Send one notification kind to customer, consultant (when known) and admin
/// (when configured). Recipients are independent: one failure is logged and
/// the others still go out.
pub async fn fan_out(
    dispatcher: &dyn Dispatcher,
    kind: NotificationKind,
    payload: &BookingPayload,
    admin_email: Option<&str>,
) -> FanOutReport {
    let mut targets = vec![(Recipient::Customer, payload.customer_email.clone())];
    if let Some(c) = &payload.consultant
        && !c.email.is_empty()
    {
        targets.push((Recipient::Consultant, c.email.clone()));
    }
    if let Some(admin) = admin_email {
        targets.push((Recipient::Admin, admin.to_string()));
    }

    let notifications: Vec<Notification> = targets
        .into_iter()
        .map(|(recipient, to)| Notification {
            id: Ulid::new(),
            kind,
            recipient,
            to,
            booking: payload.clone(),
        })
        .collect();

    let results = join_all(notifications.iter().map(|n| dispatcher.send(n))).await;

    let mut report = FanOutReport::default();
    for (n, result) in notifications.iter().zip(results) {
        match result {
            Ok(receipt) => {
                debug!(
                    "{kind} for {} sent to {} ({})",
                    payload.reference_id, n.recipient, receipt.message_id
                );
                report.delivered.push((n.recipient, receipt));
            }
            Err(e) => {
                warn!(
                    "{kind} for {} to {} failed: {e}",
                    payload.reference_id, n.recipient
                );
                metrics::counter!(crate::observability::DISPATCH_FAILURES_TOTAL).increment(1);
                report.failed.push((n.recipient, e));
            }
        }
    }
    report
}

/// In-process dispatcher: broadcasts every notification to subscribers.
pub struct NotifyHub {
    sender: broadcast::Sender<Notification>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Dispatcher for NotifyHub {
    /// Accepted even with nobody listening.
    async fn send(&self, notification: &Notification) -> Result<DispatchReceipt, DispatchError> {
        let _ = self.sender.send(notification.clone());
        Ok(DispatchReceipt {
            message_id: notification.id.to_string(),
        })
    }
}

/// Drain a hub subscription into the log as JSON, one line per message.
pub async fn run_outbox_logger(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(n) => match serde_json::to_string(&n) {
                Ok(json) => info!(target: "slotbook::outbox", "{json}"),
                Err(e) => warn!("unserializable notification {}: {e}", n.id),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("outbox logger lagged, skipped {skipped} notifications");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every notification and fails the configured recipients.
    #[derive(Default)]
    pub struct RecordingDispatcher {
        pub sent: Mutex<Vec<Notification>>,
        pub failing: Mutex<Vec<Recipient>>,
    }

    impl RecordingDispatcher {
        pub fn fail_for(&self, recipients: &[Recipient]) {
            *self.failing.lock().unwrap() = recipients.to_vec();
        }

        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }

        pub fn count(&self, kind: NotificationKind) -> usize {
            self.sent.lock().unwrap().iter().filter(|n| n.kind == kind).count()
        }
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn send(&self, n: &Notification) -> Result<DispatchReceipt, DispatchError> {
            if self.failing.lock().unwrap().contains(&n.recipient) {
                return Err(DispatchError::Unavailable("smtp down".into()));
            }
            self.sent.lock().unwrap().push(n.clone());
            Ok(DispatchReceipt {
                message_id: n.id.to_string(),
            })
        }
    }
}
