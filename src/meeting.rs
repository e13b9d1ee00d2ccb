use std::fmt;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{Booking, MeetingLink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeetingError {
    Rejected(String),
    Unavailable(String),
}

impl fmt::Display for MeetingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeetingError::Rejected(msg) => write!(f, "meeting provider rejected request: {msg}"),
            MeetingError::Unavailable(msg) => write!(f, "meeting provider unavailable: {msg}"),
        }
    }
}

impl std::error::Error for MeetingError {}

/// Calendar / video-call integration. Failures never fail a booking.
#[async_trait]
pub trait MeetingLinkProvider: Send + Sync {
    async fn create_link(&self, booking: &Booking) -> Result<MeetingLink, MeetingError>;

    async fn update_link(&self, external_event_id: &str, booking: &Booking) -> Result<(), MeetingError>;

    async fn cancel_link(&self, external_event_id: &str) -> Result<(), MeetingError>;
}

/// Deterministic rooms under a fixed base URL, one per reference id.
pub struct LocalMeetingLinks {
    base_url: String,
}

impl LocalMeetingLinks {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MeetingLinkProvider for LocalMeetingLinks {
    async fn create_link(&self, booking: &Booking) -> Result<MeetingLink, MeetingError> {
        Ok(MeetingLink {
            url: format!("{}/{}", self.base_url, booking.reference_id),
            external_event_id: Ulid::new().to_string(),
        })
    }

    async fn update_link(&self, external_event_id: &str, booking: &Booking) -> Result<(), MeetingError> {
        tracing::debug!("meeting {external_event_id} now tracks {}", booking.reference_id);
        Ok(())
    }

    async fn cancel_link(&self, external_event_id: &str) -> Result<(), MeetingError> {
        tracing::debug!("meeting {external_event_id} cancelled");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// Records calls; `fail` makes every call error.
    #[derive(Default)]
    pub struct RecordingMeetings {
        pub fail: AtomicBool,
        pub calls: Mutex<Vec<String>>,
    }

    impl RecordingMeetings {
        fn record(&self, call: String) -> Result<(), MeetingError> {
            self.calls.lock().unwrap().push(call);
            if self.fail.load(Ordering::SeqCst) {
                return Err(MeetingError::Unavailable("calendar API down".into()));
            }
            Ok(())
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MeetingLinkProvider for RecordingMeetings {
        async fn create_link(&self, booking: &Booking) -> Result<MeetingLink, MeetingError> {
            self.record(format!("create {}", booking.reference_id))?;
            Ok(MeetingLink {
                url: format!("https://meet.test/{}", booking.reference_id),
                external_event_id: format!("evt-{}", booking.reference_id),
            })
        }

        async fn update_link(&self, external_event_id: &str, _booking: &Booking) -> Result<(), MeetingError> {
            self.record(format!("update {external_event_id}"))
        }

        async fn cancel_link(&self, external_event_id: &str) -> Result<(), MeetingError> {
            self.record(format!("cancel {external_event_id}"))
        }
    }
}
