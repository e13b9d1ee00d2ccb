use crate::model::BookingStatus;
use crate::store::StoreError;
use crate::window::WindowError;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed request; nothing was written.
    InvalidInput(String),
    /// Conflict found while creating or assigning.
    SlotUnavailable(String),
    /// Conflict found when the payment came back.
    SlotNoLongerAvailable {
        reference_id: String,
        conflict: String,
    },
    InvalidTransition {
        reference_id: String,
        from: BookingStatus,
        action: &'static str,
    },
    CounterTransactionFailed(String),
    NotFound(String),
    LimitExceeded(&'static str),
    Unauthorized,
    Store(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::SlotUnavailable(msg) => {
                write!(f, "slot unavailable, please pick another time: {msg}")
            }
            EngineError::SlotNoLongerAvailable {
                reference_id,
                conflict,
            } => write!(
                f,
                "slot for {reference_id} is no longer available ({conflict}); manual resolution required"
            ),
            EngineError::InvalidTransition {
                reference_id,
                from,
                action,
            } => write!(f, "cannot {action} booking {reference_id} in status {from}"),
            EngineError::CounterTransactionFailed(e) => {
                write!(f, "reference counter transaction failed: {e}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Unauthorized => write!(f, "unauthorized"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

impl From<WindowError> for EngineError {
    fn from(e: WindowError) -> Self {
        EngineError::InvalidInput(e.to_string())
    }
}
