//! Contract of the transactional document store the booking core runs on,
//! plus the WAL-backed implementation the binary ships with.

mod wal;
mod wal_store;

pub use wal::{Replay, Wal};
pub use wal_store::WalStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(String),
    AlreadyExists(String),
    /// The atomic transaction lost a race or timed out; safe to retry.
    Aborted(String),
    Io(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(key) => write!(f, "document not found: {key}"),
            StoreError::AlreadyExists(key) => write!(f, "document already exists: {key}"),
            StoreError::Aborted(msg) => write!(f, "transaction aborted: {msg}"),
            StoreError::Io(msg) => write!(f, "store I/O error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Body of a counter transaction: current document in, replacement out.
pub type CounterUpdate<'a> = &'a (dyn Fn(Option<&YearCounter>) -> YearCounter + Send + Sync);

/// One business's documents: bookings, consultants and the year counter.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create-only write. Fails `AlreadyExists` if the reference id is taken.
    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError>;

    async fn get_booking(&self, reference_id: &str) -> Result<Option<Booking>, StoreError>;

    /// Partial-field update; returns the document as written.
    async fn update_booking(
        &self,
        reference_id: &str,
        patch: BookingPatch,
        at: DateTime<Utc>,
    ) -> Result<Booking, StoreError>;

    async fn query_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError>;

    /// Set a reminder flag only if it is unset, as one atomic step.
    /// `Ok(false)` means someone else already holds it.
    async fn mark_reminder_if_unset(
        &self,
        reference_id: &str,
        kind: ReminderKind,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Undo a claim made with `mark_reminder_if_unset`, provided the flag
    /// still carries the same timestamp.
    async fn clear_reminder(
        &self,
        reference_id: &str,
        kind: ReminderKind,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn put_consultant(&self, consultant: Consultant) -> Result<(), StoreError>;

    async fn get_consultant(&self, id: &str) -> Result<Option<Consultant>, StoreError>;

    async fn list_consultants(
        &self,
        status: Option<ConsultantStatus>,
    ) -> Result<Vec<Consultant>, StoreError>;

    /// Plain read, no isolation from concurrent transactions.
    async fn read_counter(&self) -> Result<Option<YearCounter>, StoreError>;

    /// Blind overwrite, outside any transaction.
    async fn write_counter(&self, counter: YearCounter) -> Result<(), StoreError>;

    /// Atomic read-modify-write of the counter document.
    async fn transact_counter(&self, update: CounterUpdate<'_>) -> Result<YearCounter, StoreError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use super::*;

    pub fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_flaky");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    /// `WalStore` with switchable faults.
    pub struct FlakyStore {
        inner: WalStore,
        /// Number of upcoming counter transactions to abort.
        pub abort_counter_tx: AtomicU32,
        pub fail_inserts: AtomicBool,
    }

    impl FlakyStore {
        pub fn open(path: &Path) -> Self {
            Self {
                inner: WalStore::open(path).unwrap(),
                abort_counter_tx: AtomicU32::new(0),
                fail_inserts: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(StoreError::Io("disk full".into()));
            }
            self.inner.insert_booking(booking).await
        }

        async fn get_booking(&self, reference_id: &str) -> Result<Option<Booking>, StoreError> {
            self.inner.get_booking(reference_id).await
        }

        async fn update_booking(
            &self,
            reference_id: &str,
            patch: BookingPatch,
            at: DateTime<Utc>,
        ) -> Result<Booking, StoreError> {
            self.inner.update_booking(reference_id, patch, at).await
        }

        async fn query_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
            self.inner.query_bookings(filter).await
        }

        async fn mark_reminder_if_unset(
            &self,
            reference_id: &str,
            kind: ReminderKind,
            at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.mark_reminder_if_unset(reference_id, kind, at).await
        }

        async fn clear_reminder(
            &self,
            reference_id: &str,
            kind: ReminderKind,
            claimed_at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.clear_reminder(reference_id, kind, claimed_at).await
        }

        async fn put_consultant(&self, consultant: Consultant) -> Result<(), StoreError> {
            self.inner.put_consultant(consultant).await
        }

        async fn get_consultant(&self, id: &str) -> Result<Option<Consultant>, StoreError> {
            self.inner.get_consultant(id).await
        }

        async fn list_consultants(
            &self,
            status: Option<ConsultantStatus>,
        ) -> Result<Vec<Consultant>, StoreError> {
            self.inner.list_consultants(status).await
        }

        async fn read_counter(&self) -> Result<Option<YearCounter>, StoreError> {
            self.inner.read_counter().await
        }

        async fn write_counter(&self, counter: YearCounter) -> Result<(), StoreError> {
            self.inner.write_counter(counter).await
        }

        async fn transact_counter(
            &self,
            update: CounterUpdate<'_>,
        ) -> Result<YearCounter, StoreError> {
            let remaining = self.abort_counter_tx.load(Ordering::SeqCst);
            if remaining > 0 {
                self.abort_counter_tx.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Aborted("contention".into()));
            }
            self.inner.transact_counter(update).await
        }
    }
}
