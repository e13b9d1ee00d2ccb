use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::warn;

use crate::model::*;

use super::wal::Wal;
use super::{CounterUpdate, DocumentStore, StoreError};

pub type SharedBooking = Arc<RwLock<Booking>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: StoreEvent,
        response: oneshot::Sender<io::Result<()>>,
    },
    Control(Control),
}

enum Control {
    Compact {
        events: Vec<StoreEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (StoreEvent, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that are already queued when the first one arrives
/// share a single fsync; everyone in the batch gets the same outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            WalCommand::Control(control) => {
                run_control(&mut wal, control);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut after = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                WalCommand::Control(control) => {
                    after = Some(control);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = std::time::Instant::now();
        let result = commit_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            warn!("{}: WAL commit of {} events failed: {e}", wal.path().display(), batch.len());
        }
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        if let Some(control) = after {
            run_control(&mut wal, control);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let pushed = batch.iter().try_for_each(|(event, _)| wal.push(event));
    // Commit regardless, so a half-written batch never leaks into the next.
    let committed = wal.commit();
    pushed.and(committed)
}

fn run_control(wal: &mut Wal, control: Control) {
    match control {
        Control::Compact { events, response } => {
            let result = Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            let _ = response.send(result);
        }
        Control::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

fn wal_closed() -> StoreError {
    StoreError::Io("WAL writer shut down".into())
}

/// Document store kept in memory and made durable by a write-ahead log.
///
/// Every mutation holds the document's write lock across log append and
/// in-memory apply, so the log order matches the state other readers see.
pub struct WalStore {
    wal_tx: mpsc::Sender<WalCommand>,
    bookings: DashMap<String, SharedBooking>,
    /// Date → reference ids. Dates never change after insert.
    by_date: DashMap<NaiveDate, Vec<String>>,
    consultants: DashMap<String, Consultant>,
    counter: Mutex<Option<YearCounter>>,
    /// Serializes booking inserts and consultant writes.
    catalog: Mutex<()>,
    /// Mutations hold it shared; compaction holds it exclusively.
    gate: RwLock<()>,
}

impl WalStore {
    /// Replay the log at `path` and start its writer task.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, replay) = Wal::recover(path)?;
        if replay.torn_bytes() > 0 {
            warn!(
                "{}: dropped {} bytes of torn log tail",
                path.display(),
                replay.torn_bytes()
            );
        }
        let events = replay.events;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut bookings: HashMap<String, Booking> = HashMap::new();
        let mut consultants: HashMap<String, Consultant> = HashMap::new();
        let mut counter = None;

        for event in events {
            match event {
                StoreEvent::BookingInserted(b) => {
                    bookings.insert(b.reference_id.clone(), b);
                }
                StoreEvent::BookingPatched {
                    reference_id,
                    patch,
                    at,
                } => {
                    if let Some(b) = bookings.get_mut(&reference_id) {
                        patch.apply(b, at);
                    }
                }
                StoreEvent::ReminderMarked {
                    reference_id,
                    kind,
                    at,
                } => {
                    if let Some(b) = bookings.get_mut(&reference_id) {
                        b.reminders.mark(kind, at);
                    }
                }
                StoreEvent::ReminderCleared {
                    reference_id,
                    kind,
                    at,
                } => {
                    if let Some(b) = bookings.get_mut(&reference_id) {
                        b.reminders.clear_if(kind, at);
                    }
                }
                StoreEvent::ConsultantPut(c) => {
                    consultants.insert(c.id.clone(), c);
                }
                StoreEvent::CounterWritten(c) => counter = Some(c),
            }
        }

        let store = Self {
            wal_tx,
            bookings: DashMap::new(),
            by_date: DashMap::new(),
            consultants: consultants.into_iter().collect(),
            counter: Mutex::new(counter),
            catalog: Mutex::new(()),
            gate: RwLock::new(()),
        };
        for (id, booking) in bookings {
            store.by_date.entry(booking.date).or_default().push(id.clone());
            store.bookings.insert(id, Arc::new(RwLock::new(booking)));
        }
        Ok(store)
    }

    async fn wal_append(&self, event: StoreEvent) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event,
                response: tx,
            })
            .await
            .map_err(|_| wal_closed())?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    fn shared_booking(&self, reference_id: &str) -> Result<SharedBooking, StoreError> {
        self.bookings
            .get(reference_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(reference_id.to_string()))
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    /// Rewrite the log as a snapshot of the current documents.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.gate.write().await;

        let mut events: Vec<StoreEvent> = self
            .consultants
            .iter()
            .map(|e| StoreEvent::ConsultantPut(e.value().clone()))
            .collect();
        if let Some(c) = self.counter.lock().await.clone() {
            events.push(StoreEvent::CounterWritten(c));
        }
        let docs: Vec<SharedBooking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        for doc in docs {
            events.push(StoreEvent::BookingInserted(doc.read().await.clone()));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Control(Control::Compact {
                events,
                response: tx,
            }))
            .await
            .map_err(|_| wal_closed())?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::Control(Control::AppendsSinceCompact { response: tx }))
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for WalStore {
    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        let id = booking.reference_id.clone();
        if self.bookings.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        self.wal_append(StoreEvent::BookingInserted(booking.clone()))
            .await?;
        self.by_date.entry(booking.date).or_default().push(id.clone());
        self.bookings.insert(id, Arc::new(RwLock::new(booking)));
        Ok(())
    }

    async fn get_booking(&self, reference_id: &str) -> Result<Option<Booking>, StoreError> {
        let Some(doc) = self.bookings.get(reference_id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let booking = doc.read().await.clone();
        Ok(Some(booking))
    }

    async fn update_booking(
        &self,
        reference_id: &str,
        patch: BookingPatch,
        at: DateTime<Utc>,
    ) -> Result<Booking, StoreError> {
        let _gate = self.gate.read().await;
        let doc = self.shared_booking(reference_id)?;
        let mut guard = doc.write().await;
        self.wal_append(StoreEvent::BookingPatched {
            reference_id: reference_id.to_string(),
            patch: patch.clone(),
            at,
        })
        .await?;
        patch.apply(&mut guard, at);
        Ok(guard.clone())
    }

    async fn query_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        // Collect handles first; no map guard may live across an await.
        let docs: Vec<SharedBooking> = match filter.date {
            Some(date) => {
                let ids = self
                    .by_date
                    .get(&date)
                    .map(|e| e.value().clone())
                    .unwrap_or_default();
                ids.iter()
                    .filter_map(|id| self.bookings.get(id).map(|e| e.value().clone()))
                    .collect()
            }
            None => self.bookings.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for doc in docs {
            let guard = doc.read().await;
            if filter.matches(&guard) {
                out.push(guard.clone());
            }
        }
        out.sort_by(|a, b| {
            (a.date, a.time_slot, &a.reference_id).cmp(&(b.date, b.time_slot, &b.reference_id))
        });
        Ok(out)
    }

    async fn mark_reminder_if_unset(
        &self,
        reference_id: &str,
        kind: ReminderKind,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let _gate = self.gate.read().await;
        let doc = self.shared_booking(reference_id)?;
        let mut guard = doc.write().await;
        if guard.reminders.is_sent(kind) {
            return Ok(false);
        }
        self.wal_append(StoreEvent::ReminderMarked {
            reference_id: reference_id.to_string(),
            kind,
            at,
        })
        .await?;
        guard.reminders.mark(kind, at);
        Ok(true)
    }

    async fn clear_reminder(
        &self,
        reference_id: &str,
        kind: ReminderKind,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let _gate = self.gate.read().await;
        let doc = self.shared_booking(reference_id)?;
        let mut guard = doc.write().await;
        if guard.reminders.sent_at(kind) != Some(claimed_at) {
            return Ok(false);
        }
        self.wal_append(StoreEvent::ReminderCleared {
            reference_id: reference_id.to_string(),
            kind,
            at: claimed_at,
        })
        .await?;
        guard.reminders.clear_if(kind, claimed_at);
        Ok(true)
    }

    async fn put_consultant(&self, consultant: Consultant) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        self.wal_append(StoreEvent::ConsultantPut(consultant.clone()))
            .await?;
        self.consultants.insert(consultant.id.clone(), consultant);
        Ok(())
    }

    async fn get_consultant(&self, id: &str) -> Result<Option<Consultant>, StoreError> {
        Ok(self.consultants.get(id).map(|e| e.value().clone()))
    }

    async fn list_consultants(
        &self,
        status: Option<ConsultantStatus>,
    ) -> Result<Vec<Consultant>, StoreError> {
        let mut out: Vec<Consultant> = self
            .consultants
            .iter()
            .filter(|e| status.is_none_or(|s| e.value().status == s))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn read_counter(&self) -> Result<Option<YearCounter>, StoreError> {
        Ok(self.counter.lock().await.clone())
    }

    async fn write_counter(&self, counter: YearCounter) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let mut guard = self.counter.lock().await;
        self.wal_append(StoreEvent::CounterWritten(counter.clone()))
            .await?;
        *guard = Some(counter);
        Ok(())
    }

    async fn transact_counter(&self, update: CounterUpdate<'_>) -> Result<YearCounter, StoreError> {
        let _gate = self.gate.read().await;
        let mut guard = self.counter.lock().await;
        let next = update(guard.as_ref());
        self.wal_append(StoreEvent::CounterWritten(next.clone()))
            .await?;
        *guard = Some(next.clone());
        Ok(next)
    }
}
