use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::business::BusinessManager;
use crate::engine::Engine;
use crate::model::{Booking, Cadence, ReminderKind};
use crate::notify::NotificationKind;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KindReport {
    /// Bookings inside the window with the flag unset.
    pub due: usize,
    pub sent: usize,
    /// Claimed by another scheduler first.
    pub skipped: usize,
    /// No recipient reached, or the store refused the claim; retried next tick.
    pub failed: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub kinds: BTreeMap<ReminderKind, KindReport>,
    /// Businesses whose scan could not be read from the store.
    pub scan_errors: usize,
}

impl TickReport {
    pub fn kind(&self, kind: ReminderKind) -> KindReport {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }

    pub fn sent(&self) -> usize {
        self.kinds.values().map(|k| k.sent).sum()
    }

    fn merge(&mut self, other: TickReport) {
        for (kind, r) in other.kinds {
            let entry = self.kinds.entry(kind).or_default();
            entry.due += r.due;
            entry.sent += r.sent;
            entry.skipped += r.skipped;
            entry.failed += r.failed;
        }
        self.scan_errors += other.scan_errors;
    }
}

enum Delivery {
    Sent,
    Skipped,
    Failed,
}

/// Sends each (booking, reminder kind) at most once.
///
/// A reminder is claimed in the store before it is sent, so concurrent
/// schedulers never both send it. A send that reaches nobody hands the claim
/// back and the next tick inside the window tries again.
pub struct ReminderScheduler {
    businesses: Arc<BusinessManager>,
    kinds: Vec<ReminderKind>,
}

impl ReminderScheduler {
    pub fn new(businesses: Arc<BusinessManager>, kinds: Vec<ReminderKind>) -> Self {
        Self { businesses, kinds }
    }

    pub fn kinds_for(&self, cadence: Cadence) -> Vec<ReminderKind> {
        self.kinds
            .iter()
            .copied()
            .filter(|k| k.cadence() == cadence)
            .collect()
    }

    /// 1-minute reminders, every business.
    pub async fn fine_tick(&self) -> TickReport {
        self.tick(Cadence::Fine).await
    }

    /// 12-hour and 1-hour reminders, every business.
    pub async fn coarse_tick(&self) -> TickReport {
        self.tick(Cadence::Coarse).await
    }

    pub async fn tick(&self, cadence: Cadence) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();
        for engine in self.businesses.engines() {
            let now = engine.local_now();
            report.merge(self.tick_business_at(&engine, cadence, now).await);
        }
        metrics::histogram!(
            crate::observability::REMINDER_TICK_DURATION_SECONDS,
            "cadence" => cadence_label(cadence)
        )
        .record(started.elapsed().as_secs_f64());
        report
    }

    /// One business at a fixed local instant.
    pub async fn tick_business_at(
        &self,
        engine: &Engine,
        cadence: Cadence,
        now: NaiveDateTime,
    ) -> TickReport {
        let mut report = TickReport::default();
        for kind in self.kinds_for(cadence) {
            let due = match engine.reminder_candidates(kind, now).await {
                Ok(due) => due,
                Err(e) => {
                    error!("{}: {} reminder scan failed: {e}", engine.name(), kind.label());
                    report.scan_errors += 1;
                    continue;
                }
            };
            let entry = report.kinds.entry(kind).or_default();
            entry.due += due.len();
            for booking in due {
                match deliver(engine, booking, kind).await {
                    Delivery::Sent => entry.sent += 1,
                    Delivery::Skipped => entry.skipped += 1,
                    Delivery::Failed => entry.failed += 1,
                }
            }
        }
        for (kind, r) in &report.kinds {
            if r.due > 0 {
                info!(
                    "{}: {} reminders due={} sent={} skipped={} failed={}",
                    engine.name(),
                    kind.label(),
                    r.due,
                    r.sent,
                    r.skipped,
                    r.failed
                );
            }
        }
        report
    }
}

async fn deliver(engine: &Engine, mut booking: Booking, kind: ReminderKind) -> Delivery {
    let name = engine.name();
    let reference_id = booking.reference_id.clone();
    let claimed_at = Utc::now();

    match engine
        .store()
        .mark_reminder_if_unset(&reference_id, kind, claimed_at)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            debug!("{name}: {} reminder for {reference_id} already claimed", kind.label());
            return Delivery::Skipped;
        }
        Err(e) => {
            warn!("{name}: could not claim {} reminder for {reference_id}: {e}", kind.label());
            return Delivery::Failed;
        }
    }
    booking.reminders.mark(kind, claimed_at);

    // Contact lookup failure still lets customer and admin hear about it.
    if let Some(id) = booking.consultant_id().map(str::to_string)
        && booking.consultant_contact.is_none()
    {
        match engine.get_consultant(&id).await {
            Ok(Some(c)) => booking.consultant_contact = Some(c.contact()),
            Ok(None) => warn!("{name}: consultant {id} of {reference_id} not found"),
            Err(e) => warn!("{name}: consultant {id} lookup failed: {e}"),
        }
    }

    let report = engine.notify(NotificationKind::Reminder(kind), &booking).await;
    if report.any_delivered() {
        metrics::counter!(crate::observability::REMINDERS_SENT_TOTAL, "kind" => kind.label())
            .increment(1);
        return Delivery::Sent;
    }

    warn!("{name}: {} reminder for {reference_id} reached nobody", kind.label());
    if let Err(e) = engine
        .store()
        .clear_reminder(&reference_id, kind, claimed_at)
        .await
    {
        error!("{name}: could not release {} claim on {reference_id}: {e}", kind.label());
    }
    Delivery::Failed
}

fn cadence_label(cadence: Cadence) -> &'static str {
    match cadence {
        Cadence::Fine => "fine",
        Cadence::Coarse => "coarse",
    }
}

/// Drive the fine tick on a fixed period.
pub async fn run_fine(scheduler: Arc<ReminderScheduler>, every: Duration) {
    run(scheduler, Cadence::Fine, every).await
}

/// Drive the coarse tick on a fixed period.
pub async fn run_coarse(scheduler: Arc<ReminderScheduler>, every: Duration) {
    run(scheduler, Cadence::Coarse, every).await
}

async fn run(scheduler: Arc<ReminderScheduler>, cadence: Cadence, every: Duration) {
    if scheduler.kinds_for(cadence).is_empty() {
        info!("no {} reminders configured", cadence_label(cadence));
        return;
    }
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let report = scheduler.tick(cadence).await;
        debug!("{} tick sent {}", cadence_label(cadence), report.sent());
    }
}
