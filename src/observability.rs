use std::net::SocketAddr;

// ── Booking flow (request-driven) ───────────────────────────────

/// Counter: drafts written.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotbook_bookings_created_total";

/// Counter: payments accepted onto a slot.
pub const PAYMENTS_CONFIRMED_TOTAL: &str = "slotbook_payments_confirmed_total";

/// Counter: bookings moved to cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "slotbook_bookings_cancelled_total";

/// Counter: requests refused because the slot was taken. Labels: stage.
pub const SLOT_CONFLICTS_TOTAL: &str = "slotbook_slot_conflicts_total";

/// Counter: reference ids handed out.
pub const REFERENCE_IDS_ISSUED_TOTAL: &str = "slotbook_reference_ids_issued_total";

/// Counter: aborted counter transactions that were retried.
pub const COUNTER_TX_RETRIES_TOTAL: &str = "slotbook_counter_tx_retries_total";

// ── Side effects ────────────────────────────────────────────────

/// Counter: reminders delivered to at least one recipient. Labels: kind.
pub const REMINDERS_SENT_TOTAL: &str = "slotbook_reminders_sent_total";

/// Histogram: scheduler tick duration in seconds. Labels: cadence.
pub const REMINDER_TICK_DURATION_SECONDS: &str = "slotbook_reminder_tick_duration_seconds";

/// Counter: per-recipient notification failures.
pub const DISPATCH_FAILURES_TOTAL: &str = "slotbook_dispatch_failures_total";

/// Counter: meeting link create/update/cancel failures.
pub const MEETING_LINK_FAILURES_TOTAL: &str = "slotbook_meeting_link_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: slot locks currently held. Labels: business.
pub const SLOT_LOCKS_ACTIVE: &str = "slotbook_slot_locks_active";

/// Counter: expired locks removed by the sweeper.
pub const SLOT_LOCKS_EXPIRED_TOTAL: &str = "slotbook_slot_locks_expired_total";

/// Gauge: number of loaded businesses.
pub const BUSINESSES_ACTIVE: &str = "slotbook_businesses_active";

/// Counter: admin calls refused for a bad secret.
pub const AUTH_FAILURES_TOTAL: &str = "slotbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        tracing::error!("failed to install Prometheus metrics exporter: {e}");
        return;
    }
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
