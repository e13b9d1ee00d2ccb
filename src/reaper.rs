use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, now_ms};
use crate::store::WalStore;

const COMPACT_CHECK_EVERY: Duration = Duration::from_secs(30);

/// Background task that periodically drops expired slot locks.
pub async fn run_lock_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_locks(&engine);
    }
}

pub fn sweep_locks(engine: &Engine) -> usize {
    let swept = engine.locks.sweep(now_ms());
    if swept > 0 {
        debug!("{}: swept {swept} expired slot locks", engine.name());
        metrics::counter!(crate::observability::SLOT_LOCKS_EXPIRED_TOTAL).increment(swept as u64);
    }
    metrics::gauge!(crate::observability::SLOT_LOCKS_ACTIVE, "business" => engine.name().to_string())
        .set(engine.locks.len() as f64);
    swept
}

/// Background task that rewrites the WAL once it has grown past `threshold`
/// appends since the last compaction.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_EVERY);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

pub async fn compact_if_needed(store: &WalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}
