use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

use crate::engine::{BusinessProfile, Engine, EngineSettings};
use crate::limits::*;
use crate::meeting::MeetingLinkProvider;
use crate::notify::Dispatcher;
use crate::reaper;
use crate::store::WalStore;

/// Per-business engines. Each business gets its own store + WAL + lock
/// sweeper + compactor.
pub struct BusinessManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    settings: EngineSettings,
    compact_threshold: u64,
    lock_sweep_every: Duration,
    dispatcher: Arc<dyn Dispatcher>,
    meetings: Option<Arc<dyn MeetingLinkProvider>>,
}

impl BusinessManager {
    pub fn new(
        data_dir: PathBuf,
        settings: EngineSettings,
        dispatcher: Arc<dyn Dispatcher>,
        meetings: Option<Arc<dyn MeetingLinkProvider>>,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            settings,
            compact_threshold: 1000,
            lock_sweep_every: Duration::from_secs(60),
            dispatcher,
            meetings,
        }
    }

    pub fn with_compact_threshold(mut self, threshold: u64) -> Self {
        self.compact_threshold = threshold;
        self
    }

    pub fn with_lock_sweep(mut self, every: Duration) -> Self {
        self.lock_sweep_every = every;
        self
    }

    /// Get or open the engine for a business. The WAL file is named after
    /// the sanitized business name.
    pub fn open(&self, profile: BusinessProfile) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(&profile.name) {
            return Ok(engine.value().clone());
        }
        if profile.name.len() > MAX_BUSINESS_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "business name too long",
            ));
        }
        if self.engines.len() >= MAX_BUSINESSES {
            return Err(std::io::Error::other("too many businesses"));
        }
        validate_prefix(&profile.prefix)?;

        // Sanitize business name to prevent path traversal
        let safe_name: String = profile
            .name
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty business name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let store = Arc::new(WalStore::open(&wal_path)?);
        info!(
            "opened business {} ({} bookings, prefix {})",
            profile.name,
            store.booking_count(),
            profile.prefix
        );
        let engine = Arc::new(Engine::new(
            profile,
            store.clone(),
            self.dispatcher.clone(),
            self.meetings.clone(),
            self.settings,
        ));

        // Spawn lock sweeper + compactor for this business
        let sweeper_engine = engine.clone();
        let every = self.lock_sweep_every;
        tokio::spawn(async move {
            reaper::run_lock_sweeper(sweeper_engine, every).await;
        });
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(store, threshold).await;
        });

        Ok(self.insert(engine))
    }

    /// Register an engine built elsewhere. An engine already registered
    /// under the same name wins.
    pub fn insert(&self, engine: Arc<Engine>) -> Arc<Engine> {
        let engine = self
            .engines
            .entry(engine.name().to_string())
            .or_insert(engine)
            .value()
            .clone();
        metrics::gauge!(crate::observability::BUSINESSES_ACTIVE).set(self.engines.len() as f64);
        engine
    }

    pub fn get(&self, name: &str) -> Option<Arc<Engine>> {
        self.engines.get(name).map(|e| e.value().clone())
    }

    /// Every engine, ordered by business name.
    pub fn engines(&self) -> Vec<Arc<Engine>> {
        let mut engines: Vec<Arc<Engine>> = self.engines.iter().map(|e| e.value().clone()).collect();
        engines.sort_by(|a, b| a.name().cmp(b.name()));
        engines
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

fn validate_prefix(prefix: &str) -> std::io::Result<()> {
    let ok = !prefix.is_empty()
        && prefix.len() <= MAX_PREFIX_LEN
        && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !prefix.ends_with('_');
    if ok {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid reference prefix {prefix:?}"),
        ))
    }
}
