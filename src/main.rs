use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use slotbook::admin::Admin;
use slotbook::auth::SharedSecret;
use slotbook::business::BusinessManager;
use slotbook::config::Config;
use slotbook::console;
use slotbook::meeting::{LocalMeetingLinks, MeetingLinkProvider};
use slotbook::notify::{self, NotifyHub};
use slotbook::scheduler::{self, ReminderScheduler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    slotbook::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let hub = Arc::new(NotifyHub::new());
    tokio::spawn(notify::run_outbox_logger(hub.subscribe()));

    let meetings: Option<Arc<dyn MeetingLinkProvider>> = config
        .meeting_base_url
        .as_deref()
        .map(|url| Arc::new(LocalMeetingLinks::new(url)) as Arc<dyn MeetingLinkProvider>);

    let businesses = Arc::new(
        BusinessManager::new(config.data_dir.clone(), config.engine_settings(), hub.clone(), meetings)
            .with_compact_threshold(config.compact_threshold)
            .with_lock_sweep(config.lock_sweep_every),
    );
    for profile in &config.businesses {
        businesses.open(profile.clone())?;
    }

    let reminders = Arc::new(ReminderScheduler::new(businesses.clone(), config.reminders.clone()));
    tokio::spawn(scheduler::run_fine(reminders.clone(), config.fine_tick_every));
    tokio::spawn(scheduler::run_coarse(reminders.clone(), config.coarse_tick_every));

    let secret = SharedSecret::new(&config.admin_secret).ok_or("SLOTBOOK_ADMIN_SECRET must not be empty")?;
    let admin = Arc::new(Admin::new(businesses.clone(), reminders, secret));
    let console_listener = TcpListener::bind(config.admin_addr).await?;
    tokio::spawn(console::run(console_listener, admin));

    info!("slotbook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  businesses: {}", businesses.len());
    info!("  admin console: {}", config.admin_addr);
    info!("  lock ttl: {} min", config.lock_ttl_minutes());
    info!(
        "  reminders: {}",
        config.reminders.iter().map(|k| k.label()).collect::<Vec<_>>().join(",")
    );
    info!("  utc offset: {}", config.utc_offset());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown on SIGTERM/ctrl-c
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutdown signal received");
    for engine in businesses.engines() {
        let held = engine.locks.len();
        if held > 0 {
            info!("{}: dropping {held} in-flight slot locks", engine.name());
        }
    }
    info!("slotbook stopped");
    Ok(())
}
