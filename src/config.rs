use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::engine::{BusinessProfile, EngineSettings};
use crate::model::ReminderKind;
use crate::window::MINUTE_MS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "{var} must be set"),
            ConfigError::Invalid { var, value } => write!(f, "invalid {var}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Process configuration, read once from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub businesses: Vec<BusinessProfile>,
    pub admin_secret: String,
    /// Where the staff console listens.
    pub admin_addr: SocketAddr,
    pub lock_ttl: Duration,
    pub lock_sweep_every: Duration,
    pub fine_tick_every: Duration,
    pub coarse_tick_every: Duration,
    pub reminders: Vec<ReminderKind>,
    pub utc_offset_minutes: i32,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub meeting_base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            businesses: vec![BusinessProfile {
                name: "nab".into(),
                prefix: "NAB".into(),
                admin_email: Some("admin@example.com".into()),
            }],
            admin_secret: String::new(),
            admin_addr: SocketAddr::from(([127, 0, 0, 1], 7480)),
            lock_ttl: Duration::from_secs(300),
            lock_sweep_every: Duration::from_secs(60),
            fine_tick_every: Duration::from_secs(60),
            coarse_tick_every: Duration::from_secs(3600),
            reminders: ReminderKind::ALL.to_vec(),
            utc_offset_minutes: 0,
            compact_threshold: 1000,
            metrics_port: None,
            meeting_base_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset or empty variables take the
    /// default, except the admin secret which is required.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(dir) = get("SLOTBOOK_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(list) = get("SLOTBOOK_BUSINESSES") {
            config.businesses = parse_businesses(&list)?;
        }
        config.admin_secret = get("SLOTBOOK_ADMIN_SECRET").ok_or(ConfigError::Missing("SLOTBOOK_ADMIN_SECRET"))?;
        if let Some(v) = get("SLOTBOOK_ADMIN_ADDR") {
            config.admin_addr = parse_var("SLOTBOOK_ADMIN_ADDR", &v)?;
        }

        let secs = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(var) {
                None => Ok(default),
                Some(v) => match v.trim().parse::<u64>() {
                    Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
                    _ => Err(ConfigError::Invalid { var, value: v }),
                },
            }
        };
        config.lock_ttl = secs("SLOTBOOK_LOCK_TTL_SECS", config.lock_ttl)?;
        config.lock_sweep_every = secs("SLOTBOOK_LOCK_SWEEP_SECS", config.lock_sweep_every)?;
        config.fine_tick_every = secs("SLOTBOOK_FINE_TICK_SECS", config.fine_tick_every)?;
        config.coarse_tick_every = secs("SLOTBOOK_COARSE_TICK_SECS", config.coarse_tick_every)?;

        if let Some(list) = get("SLOTBOOK_REMINDERS") {
            config.reminders = parse_reminders(&list)?;
        }
        if let Some(v) = get("SLOTBOOK_UTC_OFFSET_MINUTES") {
            config.utc_offset_minutes = parse_var("SLOTBOOK_UTC_OFFSET_MINUTES", &v)?;
            if offset_from_minutes(config.utc_offset_minutes).is_none() {
                return Err(ConfigError::Invalid {
                    var: "SLOTBOOK_UTC_OFFSET_MINUTES",
                    value: v,
                });
            }
        }
        if let Some(v) = get("SLOTBOOK_COMPACT_THRESHOLD") {
            config.compact_threshold = parse_var("SLOTBOOK_COMPACT_THRESHOLD", &v)?;
        }
        if let Some(v) = get("SLOTBOOK_METRICS_PORT") {
            config.metrics_port = Some(parse_var("SLOTBOOK_METRICS_PORT", &v)?);
        }
        config.meeting_base_url = get("SLOTBOOK_MEETING_BASE_URL");
        Ok(config)
    }

    /// Out-of-range offsets fall back to UTC; `from_lookup` rejects them.
    pub fn utc_offset(&self) -> FixedOffset {
        offset_from_minutes(self.utc_offset_minutes).unwrap_or_else(|| Utc.fix())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            lock_ttl_ms: self.lock_ttl.as_millis() as i64,
            utc_offset: self.utc_offset(),
        }
    }

    /// Lock TTL in whole minutes, for logging.
    pub fn lock_ttl_minutes(&self) -> i64 {
        self.engine_settings().lock_ttl_ms / MINUTE_MS
    }
}

fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    minutes.checked_mul(60).and_then(FixedOffset::east_opt)
}

fn parse_var<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

/// `name[:PREFIX[:admin_email]]`, comma separated. The prefix defaults to the
/// upper-cased name.
fn parse_businesses(list: &str) -> Result<Vec<BusinessProfile>, ConfigError> {
    let invalid = || ConfigError::Invalid {
        var: "SLOTBOOK_BUSINESSES",
        value: list.to_string(),
    };
    let mut out: Vec<BusinessProfile> = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.splitn(3, ':').map(str::trim);
        let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(invalid)?;
        let prefix = parts
            .next()
            .filter(|p| !p.is_empty())
            .map_or_else(|| name.to_ascii_uppercase(), str::to_string);
        let admin_email = parts.next().filter(|e| !e.is_empty()).map(str::to_string);
        if out.iter().any(|b| b.name == name) {
            return Err(invalid());
        }
        out.push(BusinessProfile {
            name: name.to_string(),
            prefix,
            admin_email,
        });
    }
    if out.is_empty() {
        return Err(invalid());
    }
    Ok(out)
}

fn parse_reminders(list: &str) -> Result<Vec<ReminderKind>, ConfigError> {
    let mut kinds = Vec::new();
    for label in list.split(',').map(str::trim).filter(|l| !l.is_empty()) {
        let kind = ReminderKind::parse(label).ok_or_else(|| ConfigError::Invalid {
            var: "SLOTBOOK_REMINDERS",
            value: label.to_string(),
        })?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}
