//! Service configuration
//!
//! Merges command-line/environment overrides (parsed by clap in `main`) over
//! the TOML config file and compiled defaults.

use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Duration;
use tutti_common::config::{default_root_folder, TomlConfig, DATABASE_FILE};
use tutti_common::db::ConflictPolicy;
use tutti_common::{Error, Result};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5790";
pub const DEFAULT_REMINDER_LEAD_HOURS: i64 = 12;
pub const DEFAULT_LOG_FILTER: &str = "tutti_dispatch=info,tower_http=info";

/// Values given on the command line or through `TUTTI_*` variables
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub root_folder: Option<PathBuf>,
    pub bind_addr: Option<String>,
    pub conflict_policy: Option<ConflictPolicy>,
    pub public_base_url: Option<String>,
    pub reminder_lead_hours: Option<i64>,
    pub notifier_webhook_url: Option<String>,
    pub log_level: Option<String>,
}

/// Fully resolved settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub root_folder: PathBuf,
    pub bind_addr: SocketAddr,
    pub conflict_policy: ConflictPolicy,
    pub public_base_url: String,
    pub reminder_lead: Duration,
    pub notifier_webhook_url: Option<String>,
    pub log_level: Option<String>,
}

impl Settings {
    pub fn resolve(overrides: Overrides, file: TomlConfig) -> Result<Self> {
        let bind_raw = overrides
            .bind_addr
            .or(file.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr: SocketAddr = bind_raw
            .parse()
            .map_err(|e| Error::Config(format!("bind_addr '{}': {}", bind_raw, e)))?;

        let reminder_lead_hours = overrides
            .reminder_lead_hours
            .or(file.reminder_lead_hours)
            .unwrap_or(DEFAULT_REMINDER_LEAD_HOURS);
        if reminder_lead_hours < 0 {
            return Err(Error::Config(format!(
                "reminder_lead_hours must not be negative (got {})",
                reminder_lead_hours
            )));
        }

        let public_base_url = overrides
            .public_base_url
            .or(file.public_base_url)
            .unwrap_or_else(|| format!("http://{}", bind_addr));

        Ok(Self {
            root_folder: overrides
                .root_folder
                .or(file.root_folder)
                .unwrap_or_else(default_root_folder),
            bind_addr,
            conflict_policy: overrides
                .conflict_policy
                .or(file.conflict_policy)
                .unwrap_or_default(),
            public_base_url,
            reminder_lead: Duration::hours(reminder_lead_hours),
            notifier_webhook_url: overrides
                .notifier_webhook_url
                .or(file.notifier_webhook_url)
                .filter(|url| !url.is_empty()),
            log_level: overrides.log_level.or(file.log_level),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }
}
