//! Configuration file loading and data folder resolution
//!
//! Every setting resolves in the same priority order:
//! 1. Command-line argument (highest priority, handled by the service binary)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is never fatal: a warning is logged and defaults are
//! used. A config file that exists but does not parse is a hard error.

use crate::db::ConflictPolicy;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "TUTTI_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "tutti.db";

/// Settings read from `config.toml`; every field is optional
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TomlConfig {
    /// Data folder holding the database
    pub root_folder: Option<PathBuf>,
    /// HTTP listen address, e.g. `127.0.0.1:5790`
    pub bind_addr: Option<String>,
    /// Cross-need conflict policy (`simple` or `smart`)
    pub conflict_policy: Option<ConflictPolicy>,
    /// Base URL used to build response links sent to musicians
    pub public_base_url: Option<String>,
    /// How long before token expiry a reminder goes out
    pub reminder_lead_hours: Option<i64>,
    /// Endpoint of the notification service; log-only delivery when unset
    pub notifier_webhook_url: Option<String>,
    /// Default tracing filter directive
    pub log_level: Option<String>,
}

impl TomlConfig {
    /// Parse a config file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse config file content
    pub fn parse(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        if let Some(hours) = config.reminder_lead_hours {
            if hours < 0 {
                return Err(Error::Config(format!(
                    "reminder_lead_hours must not be negative (got {})",
                    hours
                )));
            }
        }
        Ok(config)
    }
}

/// Locate the config file to read, if any
///
/// An explicit path is returned even if it does not exist, so that the
/// caller reports the operator's typo instead of silently using defaults.
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("tutti").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/tutti/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load the TOML config, falling back to defaults when no file is present
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    match locate_config_file(explicit) {
        Some(path) if path.exists() => {
            let config = TomlConfig::load(&path)?;
            info!("Loaded config file: {}", path.display());
            Ok(config)
        }
        Some(path) if explicit.is_some() => Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        ))),
        Some(path) => {
            warn!(
                "Config file {} does not exist, using defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            warn!("No config file found, using defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tutti"))
        .unwrap_or_else(|| PathBuf::from("./tutti_data"))
}

/// Create the root folder if needed and return the database path inside it
pub fn prepare_root_folder(root_folder: &Path) -> Result<PathBuf> {
    if !root_folder.exists() {
        std::fs::create_dir_all(root_folder)?;
        info!("Created root folder: {}", root_folder.display());
    }
    Ok(root_folder.join(DATABASE_FILE))
}
