//! Docket configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DocketError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocketConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_database_path() -> String { "~/.docket/docket.db".into() }

impl Default for DocketConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            gateway: GatewayConfig::default(),
            scheduler: SchedulerConfig::default(),
            lifecycle: LifecycleConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl DocketConfig {
    /// Load config from the default path (~/.docket/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DocketError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DocketError::Config(format!("Failed to parse config: {e}")))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DocketError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Docket home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".docket")
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// When set, protected routes require `X-Api-Token` (or `?token=`).
    #[serde(default)]
    pub api_token: Option<String>,
    /// Allowed CORS origins; empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 { 3000 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            api_token: None,
            cors_origins: Vec::new(),
        }
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Dispatch due tasks at the end of each tick.
    #[serde(default = "bool_true")]
    pub auto_dispatch: bool,
    /// Failed delivery rounds after which a pending task is no longer retried.
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
    /// Offset from UTC of the calendar day used by daily/weekly dedup windows.
    #[serde(default)]
    pub utc_offset_hours: i32,
}

fn bool_true() -> bool { true }
fn default_check_interval() -> u64 { 60 }
fn default_max_send_attempts() -> u32 { 3 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: default_check_interval(),
            auto_dispatch: true,
            max_send_attempts: default_max_send_attempts(),
            utc_offset_hours: 0,
        }
    }
}

/// Node lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Case status written by cascading closure.
    #[serde(default = "default_closed_status")]
    pub closed_status: String,
    #[serde(default = "default_upcoming_days")]
    pub upcoming_days_default: u32,
}

fn default_closed_status() -> String { "closed".into() }
fn default_upcoming_days() -> u32 { 7 }

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            closed_status: default_closed_status(),
            upcoming_days_default: default_upcoming_days(),
        }
    }
}

/// Delivery channel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Broadcast webhook that receives every dispatched notification.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

fn default_smtp_port() -> u16 { 587 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DocketConfig::default();
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.scheduler.check_interval_secs, 60);
        assert!(config.scheduler.auto_dispatch);
        assert_eq!(config.lifecycle.closed_status, "closed");
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            database_path = "/var/lib/docket/docket.db"

            [scheduler]
            check_interval_secs = 300
            auto_dispatch = false
            utc_offset_hours = 8

            [lifecycle]
            closed_status = "已结案"

            [notify.smtp]
            host = "smtp.example.com"
            username = "docket"
            password = "secret"
            from = "Docket <docket@example.com>"
        "#;

        let config: DocketConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database_path, "/var/lib/docket/docket.db");
        assert_eq!(config.scheduler.check_interval_secs, 300);
        assert!(!config.scheduler.auto_dispatch);
        assert_eq!(config.scheduler.utc_offset_hours, 8);
        assert_eq!(config.lifecycle.closed_status, "已结案");
        let smtp = config.notify.smtp.unwrap();
        assert_eq!(smtp.port, 587);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: DocketConfig = toml::from_str("").unwrap();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.scheduler.max_send_attempts, 3);
        assert_eq!(config.lifecycle.upcoming_days_default, 7);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = DocketConfig::default();
        config.gateway.port = 8088;
        config.save_to(&path).unwrap();

        let loaded = DocketConfig::load_from(&path).unwrap();
        assert_eq!(loaded.gateway.port, 8088);
    }

    #[test]
    fn test_home_dir() {
        assert!(DocketConfig::default_path().ends_with(".docket/config.toml"));
    }
}
