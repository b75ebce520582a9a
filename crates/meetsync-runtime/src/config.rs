//! Configuration: a TOML file behind a `watch` channel.
//!
//! Every field has a default, so a missing file or a partial file is valid.
//! The bearer token never lives here; it comes from `MEETSYNC_TOKEN`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use meetsync_core::StatusValue;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub const TOKEN_ENV: &str = "MEETSYNC_TOKEN";

/// One week.
pub const MAX_HEARTBEAT_INTERVAL_MINUTES: u64 = 7 * 24 * 60;
/// One day. Upper bound for every `detection.*_ms` field.
pub const MAX_DETECTION_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot access config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Re-evaluation period for the latest snapshot.
    pub poll_interval_ms: u64,
    /// Quiet period after a DOM mutation before re-evaluating.
    pub mutation_debounce_ms: u64,
    pub grace_window_ms: u64,
    /// Hidden longer than this while present forces termination.
    pub hidden_timeout_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            mutation_debounce_ms: 1_000,
            grace_window_ms: meetsync_core::detect::DEFAULT_GRACE_WINDOW_MS as u64,
            hidden_timeout_ms: meetsync_core::termination::DEFAULT_HIDDEN_TIMEOUT_MS as u64,
        }
    }
}

impl DetectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("mutation_debounce_ms", self.mutation_debounce_ms),
            ("grace_window_ms", self.grace_window_ms),
            ("hidden_timeout_ms", self.hidden_timeout_ms),
        ];
        match fields.iter().find(|(_, ms)| *ms > MAX_DETECTION_MS) {
            Some((name, _)) => Err(ConfigError::Invalid(format!(
                "detection.{name} must be at most {MAX_DETECTION_MS}"
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Status service root. Unset means dry-run.
    pub base_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: meetsync_status::http::DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub presence_integration_enabled: bool,
    pub baseline_status: StatusValue,
    pub present_status: StatusValue,
    pub status_text: String,
    pub emoji: String,
    pub show_activity_label: bool,
    /// 0 = no expiry.
    pub status_duration_seconds: i64,
    pub heartbeat_enabled: bool,
    pub heartbeat_interval_minutes: u64,
    pub detection: DetectionConfig,
    pub service: ServiceConfig,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            presence_integration_enabled: true,
            baseline_status: StatusValue::Online,
            present_status: StatusValue::Dnd,
            status_text: "In a meeting".to_string(),
            emoji: "calendar".to_string(),
            show_activity_label: true,
            status_duration_seconds: 0,
            heartbeat_enabled: false,
            heartbeat_interval_minutes: 5,
            detection: DetectionConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

impl PresenceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_HEARTBEAT_INTERVAL_MINUTES).contains(&self.heartbeat_interval_minutes) {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_interval_minutes must be between 1 and {MAX_HEARTBEAT_INTERVAL_MINUTES}"
            )));
        }
        if self.detection.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "detection.poll_interval_ms must be at least 1".into(),
            ));
        }
        self.detection.validate()?;
        if self.status_text.trim().is_empty() {
            return Err(ConfigError::Invalid("status_text must not be empty".into()));
        }
        meetsync_status::validate_emoji(&self.emoji)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        meetsync_status::validate_duration(self.status_duration_seconds)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

/// Shared, observable configuration plus the runtime credential flag.
#[derive(Debug)]
pub struct ConfigStore {
    tx: watch::Sender<PresenceConfig>,
    path: Option<PathBuf>,
    credentials_valid: AtomicBool,
}

impl ConfigStore {
    /// Store with no backing file; updates live only in memory.
    pub fn in_memory(config: PresenceConfig) -> Self {
        Self {
            tx: watch::Sender::new(config),
            path: None,
            credentials_valid: AtomicBool::new(true),
        }
    }

    /// Load from `path`. A missing file yields defaults and is created on the first update.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match std::fs::read_to_string(path) {
            Ok(text) => PresenceConfig::from_toml(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config at {}, using defaults", path.display());
                PresenceConfig::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(Self {
            tx: watch::Sender::new(config),
            path: Some(path.to_path_buf()),
            credentials_valid: AtomicBool::new(true),
        })
    }

    pub fn current(&self) -> PresenceConfig {
        self.tx.borrow().clone()
    }

    /// Apply `edit`, validate, persist, then publish. Nothing changes on error.
    pub fn update(
        &self,
        edit: impl FnOnce(&mut PresenceConfig),
    ) -> Result<PresenceConfig, ConfigError> {
        let mut next = self.current();
        edit(&mut next);
        next.validate()?;
        if let Some(path) = &self.path {
            write_atomic(path, &toml::to_string_pretty(&next)?)?;
        }
        self.tx.send_replace(next.clone());
        Ok(next)
    }

    pub fn set_heartbeat(
        &self,
        enabled: bool,
        interval_minutes: Option<u64>,
    ) -> Result<PresenceConfig, ConfigError> {
        self.update(|c| {
            c.heartbeat_enabled = enabled;
            if let Some(minutes) = interval_minutes {
                c.heartbeat_interval_minutes = minutes;
            }
        })
    }

    pub fn set_integration_enabled(&self, enabled: bool) -> Result<PresenceConfig, ConfigError> {
        self.update(|c| c.presence_integration_enabled = enabled)
    }

    pub fn credentials_valid(&self) -> bool {
        self.credentials_valid.load(Ordering::SeqCst)
    }

    /// The service rejected the token. Remote calls stop for the rest of the process.
    pub fn invalidate_credentials(&self) {
        if self.credentials_valid.swap(false, Ordering::SeqCst) {
            tracing::error!("status service rejected credentials; remote sync paused");
        }
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, contents).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

/// `$XDG_CONFIG_HOME/meetsync/config.toml`, else `~/.config/meetsync/config.toml`.
pub fn default_config_path() -> PathBuf {
    if let Some(dir) = std::env::var("XDG_CONFIG_HOME").ok().filter(|d| !d.is_empty()) {
        return PathBuf::from(dir).join("meetsync/config.toml");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config/meetsync/config.toml")
}
