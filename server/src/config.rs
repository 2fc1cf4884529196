//! Gatekeeper configuration and the shared, reloadable snapshot handle
//!
//! Configuration lives in a TOML file with kebab-case keys grouped into
//! `[api]`, `[checks]`, `[kick]`, `[stats]` and `[logging]` tables. Every
//! key is optional. Operations never hold the lock: they take an
//! `Arc<GatekeeperConfig>` snapshot and work from it until they finish,
//! so a concurrent reload is never observed half-applied.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: i64 = 60;

pub const DEFAULT_KICK_MESSAGE: &str =
    "&cVPNs and proxies are not allowed on this server.\n&7Please disable your VPN and try again.";
pub const DEFAULT_KICK_ERROR_MESSAGE: &str =
    "&cCould not verify your connection.\n&7Please try again later.";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to render default configuration: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("api.base-url is not configured")]
    MissingBaseUrl,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GatekeeperConfig {
    pub api: ApiConfig,
    pub checks: ChecksConfig,
    pub kick: KickConfig,
    pub stats: StatsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ApiConfig {
    /// Backend root URL; blank disables checks and heartbeats
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub verdict_parsing: VerdictParsing,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            connect_timeout_ms: DEFAULT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_TIMEOUT_MS,
            verdict_parsing: VerdictParsing::Strict,
        }
    }
}

/// How the `/check` response body is turned into a verdict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictParsing {
    /// Parse the body as JSON and read the boolean `isVPN` field
    #[default]
    Strict,
    /// Flag any body containing the literal `"isVPN":true`
    Substring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ChecksConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_prelogin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_join: Option<bool>,
    pub kick_on_error: bool,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            on_prelogin: None,
            on_join: Some(true),
            kick_on_error: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct KickConfig {
    pub enabled: bool,
    pub message: MessageLines,
    pub error_message: MessageLines,
}

impl Default for KickConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            message: MessageLines::from_default(DEFAULT_KICK_MESSAGE),
            error_message: MessageLines::from_default(DEFAULT_KICK_ERROR_MESSAGE),
        }
    }
}

/// A message configured either as one string or as a list of lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageLines {
    Single(String),
    Lines(Vec<String>),
}

impl Default for MessageLines {
    fn default() -> Self {
        MessageLines::Lines(Vec::new())
    }
}

impl MessageLines {
    fn from_default(text: &str) -> Self {
        MessageLines::Lines(text.lines().map(str::to_string).collect())
    }

    /// Joins the configured lines, or returns `fallback` when they are blank.
    pub fn joined_or(&self, fallback: &str) -> String {
        let joined = match self {
            MessageLines::Single(line) => line.clone(),
            MessageLines::Lines(lines) => lines.join("\n"),
        };
        if joined.trim().is_empty() {
            fallback.to_string()
        } else {
            joined
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StatsConfig {
    pub enabled: bool,
    pub interval_seconds: i64,
    /// Falls back to the host's own name when blank
    pub server_id: String,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            server_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingConfig {
    pub debug: bool,
}

impl GatekeeperConfig {
    pub fn from_toml(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw, path)
    }

    /// Loads `path`, writing the default configuration there first if the
    /// file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let defaults = Self::default();
            let rendered = toml::to_string_pretty(&defaults)?;
            std::fs::write(path, rendered).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            return Ok(defaults);
        }
        Self::load(path)
    }

    /// The trimmed backend URL, or `MissingBaseUrl` when none is set.
    pub fn base_url(&self) -> Result<&str, ConfigError> {
        let url = self.api.base_url.trim();
        if url.is_empty() {
            Err(ConfigError::MissingBaseUrl)
        } else {
            Ok(url)
        }
    }

    pub fn checks_enabled(&self) -> bool {
        self.checks
            .on_prelogin
            .or(self.checks.on_join)
            .unwrap_or(true)
    }

    /// Connect timeout; 0 falls back to the 5000 ms default
    pub fn connect_timeout(&self) -> Duration {
        timeout_or_default(self.api.connect_timeout_ms)
    }

    /// Read timeout; 0 falls back to the 5000 ms default
    pub fn read_timeout(&self) -> Duration {
        timeout_or_default(self.api.read_timeout_ms)
    }

    pub fn kick_message(&self) -> String {
        self.kick.message.joined_or(DEFAULT_KICK_MESSAGE)
    }

    pub fn kick_error_message(&self) -> String {
        self.kick.error_message.joined_or(DEFAULT_KICK_ERROR_MESSAGE)
    }

    /// Heartbeat period; non-positive values fall back to 60 s
    pub fn heartbeat_interval(&self) -> Duration {
        let secs = if self.stats.interval_seconds <= 0 {
            DEFAULT_HEARTBEAT_INTERVAL_SECS
        } else {
            self.stats.interval_seconds
        };
        Duration::from_secs(secs as u64)
    }
}

fn timeout_or_default(ms: u64) -> Duration {
    Duration::from_millis(if ms == 0 { DEFAULT_TIMEOUT_MS } else { ms })
}

/// Shared handle to the current configuration snapshot
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    path: PathBuf,
    current: Arc<RwLock<Arc<GatekeeperConfig>>>,
}

impl ConfigHandle {
    pub fn new(path: impl Into<PathBuf>, config: GatekeeperConfig) -> Self {
        Self {
            path: path.into(),
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> Arc<GatekeeperConfig> {
        Arc::clone(&*self.current.read().await)
    }

    /// Re-reads the file and swaps in the new snapshot. On failure the
    /// previous snapshot stays in effect.
    pub async fn reload(&self) -> Result<Arc<GatekeeperConfig>, ConfigError> {
        let fresh = match GatekeeperConfig::load(&self.path) {
            Ok(config) => Arc::new(config),
            Err(e) => {
                warn!("Configuration reload failed, keeping previous settings: {}", e);
                return Err(e);
            }
        };

        *self.current.write().await = Arc::clone(&fresh);
        info!("Configuration reloaded from {}", self.path.display());
        Ok(fresh)
    }
}
