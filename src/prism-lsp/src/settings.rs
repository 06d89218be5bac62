//! User configuration.
//!
//! Settings come from the first parseable JSON file found in the lookup
//! order (working directory, platform config directory, home), then
//! environment overrides are applied on top.

use crate::client::LspClientConfig;
use crate::manager::{ManagerConfig, DEFAULT_IDLE_TIMEOUT};
use crate::server_config::{ServerConfig, ServerRegistry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Explicit config file path, overriding the lookup order.
pub const CONFIG_ENV: &str = "PRISM_CONFIG";
/// Log level override.
pub const LOG_LEVEL_ENV: &str = "PRISM_LOG_LEVEL";
/// Request timeout override, in milliseconds.
pub const REQUEST_TIMEOUT_ENV: &str = "PRISM_REQUEST_TIMEOUT";

const CONFIG_FILE_CWD: &str = "prism.json";
const CONFIG_FILE_HOME: &str = ".prism.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// User server entries; same-id entries override builtins.
    pub servers: Vec<ServerConfig>,
    /// Request timeout in milliseconds, shared with initialize.
    pub request_timeout: u64,
    /// Whether tool calls may implicitly spawn servers.
    pub auto_start: bool,
    pub log_level: String,
    /// Idle eviction timeout in milliseconds.
    pub idle_timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            request_timeout: 30_000,
            auto_start: true,
            log_level: "info".to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Settings {
    /// Candidate config files, most specific first.
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(CONFIG_FILE_CWD));
        }
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("prism").join("config.json"));
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(CONFIG_FILE_HOME));
        }
        candidates
    }

    /// Load settings: `PRISM_CONFIG` wins, then the first candidate that
    /// parses, then defaults. Environment overrides apply last.
    pub fn load() -> Self {
        let mut settings = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path)).unwrap_or_else(|| {
                warn!("could not read config from {CONFIG_ENV}={path}, using defaults");
                Self::default()
            }),
            Err(_) => Self::first_found(&Self::candidate_paths()),
        };
        settings.apply_env();
        settings
    }

    fn first_found(candidates: &[PathBuf]) -> Self {
        for candidate in candidates {
            if let Some(settings) = Self::from_file(candidate) {
                return settings;
            }
        }
        Self::default()
    }

    /// Parse one file; `None` if missing or malformed (malformed files
    /// are reported and skipped).
    pub fn from_file(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!("ignoring malformed config {}: {e}", path.display());
                None
            }
        }
    }

    /// Apply `PRISM_LOG_LEVEL` and `PRISM_REQUEST_TIMEOUT`.
    pub fn apply_env(&mut self) {
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            if matches!(level.as_str(), "debug" | "info" | "warn" | "error") {
                self.log_level = level;
            } else {
                warn!("ignoring invalid {LOG_LEVEL_ENV}={level}");
            }
        }
        if let Ok(timeout) = std::env::var(REQUEST_TIMEOUT_ENV) {
            match timeout.parse::<u64>() {
                Ok(ms) if ms > 0 => self.request_timeout = ms,
                _ => warn!("ignoring invalid {REQUEST_TIMEOUT_ENV}={timeout}"),
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout)
    }

    /// Builtin servers plus this configuration's overrides.
    pub fn registry(&self) -> ServerRegistry {
        ServerRegistry::with_overrides(&self.servers)
    }

    /// Manager tunables derived from these settings.
    pub fn manager_config(&self, workspace_override: Option<PathBuf>) -> ManagerConfig {
        ManagerConfig {
            client_config: LspClientConfig::default().with_request_timeout(self.request_timeout()),
            idle_timeout: self.idle_timeout(),
            auto_start: self.auto_start,
            workspace_override,
        }
    }
}
