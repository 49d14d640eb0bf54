use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Environment;

/// Top-level configuration loaded from `~/.driftwarden/config.toml`.
///
/// **Security**: this struct never stores tokens. The correction token is
/// resolved at call time from the environment variable named in
/// [`SecretsConfig::correction_token_env`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub sinks: SinksConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub environments: Vec<Environment>,
}

impl Config {
    /// Load config from `~/.driftwarden/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path. A missing file is an error.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not expressible via types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.drift.validate()?;
        self.baseline.validate()?;
        if self.http.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "http.request_timeout_secs must be > 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for env in &self.environments {
            if env.name.trim().is_empty() {
                return Err(ConfigError::Validation("environment name must not be empty".into()));
            }
            if env.base_url.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "environment `{}` has an empty base_url",
                    env.name
                )));
            }
            if !seen.insert(env.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate environment `{}`",
                    env.name
                )));
            }
        }
        Ok(())
    }

    /// Like [`validate`](Self::validate) but also requires at least one
    /// environment, which the daemon needs before it can start.
    pub fn validate_for_daemon(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.environments.is_empty() {
            return Err(ConfigError::Validation(
                "at least one [[environments]] entry is required".into(),
            ));
        }
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        home_dir().join(".driftwarden").join("config.toml")
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Expand a leading `~/` to the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_service_name() -> String {
    "driftwarden".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Minimum similarity score for an item to pass.
    #[serde(default = "default_threshold")]
    pub baseline_threshold: f64,
    #[serde(default = "default_interval_minutes")]
    pub check_interval_minutes: u64,
    /// Correction attempts allowed per environment per UTC day.
    #[serde(default = "default_max_corrections")]
    pub max_auto_corrections: u32,
    #[serde(default = "default_max_concurrent_envs")]
    pub max_concurrent_environments: usize,
    /// Run the first cycle immediately instead of after one interval.
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            baseline_threshold: default_threshold(),
            check_interval_minutes: default_interval_minutes(),
            max_auto_corrections: default_max_corrections(),
            max_concurrent_environments: default_max_concurrent_envs(),
            run_on_startup: true,
        }
    }
}

impl DriftConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.baseline_threshold) {
            return Err(ConfigError::Validation(format!(
                "drift.baseline_threshold must be within [0, 1], got {}",
                self.baseline_threshold
            )));
        }
        if self.check_interval_minutes == 0 {
            return Err(ConfigError::Validation(
                "drift.check_interval_minutes must be > 0".into(),
            ));
        }
        if self.check_interval_minutes > MAX_CHECK_INTERVAL_MINUTES {
            return Err(ConfigError::Validation(format!(
                "drift.check_interval_minutes must be <= {MAX_CHECK_INTERVAL_MINUTES} (one week), got {}",
                self.check_interval_minutes
            )));
        }
        if self.max_concurrent_environments == 0 {
            return Err(ConfigError::Validation(
                "drift.max_concurrent_environments must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes.saturating_mul(60))
    }
}

/// Longest accepted check interval.
pub const MAX_CHECK_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

fn default_threshold() -> f64 {
    0.95
}
fn default_interval_minutes() -> u64 {
    15
}
fn default_max_corrections() -> u32 {
    3
}
fn default_max_concurrent_envs() -> usize {
    4
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Upper bound for every outbound call (probes, corrections, sinks).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout() -> u64 {
    15
}
fn default_user_agent() -> String {
    concat!("driftwarden/", env!("CARGO_PKG_VERSION")).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSourceKind {
    #[default]
    File,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    #[serde(default)]
    pub source: BaselineSourceKind,
    /// JSON file holding baseline documents keyed by name.
    #[serde(default = "default_baseline_path")]
    pub path: Option<String>,
    /// Base URL of the baseline service.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_baseline_key")]
    pub key: String,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            source: BaselineSourceKind::default(),
            path: default_baseline_path(),
            url: None,
            key: default_baseline_key(),
        }
    }
}

impl BaselineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        match self.source {
            BaselineSourceKind::File if missing(&self.path) => Err(ConfigError::Validation(
                "baseline.path is required for the file source".into(),
            )),
            BaselineSourceKind::Http if missing(&self.url) => Err(ConfigError::Validation(
                "baseline.url is required for the http source".into(),
            )),
            _ => Ok(()),
        }
    }
}

fn default_baseline_path() -> Option<String> {
    Some("~/.driftwarden/baselines.json".into())
}
fn default_baseline_key() -> String {
    "current".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "~/.driftwarden/records.db".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Name of the env var holding the correction token.
    #[serde(default = "default_token_env")]
    pub correction_token_env: String,
    /// Cache the token for this many seconds; 0 fetches it per batch.
    #[serde(default)]
    pub cache_ttl_secs: u64,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            correction_token_env: default_token_env(),
            cache_ttl_secs: 0,
        }
    }
}

fn default_token_env() -> String {
    "DRIFT_CORRECTION_TOKEN".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinksConfig {
    #[serde(default)]
    pub alerts_url: Option<String>,
    #[serde(default)]
    pub metrics_url: Option<String>,
    #[serde(default = "default_alert_topic")]
    pub alert_topic: String,
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            alerts_url: None,
            metrics_url: None,
            alert_topic: default_alert_topic(),
            metrics_topic: default_metrics_topic(),
        }
    }
}

fn default_alert_topic() -> String {
    "drift-alerts".into()
}
fn default_metrics_topic() -> String {
    "metrics".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonConfig {
    /// Address for the `/metrics` + `/healthz` endpoint; disabled when unset.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}
