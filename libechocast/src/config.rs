//! Configuration management for Echocast
//!
//! Non-secret settings come from an optional TOML file. Credentials come from
//! the environment, optionally seeded from a dotenv file, and are kept in
//! [`SecretString`]s so they never end up in logs.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Default dotenv file read at startup when present
pub const DEFAULT_ENV_FILE: &str = "keys.env";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub x: XConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    /// Account whose posts are watched and echoed
    pub handle: String,
    /// Third party mentioned in every reply
    pub mention: String,
    /// Name used for the watched account in the reply text
    pub display_name: String,
    /// Items requested per fetch
    pub page_size: usize,
    /// Seconds to sleep between cycles
    pub poll_interval: u64,
    /// Only publish inside this UTC window; always publish when unset
    pub business_hours: Option<BusinessHours>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            handle: "snafudefi".to_string(),
            mention: "elonmusk".to_string(),
            display_name: "Snafu".to_string(),
            page_size: 5,
            poll_interval: 60,
            business_hours: None,
        }
    }
}

/// Half-open window `[start, end)` of UTC hours; wraps past midnight when `start > end`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusinessHours {
    pub start: u32,
    pub end: u32,
}

impl BusinessHours {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct XConfig {
    pub api_base: String,
    /// Per-request timeout in seconds
    pub request_timeout: u64,
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.x.com".to_string(),
            request_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Plain-text file receiving error-level events
    pub error_log: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            error_log: "app.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error: every setting has a default.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            tracing::debug!("No config file at {}, using defaults", config_path.display());
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Apply environment overrides (`USER_HANDLE`)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(handle) = lookup("USER_HANDLE").filter(|h| !h.trim().is_empty()) {
            self.watch.handle = handle.trim().trim_start_matches('@').to_string();
        }
    }

    /// Reject settings the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.watch.handle.trim().is_empty() {
            return Err(ConfigError::MissingField("watch.handle".to_string()).into());
        }
        if self.watch.mention.trim().is_empty() {
            return Err(ConfigError::MissingField("watch.mention".to_string()).into());
        }
        if self.watch.poll_interval == 0 {
            return Err(ConfigError::InvalidValue(
                "watch.poll_interval must be at least 1 second".to_string(),
            )
            .into());
        }
        if self.watch.page_size == 0 {
            return Err(
                ConfigError::InvalidValue("watch.page_size must be at least 1".to_string()).into(),
            );
        }
        if let Some(hours) = self.watch.business_hours {
            if hours.start > 23 || hours.end > 24 {
                return Err(ConfigError::InvalidValue(format!(
                    "watch.business_hours out of range: {}..{}",
                    hours.start, hours.end
                ))
                .into());
            }
        }
        Ok(())
    }
}

/// Credentials and alerting addresses, read from the environment
pub struct Secrets {
    pub api_key: SecretString,
    pub api_secret: SecretString,
    pub access_token: SecretString,
    pub access_secret: SecretString,
    pub bearer_token: SecretString,
    pub notifier_address: String,
    pub notifier_password: SecretString,
    pub alert_recipient: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("notifier_address", &self.notifier_address)
            .field("alert_recipient", &self.alert_recipient)
            .finish_non_exhaustive()
    }
}

impl Secrets {
    /// Read secrets from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read secrets through `lookup`; the first missing or blank variable is an error
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| -> Result<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingField(key.to_string()).into())
        };

        Ok(Self {
            api_key: SecretString::from(require("API_KEY")?),
            api_secret: SecretString::from(require("API_SECRET")?),
            access_token: SecretString::from(require("ACCESS_TOKEN")?),
            access_secret: SecretString::from(require("ACCESS_SECRET")?),
            bearer_token: SecretString::from(require("BEARER_TOKEN")?),
            notifier_address: require("EMAIL_ADDRESS")?,
            notifier_password: SecretString::from(require("EMAIL_PASSWORD")?),
            alert_recipient: require("BOSS_EMAIL")?,
        })
    }
}

/// Load variables from a dotenv file into the process environment
///
/// An explicitly requested file must exist. The default `keys.env` is
/// optional. Variables already set in the environment win.
pub fn load_env_file(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path).map_err(|e| {
                ConfigError::InvalidValue(format!("env file {}: {}", path.display(), e))
            })?;
        }
        None => {
            let default = Path::new(DEFAULT_ENV_FILE);
            if default.exists() {
                dotenvy::from_path(default).map_err(|e| {
                    ConfigError::InvalidValue(format!("env file {}: {}", DEFAULT_ENV_FILE, e))
                })?;
            }
        }
    }
    Ok(())
}

/// Resolve the configuration file path following XDG conventions
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("ECHOCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("echocast").join("config.toml"))
}
