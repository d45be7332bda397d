//! Runtime configuration from the environment.
//!
//! A `.env` file in the working directory is loaded first when present;
//! real environment variables take precedence over it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::model::gemini::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::relay::DEFAULT_IDLE_TIMEOUT;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err("expected `pretty` or `json`".to_owned()),
        }
    }
}

/// Everything the binary needs to start.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub api_key: Option<String>,
    pub model: String,
    pub api_endpoint: String,
    /// Preset catalog file; the built-in catalog is used when unset.
    pub presets_path: Option<PathBuf>,
    pub idle_timeout: Duration,
    /// Origins allowed by CORS. Empty disables CORS handling.
    pub allowed_origins: Vec<String>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_owned(),
            api_key: None,
            model: DEFAULT_MODEL.to_owned(),
            api_endpoint: DEFAULT_ENDPOINT.to_owned(),
            presets_path: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            allowed_origins: Vec::new(),
            log_format: LogFormat::default(),
        }
    }
}

// Keeps the API key out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("api_endpoint", &self.api_endpoint)
            .field("presets_path", &self.presets_path)
            .field("idle_timeout", &self.idle_timeout)
            .field("allowed_origins", &self.allowed_origins)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(bind) = get("ENHANCER_BIND") {
            config.bind = bind.trim().to_owned();
        }
        config.api_key = get("GEMINI_API_KEY").map(|key| key.trim().to_owned());
        if let Some(model) = get("ENHANCER_MODEL") {
            config.model = model.trim().to_owned();
        }
        if let Some(endpoint) = get("ENHANCER_API_ENDPOINT") {
            config.api_endpoint = endpoint.trim().to_owned();
        }
        config.presets_path = get("ENHANCER_PRESETS").map(PathBuf::from);

        if let Some(raw) = get("ENHANCER_IDLE_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                invalid("ENHANCER_IDLE_TIMEOUT_SECS", &raw, e.to_string())
            })?;
            if secs == 0 {
                return Err(invalid(
                    "ENHANCER_IDLE_TIMEOUT_SECS",
                    &raw,
                    "must be at least 1".to_owned(),
                ));
            }
            config.idle_timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = get("ENHANCER_ALLOWED_ORIGINS") {
            config.allowed_origins = raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_owned)
                .collect();
        }

        if let Some(raw) = get("ENHANCER_LOG_FORMAT") {
            config.log_format = raw
                .parse::<LogFormat>()
                .map_err(|reason| invalid("ENHANCER_LOG_FORMAT", &raw, reason))?;
        }

        Ok(config)
    }
}

fn invalid(key: &'static str, value: &str, reason: String) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_owned(),
        reason,
    }
}
