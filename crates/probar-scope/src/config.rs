//! Suite configuration

use crate::result::{ScopeError, ScopeResult};
use crate::retry::RetryPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::{Host, Url};

/// Default application under test
pub const DEFAULT_BASE_URL: &str = "https://automationexercise.com";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ScopeError::config(format!("unknown log format: {other}"))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Retry settings for one kind of remote artifact
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Number of attempts
    pub retries: u32,
    /// Delay between attempts in seconds
    pub delay_secs: f64,
}

impl RetrySettings {
    /// Convert into a [`RetryPolicy`].
    ///
    /// # Errors
    ///
    /// Returns an error for zero retries or an unusable delay.
    pub fn to_policy(&self) -> ScopeResult<RetryPolicy> {
        RetryPolicy::from_secs_f64(self.retries, self.delay_secs)
    }
}

/// Retry settings for remote artifacts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Files downloaded inside the browser container
    pub file: RetrySettings,
    /// Recorded session videos
    pub video: RetrySettings,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            file: RetrySettings {
                retries: 5,
                delay_secs: 1.0,
            },
            video: RetrySettings {
                retries: 5,
                delay_secs: 2.0,
            },
        }
    }
}

/// Suite configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Application under test
    pub base_url: String,
    /// Logging
    pub log: LogConfig,
    /// Remote artifact retries
    pub artifacts: ArtifactConfig,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            log: LogConfig::default(),
            artifacts: ArtifactConfig::default(),
        }
    }
}

impl SuiteConfig {
    /// Create new default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set log configuration
    #[must_use]
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Set artifact retries
    #[must_use]
    pub const fn with_artifacts(mut self, artifacts: ArtifactConfig) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Parse a YAML document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed YAML.
    pub fn from_yaml_str(yaml: &str) -> ScopeResult<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Read a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ScopeResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Defaults, then the optional YAML file, then the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error for an unreadable file or an invalid override.
    pub fn load(path: Option<&Path>) -> ScopeResult<Self> {
        let config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides(|key| std::env::var(key).ok())?;
        tracing::debug!(base_url = %config.base_url, "suite configuration loaded");
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Recognised keys: `BASE_URL`, `LOG_LEVEL`, `LOG_FORMAT`,
    /// `ARTIFACT_FILE_RETRIES`, `ARTIFACT_FILE_DELAY_SECS`,
    /// `ARTIFACT_VIDEO_RETRIES`, `ARTIFACT_VIDEO_DELAY_SECS`. Blank values
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Config`] when a value does not parse.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> ScopeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(base_url) = get("BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(format) = get("LOG_FORMAT") {
            self.log.format = format.trim().parse()?;
        }
        if let Some(value) = get("ARTIFACT_FILE_RETRIES") {
            self.artifacts.file.retries = parse_env("ARTIFACT_FILE_RETRIES", &value)?;
        }
        if let Some(value) = get("ARTIFACT_FILE_DELAY_SECS") {
            self.artifacts.file.delay_secs = parse_env("ARTIFACT_FILE_DELAY_SECS", &value)?;
        }
        if let Some(value) = get("ARTIFACT_VIDEO_RETRIES") {
            self.artifacts.video.retries = parse_env("ARTIFACT_VIDEO_RETRIES", &value)?;
        }
        if let Some(value) = get("ARTIFACT_VIDEO_DELAY_SECS") {
            self.artifacts.video.delay_secs = parse_env("ARTIFACT_VIDEO_DELAY_SECS", &value)?;
        }
        Ok(self)
    }

    /// Host of `base_url`, used as the domain of injected browser cookies.
    ///
    /// A base URL without a scheme is read as `http://`. IPv6 hosts come back
    /// without brackets.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Config`] when `base_url` does not parse or has
    /// no host.
    pub fn cookie_domain(&self) -> ScopeResult<String> {
        let raw = self.base_url.trim();
        let has_scheme = Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://")
            .map_err(|e| ScopeError::config(e.to_string()))?
            .is_match(raw);
        let parsed = if has_scheme {
            Url::parse(raw)
        } else {
            Url::parse(&format!("http://{raw}"))
        }
        .map_err(|e| ScopeError::config(format!("invalid base URL {raw:?}: {e}")))?;

        match parsed.host() {
            Some(Host::Domain(domain)) => Ok(domain.to_ascii_lowercase()),
            Some(Host::Ipv4(addr)) => Ok(addr.to_string()),
            Some(Host::Ipv6(addr)) => Ok(addr.to_string()),
            None => Err(ScopeError::config(format!("no host in base URL: {raw}"))),
        }
    }
}

fn parse_env<T>(key: &str, value: &str) -> ScopeResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ScopeError::config(format!("{key}={value}: {e}")))
}
