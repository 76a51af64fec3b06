use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::control::DEFAULT_CONTROL_TTL;
use crate::dispatch::pipeline::{DEFAULT_GRACE, DEFAULT_REQUEST_TIMEOUT};
use crate::dispatch::poll::{DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL, FixedRetry};

pub const DEFAULT_BASE_URL: &str = "https://waifus-api.nemusona.com";
const DEFAULT_CONFIG_FILE: &str = "imgen.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// Status queries before a job is declared timed out.
    pub max_attempts: u32,
    /// Pause between status queries, in milliseconds.
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub base_url: String,
    /// Where delivered images are written.
    pub output_dir: PathBuf,
    pub poll: PollConfig,
    /// Slack added to the poll budget for the supervisory timeout.
    pub grace_secs: u64,
    pub control_ttl_secs: u64,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            output_dir: PathBuf::from(".imgen/images"),
            poll: PollConfig::default(),
            grace_secs: DEFAULT_GRACE.as_secs(),
            control_ttl_secs: DEFAULT_CONTROL_TTL.as_secs(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (`IMGEN_CONFIG` or `./imgen.toml` if
    /// present), then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = env::var("IMGEN_CONFIG").ok().map(PathBuf::from);
        let mut config = match &explicit {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                tracing::debug!("no config file, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `IMGEN_BASE_URL` / `IMGEN_OUTPUT_DIR` from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("IMGEN_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(dir) = lookup("IMGEN_OUTPUT_DIR").filter(|v| !v.trim().is_empty()) {
            self.output_dir = PathBuf::from(dir.trim());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.poll.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "poll.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> FixedRetry {
        FixedRetry::new(
            self.poll.max_attempts,
            Duration::from_millis(self.poll.interval_ms),
        )
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn control_ttl(&self) -> Duration {
        Duration::from_secs(self.control_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_budget() {
        let config = Config::default();
        assert_eq!(config.poll_policy(), FixedRetry::default());
        assert_eq!(config.control_ttl(), Duration::from_secs(60));
        assert_eq!(config.grace(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            base_url = "http://localhost:9000"
            [poll]
            interval_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.poll.interval_ms, 250);
        assert_eq!(config.poll.max_attempts, 300);
        assert_eq!(config.output_dir, PathBuf::from(".imgen/images"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: Result<Config, _> = toml::from_str("poll_attempts = 3");
        assert!(parsed.is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "IMGEN_BASE_URL" => Some(" http://override:1 ".to_string()),
            "IMGEN_OUTPUT_DIR" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.base_url, "http://override:1");
        // Blank values are ignored
        assert_eq!(config.output_dir, PathBuf::from(".imgen/images"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.poll.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            base_url: "ftp://nope".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
