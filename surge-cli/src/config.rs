use std::{path::PathBuf, time::Duration};

use surge_core::{
    download::{DEFAULT_CHUNK_IO_SIZE, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES},
    DEFAULT_USER_AGENT,
};
use thiserror::Error;

pub const MAX_THREADS: u32 = 16;
pub const MIN_CHUNK_SIZE: usize = 1024;
pub const MIN_TIMEOUT_SECS: u64 = 5;
/// The timeout bounds a whole segment request, body included, so the CLI default has
/// to cover a large segment on a slow link.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a number, got `{value}`")]
    NotANumber { key: String, value: String },
    #[error("{key} must be between {min} and {max}, got {value}")]
    OutOfRange {
        key: String,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Effective CLI settings: defaults, then `SURGE_*` environment variables, then flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub max_threads: u32,
    pub chunk_size: usize,
    pub timeout: Duration,
    pub retry_times: u32,
    pub download_dir: PathBuf,
    pub temp_dir: Option<PathBuf>,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_threads: DEFAULT_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_IO_SIZE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry_times: DEFAULT_MAX_RETRIES,
            download_dir: PathBuf::from("."),
            temp_dir: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Settings {
    /// Reads the settings from the process environment (and `.env`, once `dotenv()` ran).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(value) = get("SURGE_MAX_THREADS") {
            settings.max_threads =
                parse_number("SURGE_MAX_THREADS", &value)?.min(u32::MAX as u64) as u32;
        }
        if let Some(value) = get("SURGE_CHUNK_SIZE") {
            settings.chunk_size =
                parse_number("SURGE_CHUNK_SIZE", &value)?.min(u32::MAX as u64) as usize;
        }
        if let Some(value) = get("SURGE_TIMEOUT") {
            settings.timeout = Duration::from_secs(parse_number("SURGE_TIMEOUT", &value)?);
        }
        if let Some(value) = get("SURGE_RETRY_TIMES") {
            settings.retry_times =
                parse_number("SURGE_RETRY_TIMES", &value)?.min(u32::MAX as u64) as u32;
        }
        if let Some(value) = get("SURGE_DOWNLOAD_DIR") {
            settings.download_dir = PathBuf::from(value);
        }
        if let Some(value) = get("SURGE_TEMP_DIR") {
            settings.temp_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = get("SURGE_USER_AGENT") {
            settings.user_agent = value;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Applies command line flags on top of the environment values.
    pub fn override_with(
        mut self,
        threads: Option<u32>,
        retries: Option<u32>,
        timeout_secs: Option<u64>,
        chunk_size: Option<usize>,
    ) -> Result<Self, ConfigError> {
        if let Some(threads) = threads {
            self.max_threads = threads;
        }
        if let Some(retries) = retries {
            self.retry_times = retries;
        }
        if let Some(secs) = timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(chunk_size) = chunk_size {
            self.chunk_size = chunk_size;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("max threads", self.max_threads as u64, 1, MAX_THREADS as u64)?;
        check_range(
            "chunk size",
            self.chunk_size as u64,
            MIN_CHUNK_SIZE as u64,
            u32::MAX as u64,
        )?;
        check_range("timeout", self.timeout.as_secs(), MIN_TIMEOUT_SECS, 3600)?;
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::NotANumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            key: key.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}
