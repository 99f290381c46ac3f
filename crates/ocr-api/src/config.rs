//! Runtime configuration
//!
//! Everything is read from environment variables once at startup.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use ocr_queue::{JobPolicy, ReaperConfig, WorkerConfig};

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    Invalid { var: String, value: String },
}

fn parsed<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var: var.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn secs(var: &str, default: u64) -> Result<Duration, ConfigError> {
    parsed(var, default).map(Duration::from_secs)
}

/// Parse a comma-separated list of seconds, e.g. "10,30,60"
pub fn parse_schedule(value: &str) -> Option<Vec<Duration>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().ok().map(Duration::from_secs))
        .collect()
}

/// Queue and worker configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Logical queue name (env: OCR_QUEUE_NAME)
    pub queue_name: String,
    /// Store connection URL (env: DATABASE_URL)
    pub database_url: String,
    /// Policy stamped onto every submitted job
    pub policy: JobPolicy,
    /// Worker loop settings (env: OCR_WORKERS)
    pub worker: WorkerConfig,
    /// Reaper settings (env: OCR_REAPER_INTERVAL_SECS)
    pub reaper: ReaperConfig,
    /// External OCR service; mock extractor when unset (env: OCR_EXTRACTOR_URL)
    pub extractor_url: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: "default".to_string(),
            database_url: "sqlite:ocr.db?mode=rwc".to_string(),
            policy: JobPolicy::default(),
            worker: WorkerConfig::default(),
            reaper: ReaperConfig::default(),
            extractor_url: None,
        }
    }
}

impl QueueConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let backoff_schedule = match env::var("OCR_BACKOFF_SCHEDULE") {
            Ok(value) => parse_schedule(&value).ok_or_else(|| ConfigError::Invalid {
                var: "OCR_BACKOFF_SCHEDULE".to_string(),
                value,
            })?,
            Err(_) => defaults.policy.backoff_schedule.clone(),
        };

        let policy = JobPolicy {
            max_attempts: parsed("OCR_MAX_ATTEMPTS", defaults.policy.max_attempts)?,
            backoff_schedule,
            timeout: secs("OCR_JOB_TIMEOUT_SECS", defaults.policy.timeout.as_secs())?,
            result_ttl: secs("OCR_RESULT_TTL_SECS", defaults.policy.result_ttl.as_secs())?,
            failure_ttl: secs("OCR_FAILURE_TTL_SECS", defaults.policy.failure_ttl.as_secs())?,
        };

        let worker = WorkerConfig {
            workers: parsed("OCR_WORKERS", defaults.worker.workers)?,
            ..defaults.worker
        };

        let reaper = ReaperConfig {
            interval: secs("OCR_REAPER_INTERVAL_SECS", defaults.reaper.interval.as_secs())?,
            ..defaults.reaper
        };

        Ok(Self {
            queue_name: env::var("OCR_QUEUE_NAME").unwrap_or(defaults.queue_name),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            policy,
            worker,
            reaper,
            extractor_url: env::var("OCR_EXTRACTOR_URL").ok().filter(|s| !s.is_empty()),
        })
    }
}

/// Which halves of the service a process runs (env: OCR_MODE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// HTTP surface only
    Api,
    /// Workers and reaper only
    Worker,
    #[default]
    All,
}

impl RunMode {
    pub fn serves_api(self) -> bool {
        matches!(self, RunMode::Api | RunMode::All)
    }

    pub fn runs_workers(self) -> bool {
        matches!(self, RunMode::Worker | RunMode::All)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        parsed("OCR_MODE", RunMode::default())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "api" => Ok(RunMode::Api),
            "worker" => Ok(RunMode::Worker),
            "all" => Ok(RunMode::All),
            other => Err(format!("Unknown run mode: {}", other)),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server address
    pub addr: SocketAddr,
    /// Request timeout
    pub timeout: Duration,
    /// Max request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            timeout: Duration::from_secs(30),
            max_body_size: 50 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Create from environment variables. `OCR_PORT` wins over a platform `PORT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let port_var = if env::var("OCR_PORT").is_ok() { "OCR_PORT" } else { "PORT" };
        let port: u16 = parsed(port_var, defaults.addr.port())?;

        Ok(Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            timeout: secs("OCR_TIMEOUT_SECS", defaults.timeout.as_secs())?,
            max_body_size: parsed("OCR_MAX_BODY_BYTES", defaults.max_body_size)?,
        })
    }
}
