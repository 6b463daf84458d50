//! Dispatcher configuration from environment variables and an optional TOML file.
//!
//! Precedence: environment, then the file named by `DISPATCH_CONFIG`, then
//! built-in defaults. Invalid environment values fall back to the next
//! source without failing; an unreadable or malformed file is an error.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `DISPATCH_REQUEST_CEILING` | 3500 | Request bucket ceiling |
//! | `DISPATCH_RESOURCE_CEILING` | 90000 | Resource (token) bucket ceiling |
//! | `DISPATCH_REQUEST_REFILL_PER_SEC` | ceiling / 60 | Request refill rate |
//! | `DISPATCH_RESOURCE_REFILL_PER_SEC` | ceiling / 60 | Resource refill rate |
//! | `DISPATCH_WORKER_POOL_SIZE` | 5 | Concurrent provider calls |
//! | `DISPATCH_MAX_ATTEMPTS` | 3 | Attempts per job |
//! | `DISPATCH_MESSAGE_COST_OVERHEAD` | 4 | Per-message cost overhead |
//! | `DISPATCH_QUEUE_CAPACITY` | 1000 | Max pending fresh jobs |
//! | `DISPATCH_ADMIT_POLL_MS` | 25 | Admission polling interval |
//! | `DISPATCH_CALL_TIMEOUT_SECS` | 60 | Provider call timeout |
//! | `DISPATCH_ESTIMATE_TIMEOUT_MS` | 1000 | Cost estimation timeout |
//! | `DISPATCH_SHUTDOWN_TIMEOUT` | 30 | In-flight drain timeout (secs) |
//! | `DISPATCH_PROVIDER_URL` | `https://api.openai.com/v1` | Provider base URL |
//! | `DISPATCH_MODEL` | `gpt-3.5-turbo` | Provider model |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admission::{BudgetConfig, DEFAULT_PER_MESSAGE_OVERHEAD};
use crate::provider::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::scheduler::WorkerPoolConfig;
use crate::DispatchConfig;

const DEFAULT_REQUEST_CEILING: f64 = 3500.0;
const DEFAULT_RESOURCE_CEILING: f64 = 90_000.0;
const REFILL_WINDOW_SECS: f64 = 60.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Optional file layer. Keys mirror the environment variables without the
/// `DISPATCH_` prefix, in lowercase.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub request_ceiling: Option<f64>,
    pub resource_ceiling: Option<f64>,
    pub request_refill_per_sec: Option<f64>,
    pub resource_refill_per_sec: Option<f64>,
    pub worker_pool_size: Option<usize>,
    pub max_attempts: Option<u32>,
    pub message_cost_overhead: Option<u64>,
    pub queue_capacity: Option<usize>,
    pub admit_poll_ms: Option<u64>,
    pub call_timeout_secs: Option<u64>,
    pub estimate_timeout_ms: Option<u64>,
    pub shutdown_timeout: Option<u64>,
    pub provider_url: Option<String>,
    pub model: Option<String>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Everything the binary needs to assemble a dispatcher.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub dispatch: DispatchConfig,
    pub per_message_overhead: u64,
    pub provider_url: String,
    pub model: String,
    pub config_file: Option<PathBuf>,
}

/// Flat summary of effective values.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub request_ceiling: f64,
    pub resource_ceiling: f64,
    pub request_refill_per_sec: f64,
    pub resource_refill_per_sec: f64,
    pub worker_pool_size: usize,
    pub max_attempts: u32,
    pub message_cost_overhead: u64,
    pub queue_capacity: usize,
    pub admit_poll_ms: u64,
    pub call_timeout_secs: u64,
    pub estimate_timeout_ms: u64,
    pub shutdown_timeout_secs: u64,
    pub provider_url: String,
    pub model: String,
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a finite, non-negative `f64`, returning `default` otherwise.
fn parse_rate(key: &str, default: f64) -> f64 {
    let value = parse_env(key, default);
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        default
    }
}

fn parse_string(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn load_budget(file: &FileConfig) -> BudgetConfig {
    let request_ceiling = parse_rate(
        "DISPATCH_REQUEST_CEILING",
        file.request_ceiling.unwrap_or(DEFAULT_REQUEST_CEILING),
    )
    .max(1.0);
    let resource_ceiling = parse_rate(
        "DISPATCH_RESOURCE_CEILING",
        file.resource_ceiling.unwrap_or(DEFAULT_RESOURCE_CEILING),
    )
    .max(1.0);
    let request_refill_per_sec = parse_rate(
        "DISPATCH_REQUEST_REFILL_PER_SEC",
        file.request_refill_per_sec.unwrap_or(request_ceiling / REFILL_WINDOW_SECS),
    );
    let resource_refill_per_sec = parse_rate(
        "DISPATCH_RESOURCE_REFILL_PER_SEC",
        file.resource_refill_per_sec.unwrap_or(resource_ceiling / REFILL_WINDOW_SECS),
    );
    let poll_ms = parse_env("DISPATCH_ADMIT_POLL_MS", file.admit_poll_ms.unwrap_or(25)).max(1);

    BudgetConfig {
        request_ceiling,
        resource_ceiling,
        request_refill_per_sec,
        resource_refill_per_sec,
        poll_interval: Duration::from_millis(poll_ms),
    }
}

fn load_workers(file: &FileConfig) -> WorkerPoolConfig {
    let size = parse_env("DISPATCH_WORKER_POOL_SIZE", file.worker_pool_size.unwrap_or(5));
    let timeout_secs = parse_env("DISPATCH_CALL_TIMEOUT_SECS", file.call_timeout_secs.unwrap_or(60));
    WorkerPoolConfig {
        size: size.max(1),
        call_timeout: Duration::from_secs(timeout_secs.max(1)),
    }
}

/// Load configuration, reading the file named by `DISPATCH_CONFIG` if set.
pub fn load() -> Result<EnvConfig, ConfigError> {
    let path = std::env::var("DISPATCH_CONFIG").ok().map(PathBuf::from);
    load_from(path.as_deref())
}

/// Load configuration with an explicit file layer.
pub fn load_from(path: Option<&Path>) -> Result<EnvConfig, ConfigError> {
    let file = match path {
        Some(path) => FileConfig::read(path)?,
        None => FileConfig::default(),
    };

    let max_attempts = parse_env("DISPATCH_MAX_ATTEMPTS", file.max_attempts.unwrap_or(3)).max(1);
    let queue_capacity = parse_env("DISPATCH_QUEUE_CAPACITY", file.queue_capacity.unwrap_or(1000)).max(1);
    let estimate_ms = parse_env("DISPATCH_ESTIMATE_TIMEOUT_MS", file.estimate_timeout_ms.unwrap_or(1000)).max(1);
    let shutdown_secs = parse_env("DISPATCH_SHUTDOWN_TIMEOUT", file.shutdown_timeout.unwrap_or(30)).max(1);
    let per_message_overhead = parse_env(
        "DISPATCH_MESSAGE_COST_OVERHEAD",
        file.message_cost_overhead.unwrap_or(DEFAULT_PER_MESSAGE_OVERHEAD),
    );

    Ok(EnvConfig {
        dispatch: DispatchConfig {
            budget: load_budget(&file),
            workers: load_workers(&file),
            max_attempts,
            queue_capacity,
            estimate_timeout: Duration::from_millis(estimate_ms),
            shutdown_timeout: Duration::from_secs(shutdown_secs),
        },
        per_message_overhead,
        provider_url: parse_string(
            "DISPATCH_PROVIDER_URL",
            file.provider_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        ),
        model: parse_string(
            "DISPATCH_MODEL",
            file.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        ),
        config_file: path.map(Path::to_path_buf),
    })
}

impl EnvConfig {
    pub fn effective_config(&self) -> EffectiveConfig {
        let d = &self.dispatch;
        EffectiveConfig {
            request_ceiling: d.budget.request_ceiling,
            resource_ceiling: d.budget.resource_ceiling,
            request_refill_per_sec: d.budget.request_refill_per_sec,
            resource_refill_per_sec: d.budget.resource_refill_per_sec,
            worker_pool_size: d.workers.size,
            max_attempts: d.max_attempts,
            message_cost_overhead: self.per_message_overhead,
            queue_capacity: d.queue_capacity,
            admit_poll_ms: d.budget.poll_interval.as_millis() as u64,
            call_timeout_secs: d.workers.call_timeout.as_secs(),
            estimate_timeout_ms: d.estimate_timeout.as_millis() as u64,
            shutdown_timeout_secs: d.shutdown_timeout.as_secs(),
            provider_url: self.provider_url.clone(),
            model: self.model.clone(),
        }
    }
}
