//! Config subcommands: show, defaults, validate.
//!
//! These read configuration directly; no running dispatcher is needed.

use crate::admission::DEFAULT_REPLY_OVERHEAD;
use crate::config::{self, EffectiveConfig};
use crate::transport::DEFAULT_MAX_TOKENS;

/// Print effective config as `KEY=value` lines. Returns the exit code.
pub fn run_show() -> i32 {
    match config::load() {
        Ok(env) => {
            for (key, value) in config_lines(&env.effective_config()) {
                println!("{key}={value}");
            }
            0
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            2
        }
    }
}

/// Print built-in defaults (no env or file overrides).
pub fn run_defaults() {
    println!("DISPATCH_REQUEST_CEILING=3500");
    println!("DISPATCH_RESOURCE_CEILING=90000");
    println!("DISPATCH_REQUEST_REFILL_PER_SEC=58.333");
    println!("DISPATCH_RESOURCE_REFILL_PER_SEC=1500");
    println!("DISPATCH_WORKER_POOL_SIZE=5");
    println!("DISPATCH_MAX_ATTEMPTS=3");
    println!("DISPATCH_MESSAGE_COST_OVERHEAD=4");
    println!("DISPATCH_QUEUE_CAPACITY=1000");
    println!("DISPATCH_ADMIT_POLL_MS=25");
    println!("DISPATCH_CALL_TIMEOUT_SECS=60");
    println!("DISPATCH_ESTIMATE_TIMEOUT_MS=1000");
    println!("DISPATCH_SHUTDOWN_TIMEOUT=30");
    println!("DISPATCH_PROVIDER_URL=https://api.openai.com/v1");
    println!("DISPATCH_MODEL=gpt-3.5-turbo");
}

/// Validate configuration for obvious misconfigurations.
///
/// Returns 0 if valid, 1 if any warnings are found, 2 if it cannot be loaded.
pub fn run_validate() -> i32 {
    let cfg = match config::load() {
        Ok(env) => env.effective_config(),
        Err(e) => {
            eprintln!("ERROR: {e}");
            return 2;
        }
    };

    let warnings = validation_warnings(&cfg);
    for warning in &warnings {
        eprintln!("WARNING: {warning}");
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

/// Smallest cost a job with empty messages and the default completion ceiling can have.
fn minimum_default_job_cost(cfg: &EffectiveConfig) -> u64 {
    2 * cfg.message_cost_overhead + DEFAULT_REPLY_OVERHEAD + u64::from(DEFAULT_MAX_TOKENS)
}

pub(crate) fn validation_warnings(cfg: &EffectiveConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    let min_cost = minimum_default_job_cost(cfg);
    if cfg.resource_ceiling < min_cost as f64 {
        warnings.push(format!(
            "DISPATCH_RESOURCE_CEILING ({}) is below the cost of a default job ({min_cost}); such jobs will fail as over_capacity",
            cfg.resource_ceiling
        ));
    }
    if cfg.request_refill_per_sec == 0.0 {
        warnings.push("DISPATCH_REQUEST_REFILL_PER_SEC is 0; the request budget never refills".into());
    }
    if cfg.resource_refill_per_sec == 0.0 {
        warnings.push("DISPATCH_RESOURCE_REFILL_PER_SEC is 0; the resource budget never refills".into());
    }
    if cfg.estimate_timeout_ms > cfg.call_timeout_secs * 1000 {
        warnings.push(format!(
            "DISPATCH_ESTIMATE_TIMEOUT_MS ({}) exceeds the provider call timeout",
            cfg.estimate_timeout_ms
        ));
    }
    warnings
}

fn config_lines(cfg: &EffectiveConfig) -> Vec<(&'static str, String)> {
    vec![
        ("DISPATCH_REQUEST_CEILING", cfg.request_ceiling.to_string()),
        ("DISPATCH_RESOURCE_CEILING", cfg.resource_ceiling.to_string()),
        ("DISPATCH_REQUEST_REFILL_PER_SEC", format!("{:.3}", cfg.request_refill_per_sec)),
        ("DISPATCH_RESOURCE_REFILL_PER_SEC", format!("{:.3}", cfg.resource_refill_per_sec)),
        ("DISPATCH_WORKER_POOL_SIZE", cfg.worker_pool_size.to_string()),
        ("DISPATCH_MAX_ATTEMPTS", cfg.max_attempts.to_string()),
        ("DISPATCH_MESSAGE_COST_OVERHEAD", cfg.message_cost_overhead.to_string()),
        ("DISPATCH_QUEUE_CAPACITY", cfg.queue_capacity.to_string()),
        ("DISPATCH_ADMIT_POLL_MS", cfg.admit_poll_ms.to_string()),
        ("DISPATCH_CALL_TIMEOUT_SECS", cfg.call_timeout_secs.to_string()),
        ("DISPATCH_ESTIMATE_TIMEOUT_MS", cfg.estimate_timeout_ms.to_string()),
        ("DISPATCH_SHUTDOWN_TIMEOUT", cfg.shutdown_timeout_secs.to_string()),
        ("DISPATCH_PROVIDER_URL", cfg.provider_url.clone()),
        ("DISPATCH_MODEL", cfg.model.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{clear_env_vars, ENV_LOCK};

    fn lock() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn test_validate_passes_with_defaults() {
        let _lock = lock();
        clear_env_vars();
        assert_eq!(run_validate(), 0, "default config should pass validation");
    }

    #[test]
    fn test_validate_flags_tiny_resource_ceiling() {
        let _lock = lock();
        clear_env_vars();
        std::env::set_var("DISPATCH_RESOURCE_CEILING", "500");
        assert_eq!(run_validate(), 1);
        clear_env_vars();
    }

    #[test]
    fn test_validate_flags_zero_refill() {
        let _lock = lock();
        clear_env_vars();
        let mut cfg = config::load().unwrap().effective_config();
        cfg.resource_refill_per_sec = 0.0;
        let warnings = validation_warnings(&cfg);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("never refills"));
    }

    #[test]
    fn test_config_lines_cover_every_variable() {
        let _lock = lock();
        clear_env_vars();
        let lines = config_lines(&config::load().unwrap().effective_config());
        for key in crate::config::tests::ENV_KEYS.iter().filter(|k| **k != "DISPATCH_CONFIG") {
            assert!(lines.iter().any(|(k, _)| k == key), "missing {key}");
        }
    }
}
