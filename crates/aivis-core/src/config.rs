use crate::app_config::{AppConfig, BackendTransport, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files; useful for testing
/// or when the caller manages env setup.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

fn invalid(var: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason: reason.into(),
    }
}

/// Build application configuration using the provided env-var lookup function.
///
/// This is the core parsing/validation logic, decoupled from the actual environment
/// so it can be tested with a pure `HashMap` lookup, without `set_var`/`remove_var`.
///
/// # Errors
///
/// Returns `ConfigError` if a required variable is missing or any value is invalid.
#[allow(clippy::too_many_lines)]
pub fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        or_default(var, default)
            .parse::<SocketAddr>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_i32 = |var: &str, default: &str| -> Result<i32, ConfigError> {
        or_default(var, default)
            .parse::<i32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        parse_flag(&or_default(var, default)).ok_or_else(|| invalid(var, "expected true or false"))
    };

    let database_url = require("DATABASE_URL")?;

    let env = parse_environment(&or_default("AIVIS_ENV", "development"))?;
    let bind_addr = parse_addr("AIVIS_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("AIVIS_LOG_LEVEL", "info");
    let pricing_path = PathBuf::from(or_default("AIVIS_PRICING_PATH", "./config/pricing.yaml"));

    let db_max_connections = parse_u32("AIVIS_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("AIVIS_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("AIVIS_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let models = parse_models(&or_default("AIVIS_MODELS", "demo-mini"))?;
    let web_search_enabled = parse_bool("AIVIS_WEB_SEARCH_ENABLED", "false")?;
    let answer_max_tokens = parse_u32("AIVIS_ANSWER_MAX_TOKENS", "2048")?;

    let backend_transport = parse_transport(&or_default("AIVIS_BACKEND_TRANSPORT", "subprocess"))?;
    let answer_backend = or_default("AIVIS_ANSWER_BACKEND", "aivis-answer");
    let detect_backend = or_default("AIVIS_DETECT_BACKEND", "aivis-detect");
    if answer_backend.trim().is_empty() {
        return Err(invalid("AIVIS_ANSWER_BACKEND", "must not be empty"));
    }
    if detect_backend.trim().is_empty() {
        return Err(invalid("AIVIS_DETECT_BACKEND", "must not be empty"));
    }
    let detect_model = or_default("AIVIS_DETECT_MODEL", "demo-mini");

    let answer_timeout_secs = parse_u64("AIVIS_ANSWER_TIMEOUT_SECS", "60")?;
    let web_search_timeout_secs = parse_u64("AIVIS_WEB_SEARCH_TIMEOUT_SECS", "180")?;
    let detect_timeout_secs = parse_u64("AIVIS_DETECT_TIMEOUT_SECS", "60")?;
    let backend_max_retries = parse_u32("AIVIS_BACKEND_MAX_RETRIES", "2")?;
    let backend_retry_backoff_base_ms = parse_u64("AIVIS_BACKEND_RETRY_BACKOFF_BASE_MS", "1000")?;

    let run_max_concurrent_calls = parse_usize("AIVIS_RUN_MAX_CONCURRENT_CALLS", "4")?;
    let stage_timeout_secs = parse_u64("AIVIS_STAGE_TIMEOUT_SECS", "900")?;
    let tag_position_attributes = parse_bool("AIVIS_TAG_POSITION_ATTRIBUTES", "false")?;

    let worker_enabled = parse_bool("AIVIS_WORKER_ENABLED", "true")?;
    let worker_max_concurrent_runs = parse_usize("AIVIS_WORKER_MAX_CONCURRENT_RUNS", "2")?;
    let worker_poll_interval_ms = parse_u64("AIVIS_WORKER_POLL_INTERVAL_MS", "1000")?;
    let job_max_attempts = parse_i32("AIVIS_JOB_MAX_ATTEMPTS", "5")?;
    if job_max_attempts < 1 {
        return Err(invalid("AIVIS_JOB_MAX_ATTEMPTS", "must be at least 1"));
    }
    let job_retry_backoff_base_secs = parse_u64("AIVIS_JOB_RETRY_BACKOFF_BASE_SECS", "30")?;
    let job_lock_timeout_secs = parse_u64("AIVIS_JOB_LOCK_TIMEOUT_SECS", "1800")?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        pricing_path,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        models,
        web_search_enabled,
        answer_max_tokens,
        backend_transport,
        answer_backend,
        detect_backend,
        detect_model,
        answer_timeout_secs,
        web_search_timeout_secs,
        detect_timeout_secs,
        backend_max_retries,
        backend_retry_backoff_base_ms,
        run_max_concurrent_calls,
        stage_timeout_secs,
        tag_position_attributes,
        worker_enabled,
        worker_max_concurrent_runs,
        worker_poll_interval_ms,
        job_max_attempts,
        job_retry_backoff_base_secs,
        job_lock_timeout_secs,
    })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` for anything other than
/// `development`, `test`, or `production`.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(invalid(
            "AIVIS_ENV",
            format!("unknown environment '{other}'"),
        )),
    }
}

fn parse_transport(s: &str) -> Result<BackendTransport, ConfigError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "subprocess" => Ok(BackendTransport::Subprocess),
        "http" => Ok(BackendTransport::Http),
        other => Err(invalid(
            "AIVIS_BACKEND_TRANSPORT",
            format!("unknown transport '{other}'; expected subprocess or http"),
        )),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Split a comma-separated model list, dropping blanks and duplicates while
/// keeping the configured order.
fn parse_models(raw: &str) -> Result<Vec<String>, ConfigError> {
    let mut models: Vec<String> = Vec::new();
    for model in raw.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        if !models.iter().any(|m| m == model) {
            models.push(model.to_string());
        }
    }
    if models.is_empty() {
        return Err(invalid("AIVIS_MODELS", "at least one model id is required"));
    }
    Ok(models)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
