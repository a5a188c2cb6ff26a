use std::env;
use std::fs;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::classifier::RuleSet;
use crate::invoker::RetryPolicy;

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model_id: String,
    pub api_key: String,
    pub rules: RuleSet,
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
    pub statsd_addr: Option<String>,
    pub max_request_bytes: Option<usize>,
    pub retry_attempts: u32,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
}

impl AppConfig {
    /// Read configuration from the environment:
    ///
    /// * `GEMINI_API_KEY` (required) – provider credential, never defaulted.
    /// * `SENTINEL_MODEL_ID` (optional) – model identifier.
    /// * `SENTINEL_RULES_CONFIG` (optional) – path to a JSON rule-set file.
    /// * `LOG_FILE` / `LOG_MAX_BYTES` / `LOG_ROTATE_KEEP` /
    ///   `LOG_ROTATE_COMPRESS` (optional) – telemetry log sink and rotation.
    /// * `STATSD_ADDR` (optional) – DogStatsD endpoint for metrics.
    /// * `SENTINEL_MAX_REQUEST_BYTES` (optional) – request body cap.
    /// * `SENTINEL_RETRY_ATTEMPTS` / `SENTINEL_BACKOFF_MIN_SECS` /
    ///   `SENTINEL_BACKOFF_MAX_SECS` (optional) – retry tuning.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("GEMINI_API_KEY must be set"))?;

        let model_id = env::var("SENTINEL_MODEL_ID")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "gemini-2.0-flash".to_string());

        let rules = if let Ok(path) = env::var("SENTINEL_RULES_CONFIG") {
            let content = fs::read_to_string(&path).with_context(|| {
                format!(
                    "Failed to read SENTINEL_RULES_CONFIG '{}': file unreadable",
                    path
                )
            })?;
            serde_json::from_str::<RuleSet>(&content).with_context(|| {
                format!(
                    "Failed to parse SENTINEL_RULES_CONFIG '{}': invalid JSON rule set",
                    path
                )
            })?
        } else {
            RuleSet::default()
        };

        let log_file = env::var("LOG_FILE").ok();
        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        let statsd_addr = env::var("STATSD_ADDR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let max_request_bytes =
            parse_optional_u64("SENTINEL_MAX_REQUEST_BYTES")?.map(|v| v as usize);
        let retry_attempts = parse_optional_u64("SENTINEL_RETRY_ATTEMPTS")?.unwrap_or(3) as u32;
        let backoff_min_secs = parse_optional_u64("SENTINEL_BACKOFF_MIN_SECS")?.unwrap_or(2);
        let backoff_max_secs = parse_optional_u64("SENTINEL_BACKOFF_MAX_SECS")?.unwrap_or(60);
        if backoff_min_secs > backoff_max_secs {
            return Err(anyhow!(
                "SENTINEL_BACKOFF_MIN_SECS must not exceed SENTINEL_BACKOFF_MAX_SECS"
            ));
        }

        Ok(Self {
            model_id,
            api_key,
            rules,
            log_file,
            rotation,
            statsd_addr,
            max_request_bytes,
            retry_attempts,
            backoff_min_secs,
            backoff_max_secs,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            min_backoff: Duration::from_secs(self.backoff_min_secs),
            max_backoff: Duration::from_secs(self.backoff_max_secs),
        }
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
