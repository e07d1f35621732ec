//! Configuration loading from environment variables.
//!
//! Values are validated early so startup fails fast with actionable errors.
//! A missing `HF_API_KEY` is the one exception: the server still starts, and
//! every inference call fails with a configuration error instead.

use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::prompt::ModelProfile;
use crate::script::{ScriptRanges, DEFAULT_SCRIPT_RANGES};

pub const DEFAULT_HF_API_BASE: &str = "https://api-inference.huggingface.co/models";
pub const DEFAULT_HOURLY_LIMIT: u64 = 20;
pub const DEFAULT_DAILY_LIMIT: u64 = 1000;
pub const MAX_INFERENCE_TIMEOUT_SECS: u64 = 600;
/// Longest rate-limit window accepted: one year.
pub const MAX_WINDOW_SECS: u64 = 31_536_000;

/// Where the rate-limit counters live.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CounterStoreKind {
    /// Process-local counters; not shared across replicas.
    Memory,
    /// Upstash Redis REST API.
    Upstash { url: String, token: String },
}

impl CounterStoreKind {
    /// Short name used in logs and the status endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Upstash { .. } => "upstash",
        }
    }
}

/// Admission-control settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Per-identity cap within one hourly window.
    pub hourly_limit: u64,
    /// Global cap within one daily window.
    pub daily_limit: u64,
    pub hourly_window: Duration,
    pub daily_window: Duration,
    /// Admit requests when the counter store is unreachable.
    pub fail_open: bool,
    /// Increment both counters on every check, even when the hourly one denies.
    pub charge_both: bool,
    /// Header carrying the caller identity, set by a trusted proxy.
    pub identity_header: String,
    /// Identity shared by all callers that arrive without the header.
    pub anonymous_identity: String,
    pub store: CounterStoreKind,
}

/// Runtime configuration for the HTTP server, backend, and limiter.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host interface to bind, for example `127.0.0.1`.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    /// Hugging Face inference token. Absent means inference is disabled.
    pub hf_api_key: Option<String>,
    /// Base URL the model id is appended to.
    pub hf_api_base: String,
    /// Prompt framing and generation parameters.
    pub model_profile: ModelProfile,
    /// Model id sent to the backend.
    pub model_id: String,
    /// Per-call timeout for the inference request.
    pub inference_timeout: Duration,
    /// Characters considered part of the translation's script.
    pub script_ranges: ScriptRanges,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Builds configuration from environment variables.
    ///
    /// Variables:
    /// - `HOST` (default `127.0.0.1`)
    /// - `PORT` (default `3000`)
    /// - `HF_API_KEY` (optional)
    /// - `HF_API_BASE` (default `https://api-inference.huggingface.co/models`)
    /// - `MODEL_PROFILE` (`mixtral`, `yi` or `zephyr`; default `mixtral`)
    /// - `HF_MODEL` (optional override of the profile's model id)
    /// - `INFERENCE_TIMEOUT_SECS` (default `60`, min `1`, max `600`)
    /// - `TARGET_SCRIPT_RANGES` (default `4E00-9FFF`)
    /// - `RATE_LIMIT_HOURLY` (default `20`)
    /// - `RATE_LIMIT_DAILY` (default `1000`)
    /// - `RATE_LIMIT_HOURLY_WINDOW_SECS` (default `3600`, max one year)
    /// - `RATE_LIMIT_DAILY_WINDOW_SECS` (default `86400`, max one year)
    /// - `RATE_LIMIT_FAIL_OPEN` (default `false`)
    /// - `RATE_LIMIT_CHARGE_BOTH` (default `true`)
    /// - `IDENTITY_HEADER` (default `x-forwarded-for`)
    /// - `ANONYMOUS_IDENTITY` (default `unknown`)
    /// - `COUNTER_STORE` (`memory` or `upstash`; default `memory`)
    /// - `UPSTASH_REDIS_REST_URL`, `UPSTASH_REDIS_REST_TOKEN` (required for `upstash`)
    pub fn from_env() -> Result<Self, AppError> {
        let host = env_str("HOST", "127.0.0.1");
        let port = env_u16("PORT", 3000)?;

        let model_profile = ModelProfile::parse(&env_str("MODEL_PROFILE", "mixtral"))?;
        let model_id = env_opt("HF_MODEL").unwrap_or_else(|| model_profile.model_id().to_string());
        let inference_timeout = Duration::from_secs(env_u64_bounded(
            "INFERENCE_TIMEOUT_SECS",
            60,
            1,
            MAX_INFERENCE_TIMEOUT_SECS,
        )?);
        let script_ranges =
            ScriptRanges::parse(&env_str("TARGET_SCRIPT_RANGES", DEFAULT_SCRIPT_RANGES))?;

        let store = match env_str("COUNTER_STORE", "memory").as_str() {
            "memory" => CounterStoreKind::Memory,
            "upstash" => CounterStoreKind::Upstash {
                url: env_opt("UPSTASH_REDIS_REST_URL").ok_or_else(|| {
                    AppError::configuration(
                        "COUNTER_STORE=upstash requires UPSTASH_REDIS_REST_URL",
                    )
                })?,
                token: env_opt("UPSTASH_REDIS_REST_TOKEN").ok_or_else(|| {
                    AppError::configuration(
                        "COUNTER_STORE=upstash requires UPSTASH_REDIS_REST_TOKEN",
                    )
                })?,
            },
            other => {
                return Err(AppError::configuration(format!(
                    "invalid COUNTER_STORE={other:?}; expected memory or upstash"
                )));
            }
        };

        let rate_limit = RateLimitConfig {
            hourly_limit: env_u64_bounded("RATE_LIMIT_HOURLY", DEFAULT_HOURLY_LIMIT, 1, u64::MAX)?,
            daily_limit: env_u64_bounded("RATE_LIMIT_DAILY", DEFAULT_DAILY_LIMIT, 1, u64::MAX)?,
            hourly_window: Duration::from_secs(env_u64_bounded(
                "RATE_LIMIT_HOURLY_WINDOW_SECS",
                3600,
                1,
                MAX_WINDOW_SECS,
            )?),
            daily_window: Duration::from_secs(env_u64_bounded(
                "RATE_LIMIT_DAILY_WINDOW_SECS",
                86_400,
                1,
                MAX_WINDOW_SECS,
            )?),
            fail_open: env_bool("RATE_LIMIT_FAIL_OPEN", false)?,
            charge_both: env_bool("RATE_LIMIT_CHARGE_BOTH", true)?,
            identity_header: env_str("IDENTITY_HEADER", "x-forwarded-for").to_ascii_lowercase(),
            anonymous_identity: env_str("ANONYMOUS_IDENTITY", "unknown"),
            store,
        };

        Ok(Self {
            host,
            port,
            hf_api_key: env_opt("HF_API_KEY"),
            hf_api_base: env_str("HF_API_BASE", DEFAULT_HF_API_BASE),
            model_profile,
            model_id,
            inference_timeout,
            script_ranges,
            rate_limit,
        })
    }
}

fn env_str(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

fn env_u16(name: &str, default: u16) -> Result<u16, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.trim().parse::<u16>().map_err(|_| {
        AppError::configuration(format!("invalid {name}={raw:?}; expected integer 1-65535"))
    })?;
    if parsed == 0 {
        return Err(AppError::configuration(format!(
            "invalid {name}={raw:?}; expected > 0"
        )));
    }
    Ok(parsed)
}

fn env_bool(name: &str, default: bool) -> Result<bool, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_bool(name, &raw)
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::configuration(format!(
            "invalid {name}={raw:?}; expected true/false"
        ))),
    }
}

fn env_u64_bounded(name: &str, default: u64, min: u64, max: u64) -> Result<u64, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_u64_bounded(name, &raw, min, max)
}

fn parse_u64_bounded(name: &str, raw: &str, min: u64, max: u64) -> Result<u64, AppError> {
    let parsed = raw.trim().parse::<u64>().map_err(|_| {
        AppError::configuration(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        ))
    })?;
    if parsed < min || parsed > max {
        return Err(AppError::configuration(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        )));
    }
    Ok(parsed)
}
