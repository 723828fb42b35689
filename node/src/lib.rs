use anyhow::Context;
use growbet_execution::{RetryPolicy, StoreConfig};
use growbet_types::{token, Policy, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;
use url::Url;

pub mod gateway;
pub mod relayer;
pub mod sqlite;

fn default_gateway_timeout_ms() -> u64 {
    15_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_relayer_interval_ms() -> u64 {
    30_000
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

/// Bounds for driving external transfers, in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub call_timeout_ms: u64,
    pub max_attempts: u32,
    pub status_polls: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            call_timeout_ms: retry.call_timeout.as_millis() as u64,
            max_attempts: retry.max_attempts,
            status_polls: retry.status_polls,
            initial_backoff_ms: retry.initial_backoff.as_millis() as u64,
            max_backoff_ms: retry.max_backoff.as_millis() as u64,
        }
    }
}

/// Configuration of the settlement node, loaded from YAML.
#[derive(Deserialize, Serialize)]
pub struct Config {
    /// SQLite database file.
    pub database: String,

    pub gateway_url: String,
    #[serde(default)]
    pub gateway_token: Option<String>,
    #[serde(default = "default_gateway_timeout_ms")]
    pub gateway_timeout_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_relayer_interval_ms")]
    pub relayer_interval_ms: u64,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub policy: Policy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} must be a valid URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("{field} URL scheme must be http or https: {value}")]
    InvalidUrlScheme { field: &'static str, value: String },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("invalid policy: {reason}")]
    InvalidPolicy { reason: String },
}

pub struct ValidatedConfig {
    pub database: PathBuf,
    pub gateway_url: Url,
    pub gateway_token: Option<String>,
    pub gateway_timeout: Duration,
    pub log_level: Level,
    pub log_json: bool,
    pub metrics_port: u16,
    pub relayer_interval: Duration,
    pub store: StoreConfig,
    pub retry: RetryPolicy,
    pub policy: Policy,
}

struct RedactedConfig<'a>(&'a Config);

impl fmt::Debug for RedactedConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cfg = self.0;
        f.debug_struct("Config")
            .field("database", &cfg.database)
            .field("gateway_url", &cfg.gateway_url)
            .field(
                "gateway_token",
                &cfg.gateway_token.as_ref().map(|_| "<redacted>"),
            )
            .field("gateway_timeout_ms", &cfg.gateway_timeout_ms)
            .field("log_level", &cfg.log_level)
            .field("log_json", &cfg.log_json)
            .field("metrics_port", &cfg.metrics_port)
            .field("relayer_interval_ms", &cfg.relayer_interval_ms)
            .field("lock_timeout_ms", &cfg.lock_timeout_ms)
            .field("retry", &cfg.retry)
            .field("policy", &cfg.policy)
            .finish()
    }
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

fn validate_http_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|_| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => {}
        _ => {
            return Err(ConfigError::InvalidUrlScheme {
                field,
                value: value.to_string(),
            })
        }
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
    Ok(url)
}

fn validate_policy(policy: &Policy) -> Result<(), ConfigError> {
    let invalid = |reason: String| Err(ConfigError::InvalidPolicy { reason });
    let fees = u64::from(policy.treasury_fee_bps) + u64::from(policy.group_owner_fee_bps);
    if fees > BPS_DENOMINATOR || u64::from(policy.primary_treasury_fee_bps) > BPS_DENOMINATOR {
        return invalid(format!("fees exceed {BPS_DENOMINATOR} bps"));
    }
    if u64::from(policy.purchase_tolerance_bps) > BPS_DENOMINATOR {
        return invalid("purchase_tolerance_bps exceeds 10000".to_string());
    }
    if policy.min_pvp_bet == 0 || policy.min_pvp_bet > policy.max_pvp_bet {
        return invalid("pvp bet range is empty".to_string());
    }
    if policy.min_token_wager == 0 || policy.min_token_wager > policy.max_token_wager {
        return invalid("token wager range is empty".to_string());
    }
    if policy.grow_min > policy.grow_max || policy.daily_bonus_min > policy.daily_bonus_max {
        return invalid("grow or daily bonus range is empty".to_string());
    }
    if let Some(address) = &policy.treasury_address {
        token::validate_address(address)
            .map_err(|err| ConfigError::InvalidPolicy {
                reason: format!("treasury_address: {err}"),
            })?;
    }
    let mut numbers: Vec<u8> = policy.packages.iter().map(|p| p.number).collect();
    numbers.sort_unstable();
    numbers.dedup();
    if numbers.len() != policy.packages.len() {
        return invalid("package numbers must be unique".to_string());
    }
    Ok(())
}

impl Config {
    /// Reads and parses a YAML config file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {path}"))?;
        serde_yaml::from_str(&raw).context("Could not parse config file")
    }

    pub fn redacted_debug(&self) -> impl fmt::Debug + '_ {
        RedactedConfig(self)
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        if self.database.trim().is_empty() {
            return Err(ConfigError::Empty { field: "database" });
        }
        let gateway_url = validate_http_url("gateway_url", &self.gateway_url)?;
        ensure_nonzero("gateway_timeout_ms", self.gateway_timeout_ms)?;
        ensure_nonzero("relayer_interval_ms", self.relayer_interval_ms)?;
        ensure_nonzero("lock_timeout_ms", self.lock_timeout_ms)?;
        ensure_nonzero("retry.call_timeout_ms", self.retry.call_timeout_ms)?;
        ensure_nonzero("retry.max_attempts", u64::from(self.retry.max_attempts))?;
        ensure_nonzero("retry.status_polls", u64::from(self.retry.status_polls))?;
        validate_policy(&self.policy)?;

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        Ok(ValidatedConfig {
            database: PathBuf::from(self.database),
            gateway_url,
            gateway_token: self.gateway_token,
            gateway_timeout: Duration::from_millis(self.gateway_timeout_ms),
            log_level,
            log_json: self.log_json,
            metrics_port: self.metrics_port,
            relayer_interval: Duration::from_millis(self.relayer_interval_ms),
            store: StoreConfig {
                lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            },
            retry: RetryPolicy {
                call_timeout: Duration::from_millis(self.retry.call_timeout_ms),
                max_attempts: self.retry.max_attempts,
                status_polls: self.retry.status_polls,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(
                    self.retry.max_backoff_ms.max(self.retry.initial_backoff_ms),
                ),
            },
            policy: self.policy,
        })
    }
}
