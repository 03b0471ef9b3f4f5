//! Configuration management for the queue engine.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Wait-time estimation
    pub estimation: EstimationConfig,
    /// Analytics aggregation
    pub analytics: AnalyticsConfig,
    /// Listing pages
    pub pagination: PaginationConfig,
    /// Optimistic-concurrency retries
    pub concurrency: ConcurrencyConfig,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            estimation: EstimationConfig::default(),
            analytics: AnalyticsConfig::default(),
            pagination: PaginationConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Wait-time estimation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationConfig {
    /// Number of recent completed entries sampled for the average service time
    pub sample_limit: usize,
    /// Shortest service duration kept as a sample, in minutes
    pub min_service_minutes: f64,
    /// Longest service duration kept as a sample, in minutes
    pub max_service_minutes: f64,
    /// Average used when no sample survives, in minutes
    pub default_service_minutes: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            sample_limit: 20,
            min_service_minutes: 0.17,
            max_service_minutes: 120.0,
            default_service_minutes: 5.0,
        }
    }
}

/// Analytics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Most recent served entries sampled when no date range is given
    pub recent_sample_limit: usize,
    /// Shortest wait kept as a sample, in minutes
    pub min_wait_minutes: f64,
    /// Longest wait kept as a sample, in minutes
    pub max_wait_minutes: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            recent_sample_limit: 50,
            min_wait_minutes: 0.17,
            max_wait_minutes: 240.0,
        }
    }
}

/// Listing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Page size when the caller gives none
    pub default_page_size: usize,
    /// Largest page a caller may ask for
    pub max_page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

/// Conflict retry configuration for joins and removals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Retries after the first attempt
    pub conflict_retries: usize,
    /// Delay before the first retry, in milliseconds
    pub retry_initial_delay_ms: u64,
    /// Cap on the delay between retries, in milliseconds
    pub retry_max_delay_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 5,
            retry_initial_delay_ms: 10,
            retry_max_delay_ms: 500,
        }
    }
}

impl ConcurrencyConfig {
    /// Retry policy for the compare-and-swap loops
    #[must_use]
    pub fn retry_policy(&self) -> campus_queue_runtime::retry::RetryPolicy {
        campus_queue_runtime::retry::RetryPolicy::builder()
            .max_retries(self.conflict_retries)
            .initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
            .max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .build()
    }
}

/// An environment variable holds a value that does not parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid value {value:?} for {key}: {reason}")]
pub struct ConfigError {
    /// Variable name
    pub key: &'static str,
    /// Raw value
    pub value: String,
    /// Parser message
    pub reason: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparseable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            estimation: EstimationConfig {
                sample_limit: env::var("QUEUE_ESTIMATE_SAMPLE_LIMIT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(20),
                min_service_minutes: env::var("QUEUE_MIN_SERVICE_MINUTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.17),
                max_service_minutes: env::var("QUEUE_MAX_SERVICE_MINUTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120.0),
                default_service_minutes: env::var("QUEUE_DEFAULT_SERVICE_MINUTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5.0),
            },
            analytics: AnalyticsConfig {
                recent_sample_limit: env::var("ANALYTICS_RECENT_SAMPLE_LIMIT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(50),
                min_wait_minutes: env::var("ANALYTICS_MIN_WAIT_MINUTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.17),
                max_wait_minutes: env::var("ANALYTICS_MAX_WAIT_MINUTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(240.0),
            },
            pagination: PaginationConfig {
                default_page_size: env::var("QUEUE_PAGE_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                max_page_size: env::var("QUEUE_MAX_PAGE_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(100),
            },
            concurrency: ConcurrencyConfig {
                conflict_retries: env::var("QUEUE_CONFLICT_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
                retry_initial_delay_ms: env::var("QUEUE_RETRY_INITIAL_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                retry_max_delay_ms: env::var("QUEUE_RETRY_MAX_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            },
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Load configuration from environment variables, rejecting unparseable values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first variable that is set but does not parse.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            estimation: EstimationConfig {
                sample_limit: parse_var(
                    "QUEUE_ESTIMATE_SAMPLE_LIMIT",
                    defaults.estimation.sample_limit,
                )?,
                min_service_minutes: parse_var(
                    "QUEUE_MIN_SERVICE_MINUTES",
                    defaults.estimation.min_service_minutes,
                )?,
                max_service_minutes: parse_var(
                    "QUEUE_MAX_SERVICE_MINUTES",
                    defaults.estimation.max_service_minutes,
                )?,
                default_service_minutes: parse_var(
                    "QUEUE_DEFAULT_SERVICE_MINUTES",
                    defaults.estimation.default_service_minutes,
                )?,
            },
            analytics: AnalyticsConfig {
                recent_sample_limit: parse_var(
                    "ANALYTICS_RECENT_SAMPLE_LIMIT",
                    defaults.analytics.recent_sample_limit,
                )?,
                min_wait_minutes: parse_var(
                    "ANALYTICS_MIN_WAIT_MINUTES",
                    defaults.analytics.min_wait_minutes,
                )?,
                max_wait_minutes: parse_var(
                    "ANALYTICS_MAX_WAIT_MINUTES",
                    defaults.analytics.max_wait_minutes,
                )?,
            },
            pagination: PaginationConfig {
                default_page_size: parse_var(
                    "QUEUE_PAGE_SIZE",
                    defaults.pagination.default_page_size,
                )?,
                max_page_size: parse_var("QUEUE_MAX_PAGE_SIZE", defaults.pagination.max_page_size)?,
            },
            concurrency: ConcurrencyConfig {
                conflict_retries: parse_var(
                    "QUEUE_CONFLICT_RETRIES",
                    defaults.concurrency.conflict_retries,
                )?,
                retry_initial_delay_ms: parse_var(
                    "QUEUE_RETRY_INITIAL_DELAY_MS",
                    defaults.concurrency.retry_initial_delay_ms,
                )?,
                retry_max_delay_ms: parse_var(
                    "QUEUE_RETRY_MAX_DELAY_MS",
                    defaults.concurrency.retry_max_delay_ms,
                )?,
            },
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn parse_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, env::var(key).ok(), default)
}

/// Parses a raw variable value; `None` yields `default`.
fn parse_value<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError {
            key,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
