use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default number of concurrent requests per scope
const DEFAULT_CONCURRENCY: usize = 1;

/// Rate limiting configuration as read from a configuration file.
///
/// This is the raw, unvalidated form of [`RateSettings`](super::RateSettings).
/// Convert it with `RateSettings::try_from` to validate the values and derive
/// the scheduling intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Target requests per second across all destinations (unlimited if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_rate: Option<f64>,

    /// Target requests per second for each destination (unlimited if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_rate: Option<f64>,

    /// Maximum number of simultaneous requests across all destinations
    #[serde(default = "default_concurrency")]
    pub global_concurrency: usize,

    /// Maximum number of simultaneous requests to a single destination
    #[serde(default = "default_concurrency")]
    pub domain_concurrency: usize,

    /// Number of additional attempts for unsuccessful responses
    #[serde(default)]
    pub max_retries: u64,

    /// Initial wait between retries, doubled after every retry.
    /// Retries are sent back-to-back if unset.
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub retry_wait_time: Option<Duration>,

    /// Which failures are retried
    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Upper bound on the number of tracked destinations.
    /// Idle destinations are evicted once the bound is reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_domains: Option<usize>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_rate: None,
            domain_rate: None,
            global_concurrency: default_concurrency(),
            domain_concurrency: default_concurrency(),
            max_retries: 0,
            retry_wait_time: None,
            retry_policy: RetryPolicy::default(),
            max_domains: None,
        }
    }
}

/// Default number of concurrent requests per scope
const fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}
