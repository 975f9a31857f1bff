use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{RateLimitConfig, Scope};
use crate::retry::RetryPolicy;
use crate::{ErrorKind, Result};

/// Validated rate limiting settings of a [`PoliteClient`](crate::PoliteClient).
///
/// The pacing interval of a scope is derived from its target rate and its
/// concurrency: with `concurrency` permits, each permit must be held for
/// `concurrency / rate` seconds to average out at `rate` requests per second.
///
/// `RateSettings` is an immutable value. Every `with_*` method returns a new
/// value with all intervals derived again, so an interval can never be out of
/// date with respect to the rate and concurrency it was derived from.
///
/// # Examples
///
/// ```
/// use polite_lib::ratelimit::RateSettings;
/// use std::time::Duration;
///
/// let settings = RateSettings::new(Some(100.0), Some(10.0))?
///     .with_global_concurrency(10)?
///     .with_domain_concurrency(5)?
///     .with_max_retries(1);
///
/// assert_eq!(settings.global_interval(), Some(Duration::from_millis(100)));
/// assert_eq!(settings.domain_interval(), Some(Duration::from_millis(500)));
/// # Ok::<(), polite_lib::ErrorKind>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RateLimitConfig", into = "RateLimitConfig")]
pub struct RateSettings {
    global_rate: Option<f64>,
    domain_rate: Option<f64>,
    global_concurrency: usize,
    domain_concurrency: usize,
    max_retries: u64,
    retry_wait_time: Option<Duration>,
    retry_policy: RetryPolicy,
    max_domains: Option<usize>,
    global_interval: Option<Duration>,
    domain_interval: Option<Duration>,
}

impl RateSettings {
    /// Create settings with the given target rates (in requests per second)
    /// and a concurrency of one for both scopes.
    /// `None` leaves the scope unlimited.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidRate`] if a rate is not a finite number
    /// greater than zero.
    pub fn new(global_rate: Option<f64>, domain_rate: Option<f64>) -> Result<Self> {
        RateLimitConfig {
            global_rate,
            domain_rate,
            ..RateLimitConfig::default()
        }
        .try_into()
    }

    /// Settings without any rate limit
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            global_rate: None,
            domain_rate: None,
            global_concurrency: 1,
            domain_concurrency: 1,
            max_retries: 0,
            retry_wait_time: None,
            retry_policy: RetryPolicy::Unsuccessful,
            max_domains: None,
            global_interval: None,
            domain_interval: None,
        }
    }

    /// Replace the global target rate
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidRate`] for non-positive or non-finite rates.
    pub fn with_global_rate(self, global_rate: Option<f64>) -> Result<Self> {
        Self {
            global_rate,
            ..self
        }
        .derive()
    }

    /// Replace the per-domain target rate
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidRate`] for non-positive or non-finite rates.
    pub fn with_domain_rate(self, domain_rate: Option<f64>) -> Result<Self> {
        Self {
            domain_rate,
            ..self
        }
        .derive()
    }

    /// Replace the maximum number of simultaneous requests across all domains
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConcurrency`] if `global_concurrency` is zero.
    pub fn with_global_concurrency(self, global_concurrency: usize) -> Result<Self> {
        Self {
            global_concurrency,
            ..self
        }
        .derive()
    }

    /// Replace the maximum number of simultaneous requests per domain
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConcurrency`] if `domain_concurrency` is zero.
    pub fn with_domain_concurrency(self, domain_concurrency: usize) -> Result<Self> {
        Self {
            domain_concurrency,
            ..self
        }
        .derive()
    }

    /// Replace the number of retries for unsuccessful responses
    #[must_use]
    pub const fn with_max_retries(self, max_retries: u64) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    /// Wait between retries, doubled after every retry
    #[must_use]
    pub const fn with_retry_wait_time(self, retry_wait_time: Option<Duration>) -> Self {
        Self {
            retry_wait_time,
            ..self
        }
    }

    /// Replace the policy deciding which failures are retried
    #[must_use]
    pub const fn with_retry_policy(self, retry_policy: RetryPolicy) -> Self {
        Self {
            retry_policy,
            ..self
        }
    }

    /// Bound the number of destinations tracked at once
    #[must_use]
    pub const fn with_max_domains(self, max_domains: Option<usize>) -> Self {
        Self {
            max_domains,
            ..self
        }
    }

    /// Validate all fields and derive the intervals of both scopes
    fn derive(self) -> Result<Self> {
        let global_interval = interval(Scope::Global, self.global_rate, self.global_concurrency)?;
        let domain_interval = interval(Scope::Domain, self.domain_rate, self.domain_concurrency)?;
        Ok(Self {
            global_interval,
            domain_interval,
            ..self
        })
    }

    /// Target requests per second across all domains
    #[must_use]
    pub const fn global_rate(&self) -> Option<f64> {
        self.global_rate
    }

    /// Target requests per second for each domain
    #[must_use]
    pub const fn domain_rate(&self) -> Option<f64> {
        self.domain_rate
    }

    /// Maximum number of simultaneous requests across all domains
    #[must_use]
    pub const fn global_concurrency(&self) -> usize {
        self.global_concurrency
    }

    /// Maximum number of simultaneous requests per domain
    #[must_use]
    pub const fn domain_concurrency(&self) -> usize {
        self.domain_concurrency
    }

    /// Retries after the first attempt of a request
    #[must_use]
    pub const fn max_retries(&self) -> u64 {
        self.max_retries
    }

    /// Wait before the first retry, doubled for each further one
    #[must_use]
    pub const fn retry_wait_time(&self) -> Option<Duration> {
        self.retry_wait_time
    }

    /// Which outcomes are retried
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Bound on the number of tracked domains, `None` if unbounded
    #[must_use]
    pub const fn max_domains(&self) -> Option<usize> {
        self.max_domains
    }

    /// How long a global permit is held per request, `None` if unlimited
    #[must_use]
    pub const fn global_interval(&self) -> Option<Duration> {
        self.global_interval
    }

    /// How long a domain permit is held per request, `None` if unlimited
    #[must_use]
    pub const fn domain_interval(&self) -> Option<Duration> {
        self.domain_interval
    }

    /// The interval of the given scope
    #[must_use]
    pub const fn interval(&self, scope: Scope) -> Option<Duration> {
        match scope {
            Scope::Global => self.global_interval,
            Scope::Domain => self.domain_interval,
        }
    }
}

impl Default for RateSettings {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl TryFrom<RateLimitConfig> for RateSettings {
    type Error = ErrorKind;

    fn try_from(config: RateLimitConfig) -> Result<Self> {
        Self {
            global_rate: config.global_rate,
            domain_rate: config.domain_rate,
            global_concurrency: config.global_concurrency,
            domain_concurrency: config.domain_concurrency,
            max_retries: config.max_retries,
            retry_wait_time: config.retry_wait_time,
            retry_policy: config.retry_policy,
            max_domains: config.max_domains,
            global_interval: None,
            domain_interval: None,
        }
        .derive()
    }
}

impl From<RateSettings> for RateLimitConfig {
    fn from(settings: RateSettings) -> Self {
        Self {
            global_rate: settings.global_rate,
            domain_rate: settings.domain_rate,
            global_concurrency: settings.global_concurrency,
            domain_concurrency: settings.domain_concurrency,
            max_retries: settings.max_retries,
            retry_wait_time: settings.retry_wait_time,
            retry_policy: settings.retry_policy,
            max_domains: settings.max_domains,
        }
    }
}

/// Derive the pacing interval `concurrency / rate` of a scope
#[allow(clippy::cast_precision_loss)]
fn interval(scope: Scope, rate: Option<f64>, concurrency: usize) -> Result<Option<Duration>> {
    if concurrency == 0 {
        return Err(ErrorKind::InvalidConcurrency { scope, concurrency });
    }
    let Some(rate) = rate else {
        return Ok(None);
    };
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ErrorKind::InvalidRate { scope, rate });
    }
    Duration::try_from_secs_f64(concurrency as f64 / rate)
        .map(Some)
        .map_err(|_| ErrorKind::InvalidRate { scope, rate })
}
