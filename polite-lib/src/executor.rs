//! Retrying requests while their admission permits are held.

use reqwest::Request;
use std::time::Duration;
use tokio::time::Instant;

use crate::ratelimit::RateSettings;
use crate::{Response, Result, RetryPolicy, Transport};

/// The outcome of sending one request, including all of its retries.
#[derive(Debug)]
pub(crate) struct Execution {
    /// The last response, or the fault which ended the attempts
    pub(crate) outcome: Result<Response>,
    /// Time spent on all attempts and the waits between them
    pub(crate) elapsed: Duration,
    /// Number of times the request was sent
    pub(crate) attempts: u64,
}

/// Sends a request until it succeeds, the retry policy gives up on it,
/// or `max_retries` retries were made.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryingExecutor {
    max_retries: u64,
    policy: RetryPolicy,
    retry_wait_time: Option<Duration>,
}

impl RetryingExecutor {
    pub(crate) const fn new(settings: &RateSettings) -> Self {
        Self {
            max_retries: settings.max_retries(),
            policy: settings.retry_policy(),
            retry_wait_time: settings.retry_wait_time(),
        }
    }

    /// Retry requests up to `max_retries` times,
    /// with an exponential backoff if a wait time is configured.
    ///
    /// Exhausted retries are not an error: the last response is returned
    /// as is. Faults are returned once the policy stops retrying them.
    pub(crate) async fn execute(&self, transport: &dyn Transport, request: Request) -> Execution {
        let url = request.url().clone();
        let mut request = request;
        let mut wait_time = self.retry_wait_time;
        let mut elapsed = Duration::ZERO;
        let mut attempts: u64 = 0;

        loop {
            // Keep a copy around in case this attempt has to be repeated
            let replay = (attempts < self.max_retries).then(|| request.try_clone());

            attempts += 1;
            let start = Instant::now();
            let outcome = transport.execute(request).await;
            let retry = match &outcome {
                Ok(response) => {
                    elapsed += response.elapsed();
                    self.policy.retries_response(response.status())
                }
                Err(e) => {
                    elapsed += start.elapsed();
                    self.policy.retries_fault(e)
                }
            };

            match replay {
                Some(Some(next)) if retry => {
                    let reason = match &outcome {
                        Ok(response) => response.status().to_string(),
                        Err(e) => e.to_string(),
                    };
                    log::info!(
                        "Request to {url} failed with {reason}. Retries left: {}.",
                        self.max_retries - (attempts - 1)
                    );
                    if let Some(wait) = wait_time {
                        tokio::time::sleep(wait).await;
                        elapsed += wait;
                        wait_time = Some(wait.saturating_mul(2));
                    }
                    request = next;
                }
                Some(None) if retry => {
                    log::warn!(
                        "Not retrying request to {url}: its body is a stream and cannot be sent again"
                    );
                    return Execution {
                        outcome: outcome.map(|response| response.with_elapsed(elapsed)),
                        elapsed,
                        attempts,
                    };
                }
                _ => {
                    return Execution {
                        outcome: outcome.map(|response| response.with_elapsed(elapsed)),
                        elapsed,
                        attempts,
                    };
                }
            }
        }
    }
}
