use std::io;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};

use crate::ErrorKind;

/// Decides which failed attempts of a request are sent again.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RetryPolicy {
    /// Retry every response outside of the `2xx` range.
    /// Transport faults are returned to the caller without retrying.
    #[default]
    Unsuccessful,
    /// Retry only failures which are likely to go away on their own:
    /// server errors, `408 Request Timeout`, `429 Too Many Requests`,
    /// timeouts, connection failures and connection resets.
    Transient,
}

impl RetryPolicy {
    /// Whether a response with the given status should be retried
    #[must_use]
    pub fn retries_response(self, status: StatusCode) -> bool {
        match self {
            Self::Unsuccessful => !status.is_success(),
            Self::Transient => status.should_retry(),
        }
    }

    /// Whether a request which failed with `error` should be retried
    #[must_use]
    pub fn retries_fault(self, error: &ErrorKind) -> bool {
        match self {
            Self::Unsuccessful => false,
            Self::Transient => error.should_retry(),
        }
    }
}

/// An extension trait to help determine if a given HTTP request
/// is retryable.
///
/// Inspired by `Retryable` from
/// [reqwest-middleware](https://github.com/TrueLayer/reqwest-middleware/blob/f854725791ccf4a02c401a26cab3d9db753f468c/reqwest-retry/src/retryable.rs)
pub(crate) trait RetryExt {
    fn should_retry(&self) -> bool;
}

impl RetryExt for StatusCode {
    fn should_retry(&self) -> bool {
        if self.is_server_error() {
            true
        } else if self.is_client_error()
            && *self != StatusCode::REQUEST_TIMEOUT
            && *self != StatusCode::TOO_MANY_REQUESTS
        {
            false
        } else if self.is_success() {
            false
        } else {
            *self == StatusCode::REQUEST_TIMEOUT || *self == StatusCode::TOO_MANY_REQUESTS
        }
    }
}

impl RetryExt for reqwest::Error {
    fn should_retry(&self) -> bool {
        if self.is_timeout() || self.is_connect() {
            true
        } else if self.is_body() || self.is_decode() || self.is_builder() || self.is_redirect() {
            false
        } else if self.is_request() {
            // It seems that hyper::Error(IncompleteMessage) is not correctly handled by reqwest.
            // Here we check if the Reqwest error was originated by hyper and map it consistently.
            if let Some(hyper_error) = get_source_error_type::<hyper::Error>(&self) {
                // IncompleteMessage: the server started sending a response but the
                // connection was cut halfway through. Canceled: the connection was
                // closed on the server side. Both are safe to retry.
                if hyper_error.is_incomplete_message() || hyper_error.is_canceled() {
                    true
                } else if let Some(io_error) = get_source_error_type::<io::Error>(hyper_error) {
                    classify_io_error(io_error)
                } else {
                    false
                }
            } else {
                false
            }
        } else {
            false
        }
    }
}

impl RetryExt for ErrorKind {
    fn should_retry(&self) -> bool {
        match self {
            Self::NetworkRequest(e) => e.should_retry(),
            _ => false,
        }
    }
}

/// Classifies an `io::Error` into retryable or not.
fn classify_io_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// Downcasts the given err source into T.
fn get_source_error_type<T: std::error::Error + 'static>(
    err: &dyn std::error::Error,
) -> Option<&T> {
    let mut source = err.source();

    while let Some(err) = source {
        if let Some(typed) = err.downcast_ref::<T>() {
            return Some(typed);
        }

        source = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case(StatusCode::OK, false, false)]
    #[case(StatusCode::NO_CONTENT, false, false)]
    #[case(StatusCode::MOVED_PERMANENTLY, true, false)]
    #[case(StatusCode::FORBIDDEN, true, false)]
    #[case(StatusCode::NOT_FOUND, true, false)]
    #[case(StatusCode::REQUEST_TIMEOUT, true, true)]
    #[case(StatusCode::TOO_MANY_REQUESTS, true, true)]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, true, true)]
    #[case(StatusCode::BAD_GATEWAY, true, true)]
    fn test_retries_response(
        #[case] status: StatusCode,
        #[case] unsuccessful: bool,
        #[case] transient: bool,
    ) {
        assert_eq!(
            RetryPolicy::Unsuccessful.retries_response(status),
            unsuccessful
        );
        assert_eq!(RetryPolicy::Transient.retries_response(status), transient);
    }

    #[test]
    fn test_custom_transport_faults_are_not_retried() {
        let fault = ErrorKind::Transport("connection refused".into());
        assert!(!RetryPolicy::Unsuccessful.retries_fault(&fault));
        assert!(!RetryPolicy::Transient.retries_fault(&fault));
    }

    #[test]
    fn test_io_error_classification() {
        assert!(classify_io_error(&io::Error::from(
            io::ErrorKind::ConnectionReset
        )));
        assert!(!classify_io_error(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            RetryPolicy::from_str("transient").unwrap(),
            RetryPolicy::Transient
        );
        assert_eq!(RetryPolicy::default().to_string(), "unsuccessful");
        assert_eq!(RetryPolicy::VARIANTS, &["unsuccessful", "transient"]);
    }
}
