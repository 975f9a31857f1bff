use serde::{Serialize, Serializer};
use std::hash::Hash;
use thiserror::Error;

use crate::ratelimit::Scope;

/// Possible Errors when interacting with `polite_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A rate was configured which is not a finite, positive number
    #[error("Invalid {scope} rate `{rate}`: rate must be a finite number greater than zero")]
    InvalidRate {
        /// The scope the rate was configured for
        scope: Scope,
        /// The rejected rate in requests per second
        rate: f64,
    },

    /// A concurrency limit below one was configured
    #[error("Invalid {scope} concurrency `{concurrency}`: at least one concurrent request is required")]
    InvalidConcurrency {
        /// The scope the concurrency was configured for
        scope: Scope,
        /// The rejected concurrency limit
        concurrency: usize,
    },

    /// Network error while sending a request through reqwest
    #[error("Network error while sending request: {0}")]
    NetworkRequest(#[source] reqwest::Error),

    /// A custom [`Transport`](crate::Transport) failed to deliver a request
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Error while reading the body of a response
    #[error("Error reading response body: {0}")]
    ReadResponseBody(#[source] reqwest::Error),

    /// The underlying reqwest client could not be created
    #[error("Error creating request client: {0}")]
    BuildRequestClient(#[source] reqwest::Error),

    /// The given header could not be parsed.
    #[error("Header could not be parsed.")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// An URL without a host was given, so no destination can be derived
    #[error("URL is missing a host")]
    InvalidUrlHost,

    /// The client was closed and no longer admits requests
    #[error("Client was closed and does not accept new requests")]
    ClientClosed,

    /// A worker asked for a client before one was opened
    #[error("No HTTP client has been opened for this worker")]
    ClientNotStarted,
}

impl ErrorKind {
    /// Returns `true` if the error was caused by invalid rate limit settings.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRate { .. } | Self::InvalidConcurrency { .. }
        )
    }

    /// Returns `true` if the error was raised by the transport while sending
    /// a request (connection errors, timeouts, ...).
    #[must_use]
    pub const fn is_transport_fault(&self) -> bool {
        matches!(self, Self::NetworkRequest(_) | Self::Transport(_))
    }

    /// Returns `true` if the request timed out
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::NetworkRequest(e) if e.is_timeout())
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::InvalidRate { scope: s1, rate: r1 },
                Self::InvalidRate { scope: s2, rate: r2 },
            ) => s1 == s2 && r1.to_bits() == r2.to_bits(),
            (
                Self::InvalidConcurrency {
                    scope: s1,
                    concurrency: c1,
                },
                Self::InvalidConcurrency {
                    scope: s2,
                    concurrency: c2,
                },
            ) => s1 == s2 && c1 == c2,
            (Self::NetworkRequest(e1), Self::NetworkRequest(e2))
            | (Self::ReadResponseBody(e1), Self::ReadResponseBody(e2))
            | (Self::BuildRequestClient(e1), Self::BuildRequestClient(e2)) => {
                e1.to_string() == e2.to_string()
            }
            (Self::Transport(m1), Self::Transport(m2)) => m1 == m2,
            (Self::InvalidHeader(_), Self::InvalidHeader(_))
            | (Self::InvalidUrlHost, Self::InvalidUrlHost)
            | (Self::ClientClosed, Self::ClientClosed)
            | (Self::ClientNotStarted, Self::ClientNotStarted) => true,
            _ => false,
        }
    }
}

impl Eq for ErrorKind {}

impl Hash for ErrorKind {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        match self {
            Self::InvalidRate { scope, rate } => (scope, rate.to_bits()).hash(state),
            Self::InvalidConcurrency { scope, concurrency } => (scope, concurrency).hash(state),
            Self::NetworkRequest(e) | Self::ReadResponseBody(e) | Self::BuildRequestClient(e) => {
                e.to_string().hash(state);
            }
            Self::Transport(message) => message.hash(state),
            Self::InvalidHeader(e) => e.to_string().hash(state),
            Self::InvalidUrlHost | Self::ClientClosed | Self::ClientNotStarted => {
                std::mem::discriminant(self).hash(state);
            }
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
