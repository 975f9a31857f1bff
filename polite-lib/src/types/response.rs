use std::time::Duration;

use http::{HeaderMap, StatusCode};
use url::Url;

use crate::{ErrorKind, Result};

/// A response received through a [`Transport`](crate::Transport),
/// together with the time it took to receive it.
///
/// The elapsed time is what the admission control subtracts from a scope's
/// interval before releasing its permit.
#[derive(Debug)]
pub struct Response {
    inner: reqwest::Response,
    elapsed: Duration,
}

impl Response {
    /// Wrap a `reqwest` response which took `elapsed` to arrive
    #[must_use]
    pub const fn new(inner: reqwest::Response, elapsed: Duration) -> Self {
        Self { inner, elapsed }
    }

    /// The HTTP status code of the response
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Returns `true` for `2xx` responses
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }

    /// Time spent between sending the request and receiving the response.
    ///
    /// For responses returned by [`PoliteClient`](crate::PoliteClient) this
    /// covers every attempt, including retries and the waits between them.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub(crate) fn with_elapsed(self, elapsed: Duration) -> Self {
        Self { elapsed, ..self }
    }

    /// The response headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// The final URL of the response (after redirects)
    #[must_use]
    pub fn url(&self) -> &Url {
        self.inner.url()
    }

    /// Read the full response body as text
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be read or decoded.
    pub async fn text(self) -> Result<String> {
        self.inner.text().await.map_err(ErrorKind::ReadResponseBody)
    }

    /// Consume the wrapper and return the underlying `reqwest` response
    #[must_use]
    pub fn into_inner(self) -> reqwest::Response {
        self.inner
    }
}

impl From<http::Response<String>> for Response {
    /// Build a response which arrived instantly.
    /// Mostly useful for custom transports and tests.
    fn from(response: http::Response<String>) -> Self {
        Self::new(reqwest::Response::from(response), Duration::ZERO)
    }
}
