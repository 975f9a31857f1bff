//! The seam between admission control and the wire.
//!
//! [`PoliteClient`](crate::PoliteClient) never talks to the network itself;
//! it hands admitted requests to a [`Transport`]. The default is
//! [`ReqwestTransport`], but any type implementing the trait can be injected
//! through [`ClientBuilder::client_with_transport`](crate::ClientBuilder::client_with_transport).

use async_trait::async_trait;
use reqwest::Request;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::time::Instant;

use crate::{ErrorKind, Response, Result};

/// Sends a single request and reports how long it took.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Send `request` once, without retrying.
    ///
    /// The returned [`Response`] must carry the time spent waiting for it.
    ///
    /// # Errors
    ///
    /// Returns an error if no response was received at all (connection
    /// failure, timeout, ...). Unsuccessful status codes are not errors.
    async fn execute(&self, request: Request) -> Result<Response>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, request: Request) -> Result<Response> {
        (**self).execute(request).await
    }
}

/// [`Transport`] backed by a [`reqwest::Client`], which also takes care of
/// connection pooling, TLS and redirects.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Send requests through the given client
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The underlying `reqwest` client
    #[must_use]
    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: Request) -> Result<Response> {
        let start = Instant::now();
        let response = self
            .client
            .execute(request)
            .await
            .map_err(ErrorKind::NetworkRequest)?;
        Ok(Response::new(response, start.elapsed()))
    }
}

impl From<reqwest::Client> for ReqwestTransport {
    fn from(client: reqwest::Client) -> Self {
        Self::new(client)
    }
}
