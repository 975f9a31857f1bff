//! `polite` is a library for sending HTTP requests without overwhelming
//! the servers they go to.
//!
//! Every request is admitted by two scopes: its destination (the registrable
//! domain of its URL) and the client as a whole. Each scope has a rate and a
//! concurrency limit. A request holds one permit of each scope while it runs,
//! including any retries, and the permits are handed back once the interval
//! of their scope has passed. Time spent on the request counts towards that
//! interval, so slow servers are not throttled twice.
//!
//! ```no_run
//! use polite_lib::{ClientBuilder, Result, ratelimit::RateSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   // At most 100 requests per second overall, 10 per second per domain
//!   let settings = RateSettings::new(Some(100.0), Some(10.0))?
//!     .with_global_concurrency(10)?
//!     .with_domain_concurrency(5)?
//!     .with_max_retries(1);
//!
//!   let client = ClientBuilder::builder().settings(settings).build().client()?;
//!   let url = "https://github.com/lycheeverse/lychee".parse().unwrap();
//!   let response = client.get(url).await?;
//!   println!("{} after {:?}", response.status(), response.elapsed());
//!
//!   client.close().await;
//!   Ok(())
//! }
//! ```
//!
//! Requests are sent through a [`Transport`], which is `reqwest` by default
//! and can be swapped with [`ClientBuilder::client_with_transport`].
#![warn(missing_docs)]

mod client;
mod executor;
mod retry;
mod transport;
mod types;

pub mod ratelimit;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod worker;

pub use client::{ClientBuilder, DEFAULT_MAX_REDIRECTS, DEFAULT_USER_AGENT, PoliteClient};
pub use retry::RetryPolicy;
pub use transport::{ReqwestTransport, Transport};
pub use types::*;
pub use worker::{WorkerState, get_client};
