//! Global and per-domain admission control.
//!
//! Every request has to acquire a permit of its destination and a global
//! permit before it is sent. After the response arrives, each permit is held
//! back until the interval of its scope has passed, minus the time the request
//! already took. This caps both the number of simultaneous requests and the
//! average request rate of each scope.
//!
//! # Architecture
//!
//! - [`RateSettings`]: Validated rates and concurrency limits with their derived intervals
//! - [`RateLimitConfig`]: The raw, serializable form of [`RateSettings`]
//! - [`DomainKey`]: The destination a request is limited under
//! - [`DomainResolver`]: Maps request URLs to destinations
//! - [`ScopePool`]: The global semaphore and the per-destination semaphores
//! - [`release_delay`]: The latency-compensated hold time of a permit

mod config;
mod domain;
mod pool;
mod release;
mod settings;

pub use config::RateLimitConfig;
pub use domain::{DomainKey, DomainResolver, HostName, RegistrableDomain};
pub use pool::ScopePool;
pub(crate) use release::ReleaseScheduler;
pub use release::release_delay;
pub use settings::RateSettings;

use strum::Display;

/// An admission domain: either all requests or the requests to one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Scope {
    /// Applies to every request
    Global,
    /// Applies to the requests of a single destination
    Domain,
}
