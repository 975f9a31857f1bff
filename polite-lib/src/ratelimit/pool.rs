use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};

use super::release::closed;
use crate::ratelimit::{DomainKey, RateSettings};
use crate::{ErrorKind, Result};

/// Admission gates of a client: one semaphore for the global scope and one
/// per destination.
///
/// # Architecture
///
/// - The global semaphore exists only if a global rate is configured
/// - Domain semaphores are used only if a domain rate is configured
/// - Domain semaphores are created lazily, exactly once per destination
/// - Thread-safe using `DashMap` for concurrent access to the domain table
///
/// Permits are granted in FIFO order within each scope, because tokio's
/// [`Semaphore`] is fair.
#[derive(Debug)]
pub struct ScopePool {
    /// Global semaphore, `None` if the global scope is unlimited
    global: Option<Arc<Semaphore>>,

    /// Capacity of the global semaphore
    global_concurrency: usize,

    /// Map of destination to its semaphore, created on-demand
    domains: DashMap<DomainKey, Arc<Semaphore>>,

    /// Whether requests acquire a domain permit at all
    domain_limited: bool,

    /// Capacity of each domain semaphore
    domain_concurrency: usize,

    /// Upper bound on tracked destinations, unbounded if `None`
    max_domains: Option<usize>,
}

impl ScopePool {
    /// Create the gates for the given settings
    #[must_use]
    pub fn new(settings: &RateSettings) -> Self {
        Self {
            global: settings
                .global_interval()
                .map(|_| Arc::new(Semaphore::new(settings.global_concurrency()))),
            global_concurrency: settings.global_concurrency(),
            domains: DashMap::new(),
            domain_limited: settings.domain_interval().is_some(),
            domain_concurrency: settings.domain_concurrency(),
            max_domains: settings.max_domains(),
        }
    }

    /// Acquire a permit of the given domain, waiting in line if the domain is
    /// at capacity. Returns `None` right away if domains are unlimited.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ClientClosed`] if `shutdown` fires while waiting.
    pub(crate) async fn acquire_domain(
        &self,
        key: &DomainKey,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<OwnedSemaphorePermit>> {
        if !self.domain_limited {
            return Ok(None);
        }
        let semaphore = self.domain_lock(key);
        acquire(semaphore, shutdown).await.map(Some)
    }

    /// Acquire a global permit, waiting in line if the client is at capacity.
    /// Returns `None` right away if the global scope is unlimited.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ClientClosed`] if `shutdown` fires while waiting.
    pub(crate) async fn acquire_global(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<OwnedSemaphorePermit>> {
        match &self.global {
            Some(semaphore) => acquire(semaphore.clone(), shutdown).await.map(Some),
            None => Ok(None),
        }
    }

    /// Get the semaphore of a destination, creating it on first use
    pub(crate) fn domain_lock(&self, key: &DomainKey) -> Arc<Semaphore> {
        if let Some(semaphore) = self.domains.get(key) {
            return semaphore.clone();
        }

        if let Some(max_domains) = self.max_domains
            && self.domains.len() >= max_domains
        {
            self.evict_idle();
        }

        // Two requests may race to create the same destination;
        // whoever gets to the entry first installs the semaphore for both.
        match self.domains.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                log::debug!("Tracking new destination {key}");
                entry
                    .insert(Arc::new(Semaphore::new(self.domain_concurrency)))
                    .clone()
            }
        }
    }

    /// Remove all destinations which nobody holds, waits for,
    /// or has scheduled a release for.
    ///
    /// Every permit, waiter and pending release keeps a reference to its
    /// semaphore, so an entry only referenced by the table is idle and has
    /// all its permits available.
    fn evict_idle(&self) {
        let before = self.domains.len();
        self.domains
            .retain(|_, semaphore| Arc::strong_count(semaphore) > 1);
        log::debug!(
            "Evicted {} idle destinations",
            before.saturating_sub(self.domains.len())
        );
    }

    /// Number of destinations currently tracked
    #[must_use]
    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    /// Number of global permits available right now,
    /// `None` if the global scope is unlimited
    #[must_use]
    pub fn available_global_permits(&self) -> Option<usize> {
        self.global.as_ref().map(|s| s.available_permits())
    }

    /// Number of permits of a destination available right now,
    /// `None` if the destination is not tracked
    #[must_use]
    pub fn available_domain_permits(&self, key: &DomainKey) -> Option<usize> {
        self.domains.get(key).map(|s| s.available_permits())
    }

    /// Returns `true` if no permit of any scope is currently taken
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let global_idle = self
            .global
            .as_ref()
            .is_none_or(|s| s.available_permits() == self.global_concurrency);
        global_idle
            && self
                .domains
                .iter()
                .all(|entry| entry.value().available_permits() == self.domain_concurrency)
    }
}

/// Wait for a permit unless the client shuts down first
async fn acquire(
    semaphore: Arc<Semaphore>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<OwnedSemaphorePermit> {
    // Shutdown releases pending permits, which must not admit anyone
    tokio::select! {
        biased;
        () = closed(shutdown) => Err(ErrorKind::ClientClosed),
        permit = semaphore.acquire_owned() => permit.map_err(|_| ErrorKind::ClientClosed),
    }
}
