//! Deferred, latency-compensated release of admission permits.
//!
//! A permit is not returned as soon as its response arrives, but once the
//! interval of its scope has passed since it was acquired. Time already spent
//! on the request counts towards the interval, so slow responses are not
//! throttled twice.
//!
//! # Implementation Details
//!
//! Every scheduled release is a spawned timer task that owns its permit.
//! Outstanding work is tracked with a wait group, a thin wrapper around
//! [`tokio::sync::mpsc::channel`]: the [`WaitGroup`] holds the unique
//! [`tokio::sync::mpsc::Receiver`] and each [`WaitGuard`] holds a
//! [`tokio::sync::mpsc::Sender`]. Once every guard is dropped, the receiver
//! detects the closed channel and the wait completes. Shutdown is broadcast
//! through a [`tokio::sync::watch`] channel, which cuts all timers short.

use futures::never::Never;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::sync::{OwnedSemaphorePermit, watch};

use super::Scope;
use crate::{ErrorKind, Result};

/// Delay before a permit is released, given the interval of its scope and
/// the time already spent on the request.
///
/// # Examples
///
/// ```
/// use polite_lib::ratelimit::release_delay;
/// use std::time::Duration;
///
/// let interval = Duration::from_secs(1);
/// assert_eq!(release_delay(interval, Duration::from_millis(400)), Duration::from_millis(600));
/// assert_eq!(release_delay(interval, Duration::from_secs(3)), Duration::ZERO);
/// ```
#[must_use]
pub const fn release_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Waits for a set of [`WaitGuard`]s to be dropped.
///
/// Each [`WaitGroup`] is single-use: calling [`WaitGroup::wait`] consumes it.
#[derive(Debug)]
struct WaitGroup {
    /// The [`Never`] type means no value can/will ever be received through
    /// the channel; it only reports when all senders are gone.
    recv: Receiver<Never>,
}

/// RAII guard representing outstanding work of a [`WaitGroup`].
#[derive(Clone, Debug)]
pub(crate) struct WaitGuard {
    _send: Sender<Never>,
}

impl WaitGroup {
    /// Creates a new [`WaitGroup`] and its first associated [`WaitGuard`].
    fn new() -> (Self, WaitGuard) {
        let (send, recv) = channel(1);
        (Self { recv }, WaitGuard { _send: send })
    }

    /// Waits, asynchronously, until all the associated [`WaitGuard`]s have finished.
    async fn wait(mut self) {
        let None = self.recv.recv().await;
    }
}

/// A permit waiting for its release.
/// Dropping it returns the permit and then lets go of the wait guard.
#[derive(Debug)]
struct PendingRelease {
    _permit: OwnedSemaphorePermit,
    pending: Arc<AtomicUsize>,
    _guard: WaitGuard,
}

impl PendingRelease {
    fn new(permit: OwnedSemaphorePermit, guard: WaitGuard, pending: Arc<AtomicUsize>) -> Self {
        pending.fetch_add(1, Ordering::SeqCst);
        Self {
            _permit: permit,
            pending,
            _guard: guard,
        }
    }
}

impl Drop for PendingRelease {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Schedules permit releases and owns every timer it starts.
///
/// Besides the timers, in-flight requests hold a [`WaitGuard`] obtained from
/// [`ReleaseScheduler::enter`], so [`ReleaseScheduler::shutdown`] only
/// returns once no request is running and no permit is held back anymore.
#[derive(Debug)]
pub(crate) struct ReleaseScheduler {
    shutdown: watch::Sender<bool>,
    guard: Mutex<Option<WaitGuard>>,
    group: tokio::sync::Mutex<Option<WaitGroup>>,
    pending: Arc<AtomicUsize>,
}

impl ReleaseScheduler {
    pub(crate) fn new() -> Self {
        let (group, guard) = WaitGroup::new();
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            guard: Mutex::new(Some(guard)),
            group: tokio::sync::Mutex::new(Some(group)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A receiver which turns `true` once shutdown has started
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Register an in-flight request. Shutdown waits until the returned
    /// guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ClientClosed`] once shutdown has started.
    pub(crate) fn enter(&self) -> Result<WaitGuard> {
        if self.is_closed() {
            return Err(ErrorKind::ClientClosed);
        }
        lock(&self.guard).clone().ok_or(ErrorKind::ClientClosed)
    }

    /// Number of permits currently held back by a timer
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Release `permit` once `interval` has passed since it was acquired,
    /// `elapsed` of which was already spent on the request.
    ///
    /// Without an interval, when the request already took longer than the
    /// interval, or after shutdown, the permit is released right away.
    pub(crate) fn schedule(
        &self,
        permit: OwnedSemaphorePermit,
        scope: Scope,
        interval: Option<Duration>,
        elapsed: Duration,
    ) {
        let Some(interval) = interval else {
            return;
        };
        let delay = release_delay(interval, elapsed);
        if delay.is_zero() {
            log::debug!("Releasing {scope} permit immediately (took {elapsed:?} of {interval:?})");
            return;
        }
        let Some(guard) = lock(&self.guard).clone() else {
            return;
        };

        log::debug!("Releasing {scope} permit in {delay:?}");
        let pending = PendingRelease::new(permit, guard, self.pending.clone());
        let mut shutdown = self.shutdown_signal();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = closed(&mut shutdown) => {
                    log::debug!("Shutdown: releasing {scope} permit early");
                }
            }
            drop(pending);
        });
    }

    /// Cut all pending timers short and wait until every scheduled release
    /// and every in-flight request is done.
    ///
    /// Concurrent callers all return once shutdown has completed.
    pub(crate) async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        drop(lock(&self.guard).take());

        let mut group = self.group.lock().await;
        if let Some(group) = group.take() {
            group.wait().await;
        }
    }
}

/// Resolves once shutdown has started
pub(crate) async fn closed(signal: &mut watch::Receiver<bool>) {
    // A dropped sender means the scheduler is gone, which counts as closed
    let _ = signal.wait_for(|closed| *closed).await;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
