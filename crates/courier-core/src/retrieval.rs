//! Retrieval strategies.
//!
//! Two interchangeable ways to pull envelopes from the server and push
//! them through decrypt-and-process: riding the persistent connection
//! until it drains, or opening a bounded polling request. Both report
//! plain success/failure so the caller owns reschedule/backoff policy,
//! and both honor cooperative cancellation at envelope boundaries.
//!
//! At most two retrieval attempts run at once process-wide; a third
//! caller backs off immediately instead of blocking.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use courier_storage_traits::CourierStorageProvider;

use crate::constant::RETRIEVAL_CONCURRENCY_CAP;
use crate::observer::ConnectionObserver;
use crate::transport::{Transport, TransportError};
use crate::util::{now_ms, CancellationFlag};
use crate::Courier;

/// A retrieval algorithm.
///
/// Returns `true` when retrieval drained (or was canceled mid-drain), and
/// `false` on a hard failure that the caller should back off and retry.
pub trait RetrievalStrategy {
    /// Run one retrieval attempt within the given time budget
    fn execute(&self, timeout: Duration) -> bool;
}

/// Bounds simultaneous retrieval attempts.
///
/// Both a background scheduler and the connection loop can fire
/// near-simultaneously; the cap bounds the duplicate work.
#[derive(Debug)]
pub struct RetrievalPermits {
    active: AtomicUsize,
}

impl RetrievalPermits {
    /// Create a permit pool with the standard cap
    pub fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
        }
    }

    /// Try to take a permit; `None` means the cap is reached and the
    /// caller must back off immediately
    pub fn try_acquire(&self) -> Option<RetrievalPermit<'_>> {
        let mut current = self.active.load(Ordering::SeqCst);
        loop {
            if current >= RETRIEVAL_CONCURRENCY_CAP {
                return None;
            }
            match self.active.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(RetrievalPermit { pool: self }),
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for RetrievalPermits {
    fn default() -> Self {
        Self::new()
    }
}

/// A held retrieval permit; released on drop.
#[derive(Debug)]
pub struct RetrievalPermit<'a> {
    pool: &'a RetrievalPermits,
}

impl Drop for RetrievalPermit<'_> {
    fn drop(&mut self) {
        self.pool.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connection-based retrieval: pin the persistent connection open with a
/// keep-alive, wait for it to report drained, then wait for the job
/// queues the drain touched to empty.
pub struct ConnectionRetriever<Storage>
where
    Storage: CourierStorageProvider + Send + Sync + 'static,
{
    courier: Arc<Courier<Storage>>,
    observer: Arc<ConnectionObserver<Storage>>,
    permits: Arc<RetrievalPermits>,
}

impl<Storage> ConnectionRetriever<Storage>
where
    Storage: CourierStorageProvider + Send + Sync + 'static,
{
    /// Create a connection-based retriever
    pub fn new(
        courier: Arc<Courier<Storage>>,
        observer: Arc<ConnectionObserver<Storage>>,
        permits: Arc<RetrievalPermits>,
    ) -> Self {
        Self {
            courier,
            observer,
            permits,
        }
    }
}

impl<Storage> RetrievalStrategy for ConnectionRetriever<Storage>
where
    Storage: CourierStorageProvider + Send + Sync + 'static,
{
    fn execute(&self, timeout: Duration) -> bool {
        let Some(_permit) = self.permits.try_acquire() else {
            tracing::warn!(
                target: "courier_core::retrieval",
                "Too many simultaneous retrieval attempts. Backing off."
            );
            return false;
        };

        // Keep-alive released on every exit path via the guard
        let _keep_alive = self.observer.keep_alive();

        if !self.observer.wait_until_drained(timeout) {
            tracing::warn!(
                target: "courier_core::retrieval",
                "Timed out waiting for the connection to drain."
            );
            return false;
        }

        for queue in self.observer.take_touched_queues() {
            if !self
                .courier
                .jobs()
                .drain_queue(queue, self.courier.config.queue_drain_timeout)
            {
                // Do not block forever on a stuck queue
                tracing::warn!(
                    target: "courier_core::retrieval",
                    "Timed out waiting for queue '{}' to drain. Proceeding.",
                    queue
                );
            }
        }

        true
    }
}

/// Polling-based retrieval: open a bounded request, stream envelopes
/// synchronously through decrypt-and-process, then wait for the job
/// queues touched, decrementing a shared time budget per queue.
pub struct PollingRetriever<Storage>
where
    Storage: CourierStorageProvider + Send + Sync + 'static,
{
    courier: Arc<Courier<Storage>>,
    transport: Arc<dyn Transport>,
    permits: Arc<RetrievalPermits>,
    include_stories: bool,
    account_registered: bool,
    cancel: CancellationFlag,
    unauthorized: AtomicBool,
}

impl<Storage> PollingRetriever<Storage>
where
    Storage: CourierStorageProvider + Send + Sync + 'static,
{
    /// Create a polling retriever
    pub fn new(
        courier: Arc<Courier<Storage>>,
        transport: Arc<dyn Transport>,
        permits: Arc<RetrievalPermits>,
        include_stories: bool,
        account_registered: bool,
    ) -> Self {
        Self {
            courier,
            transport,
            permits,
            include_stories,
            account_registered,
            cancel: CancellationFlag::new(),
            unauthorized: AtomicBool::new(false),
        }
    }

    /// The cancellation flag gating the next envelope
    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// Whether the server rejected our credentials on a registered
    /// account. The caller surfaces this to the user.
    pub fn saw_unauthorized(&self) -> bool {
        self.unauthorized.load(Ordering::SeqCst)
    }
}

impl<Storage> RetrievalStrategy for PollingRetriever<Storage>
where
    Storage: CourierStorageProvider + Send + Sync + 'static,
{
    fn execute(&self, timeout: Duration) -> bool {
        let Some(_permit) = self.permits.try_acquire() else {
            tracing::warn!(
                target: "courier_core::retrieval",
                "Too many simultaneous retrieval attempts. Backing off."
            );
            return false;
        };

        let started = Instant::now();
        let mut touched: BTreeSet<&'static str> = BTreeSet::new();

        let result = {
            let courier = &self.courier;
            let cancel = &self.cancel;
            let touched = &mut touched;
            self.transport
                .retrieve_messages(self.include_stories, &mut |envelope| {
                    // Cancellation gates the next unit, never one in flight
                    if cancel.is_canceled() {
                        return;
                    }
                    match courier.process_envelope(&envelope, now_ms()) {
                        Ok(queues) => touched.extend(queues),
                        Err(e) => {
                            tracing::warn!(
                                target: "courier_core::retrieval",
                                "{} Failed to process envelope: {}",
                                envelope.log_prefix(),
                                e
                            );
                        }
                    }
                })
        };

        if let Err(e) = result {
            if e == TransportError::Unauthorized && self.account_registered {
                tracing::warn!(
                    target: "courier_core::retrieval",
                    "Server rejected credentials on a registered account."
                );
                self.unauthorized.store(true, Ordering::SeqCst);
            } else {
                tracing::warn!(
                    target: "courier_core::retrieval",
                    "Transport failure during polling retrieval: {}. Resetting client.",
                    e
                );
            }
            self.transport.reset();
            return false;
        }

        if touched.is_empty() {
            tracing::debug!(
                target: "courier_core::retrieval",
                "No jobs were enqueued. Retrieval complete."
            );
            return true;
        }

        // A slow first queue leaves less budget for later ones
        for queue in touched {
            if self.cancel.is_canceled() {
                break;
            }

            let elapsed = started.elapsed();
            let remaining = match timeout.checked_sub(elapsed) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    tracing::warn!(
                        target: "courier_core::retrieval",
                        "Time budget exhausted before queue '{}' drained. Stopping early.",
                        queue
                    );
                    break;
                }
            };

            let per_queue = remaining.min(self.courier.config.queue_drain_timeout);
            if !self.courier.jobs().drain_queue(queue, per_queue) {
                tracing::warn!(
                    target: "courier_core::retrieval",
                    "Timed out waiting for queue '{}' to drain. Proceeding.",
                    queue
                );
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permit_cap() {
        let permits = RetrievalPermits::new();

        let first = permits.try_acquire();
        assert!(first.is_some());
        let second = permits.try_acquire();
        assert!(second.is_some());

        // The third caller must back off immediately
        assert!(permits.try_acquire().is_none());

        drop(first);
        assert!(permits.try_acquire().is_some());
    }
}
