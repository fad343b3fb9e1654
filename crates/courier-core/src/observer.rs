//! The connection observer.
//!
//! Owns the persistent transport connection on a dedicated thread. The
//! loop alternates between `WaitingForNecessity` and `Connected` forever,
//! recomputing necessity from registration, app visibility, network
//! reachability, censorship state, and outstanding keep-alives. While
//! connected it reads envelopes with a bounded per-read timeout and feeds
//! each through decrypt-and-process under its own lock acquisition.
//!
//! The first empty read since data last flowed flips the drained latch
//! and fires its one-shot listeners; a network-loss broadcast resets the
//! latch and tears down the transport regardless of loop state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use courier_storage_traits::CourierStorageProvider;

use crate::transport::{Transport, TransportError};
use crate::util::now_ms;
use crate::Courier;

/// Where the observer loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverPhase {
    /// Waiting for a connection to become necessary
    WaitingForNecessity,
    /// Connected and reading envelopes
    Connected,
}

/// Process-wide connection inputs, mutated under a single monitor.
#[derive(Debug, Clone)]
struct ConnectionState {
    registered: bool,
    websocket_registered: bool,
    app_visible: bool,
    push_disabled: bool,
    network_available: bool,
    censored: bool,
    keep_alive_count: usize,
    phase: ObserverPhase,
}

impl ConnectionState {
    fn connection_necessary(&self) -> bool {
        self.registered
            && self.websocket_registered
            && (self.app_visible || self.push_disabled || self.keep_alive_count > 0)
            && self.network_available
            && !self.censored
    }
}

/// One-shot drained notification.
///
/// Listeners fire at most once per drain; a listener registered after the
/// latch already fired is invoked immediately and synchronously.
struct DrainedLatch {
    inner: Mutex<DrainedInner>,
    cond: Condvar,
}

struct DrainedInner {
    fired: bool,
    listeners: Vec<Box<dyn FnOnce() + Send>>,
}

impl DrainedLatch {
    fn new() -> Self {
        Self {
            inner: Mutex::new(DrainedInner {
                fired: false,
                listeners: Vec::new(),
            }),
            cond: Condvar::new(),
        }
    }

    fn fire(&self) {
        let listeners = {
            let mut inner = self.inner.lock();
            if inner.fired {
                return;
            }
            inner.fired = true;
            std::mem::take(&mut inner.listeners)
        };
        self.cond.notify_all();
        // Run outside the lock so a listener may re-register
        for listener in listeners {
            listener();
        }
    }

    fn reset(&self) {
        self.inner.lock().fired = false;
    }

    fn has_fired(&self) -> bool {
        self.inner.lock().fired
    }

    fn add_listener(&self, listener: Box<dyn FnOnce() + Send>) {
        let fire_now = {
            let mut inner = self.inner.lock();
            if inner.fired {
                true
            } else {
                inner.listeners.push(listener);
                return;
            }
        };
        if fire_now {
            listener();
        }
    }

    fn wait(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        if inner.fired {
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        while !inner.fired {
            if self.cond.wait_until(&mut inner, deadline).timed_out() {
                return inner.fired;
            }
        }
        true
    }
}

/// Supervises the persistent connection and its read loop.
pub struct ConnectionObserver<Storage>
where
    Storage: CourierStorageProvider + Send + Sync + 'static,
{
    courier: Arc<Courier<Storage>>,
    transport: Arc<dyn Transport>,
    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    drained: DrainedLatch,
    touched_queues: Mutex<BTreeSet<&'static str>>,
    running: AtomicBool,
}

impl<Storage> ConnectionObserver<Storage>
where
    Storage: CourierStorageProvider + Send + Sync + 'static,
{
    /// Create an observer. The loop does not run until [`Self::start`].
    pub fn new(courier: Arc<Courier<Storage>>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            courier,
            transport,
            state: Mutex::new(ConnectionState {
                registered: false,
                websocket_registered: false,
                app_visible: false,
                push_disabled: false,
                network_available: true,
                censored: false,
                keep_alive_count: 0,
                phase: ObserverPhase::WaitingForNecessity,
            }),
            state_changed: Condvar::new(),
            drained: DrainedLatch::new(),
            touched_queues: Mutex::new(BTreeSet::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Spawn the observer thread. The loop restarts after any failure and
    /// only exits on [`Self::stop`].
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let observer = Arc::clone(self);
        std::thread::Builder::new()
            .name("message-retrieval".to_string())
            .spawn(move || observer.observer_loop())
            .expect("failed to spawn observer thread")
    }

    /// Stop the loop and tear down the connection. Used on shutdown.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.state_changed.notify_all();
        self.transport.disconnect();
    }

    fn observer_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            self.wait_for_necessity();
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if let Err(e) = self.transport.connect() {
                tracing::warn!(
                    target: "courier_core::observer",
                    "Failed to open transport: {}. Will retry.",
                    e
                );
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }

            self.set_phase(ObserverPhase::Connected);
            tracing::info!(target: "courier_core::observer", "Connected. Reading envelopes.");

            self.read_loop();

            tracing::info!(target: "courier_core::observer", "Disconnecting.");
            self.transport.disconnect();
            self.set_phase(ObserverPhase::WaitingForNecessity);
        }
    }

    fn read_loop(&self) {
        while self.connection_necessary() && self.running.load(Ordering::SeqCst) {
            let read = self
                .transport
                .read_or_empty(self.courier.config.read_timeout, &mut |_| {});

            match read {
                Ok(Some(envelope)) => {
                    // Each result is processed under its own lock
                    // acquisition; the next read starts only after this
                    // one reached storage
                    match self.courier.process_envelope(&envelope, now_ms()) {
                        Ok(queues) => {
                            self.touched_queues.lock().extend(queues);
                        }
                        Err(e) => {
                            tracing::warn!(
                                target: "courier_core::observer",
                                "{} Failed to process envelope: {}",
                                envelope.log_prefix(),
                                e
                            );
                        }
                    }
                }
                Ok(None) => {
                    if !self.drained.has_fired() {
                        tracing::info!(
                            target: "courier_core::observer",
                            "Nothing left on the wire. Connection drained."
                        );
                        self.drained.fire();
                    }
                }
                Err(TransportError::Timeout) => {
                    // Bounded read elapsed with the connection healthy
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        target: "courier_core::observer",
                        "Terminal read failure: {}",
                        e
                    );
                    break;
                }
            }
        }
    }

    fn wait_for_necessity(&self) {
        let mut state = self.state.lock();
        while !state.connection_necessary() && self.running.load(Ordering::SeqCst) {
            self.state_changed.wait(&mut state);
        }
    }

    fn connection_necessary(&self) -> bool {
        self.state.lock().connection_necessary()
    }

    fn set_phase(&self, phase: ObserverPhase) {
        self.state.lock().phase = phase;
    }

    /// The loop's current phase
    pub fn phase(&self) -> ObserverPhase {
        self.state.lock().phase
    }

    // A necessity change is noticed by the read loop on its next bounded
    // read; nothing to interrupt here.
    fn update_state(&self, f: impl FnOnce(&mut ConnectionState)) {
        let mut state = self.state.lock();
        f(&mut state);
        drop(state);
        self.state_changed.notify_all();
    }

    /// Update the push-registration flag
    pub fn set_registered(&self, registered: bool) {
        self.update_state(|s| s.registered = registered);
    }

    /// Update the websocket-registration flag
    pub fn set_websocket_registered(&self, registered: bool) {
        self.update_state(|s| s.websocket_registered = registered);
    }

    /// Update app visibility
    pub fn set_app_visible(&self, visible: bool) {
        self.update_state(|s| s.app_visible = visible);
    }

    /// Update whether push delivery is disabled (which makes the
    /// connection necessary even in the background)
    pub fn set_push_disabled(&self, disabled: bool) {
        self.update_state(|s| s.push_disabled = disabled);
    }

    /// Update censorship-circumvention state
    pub fn set_censored(&self, censored: bool) {
        self.update_state(|s| s.censored = censored);
    }

    /// Broadcast a network availability change. Loss of network resets
    /// the drained latch and tears down the transport regardless of loop
    /// state.
    pub fn set_network_available(&self, available: bool) {
        self.update_state(|s| s.network_available = available);
        if !available {
            tracing::info!(
                target: "courier_core::observer",
                "Network lost. Resetting drained state and tearing down the transport."
            );
            self.drained.reset();
            self.transport.disconnect();
        }
    }

    /// Register a keep-alive, making the connection necessary until the
    /// guard drops
    pub fn keep_alive(self: &Arc<Self>) -> KeepAliveGuard<Storage> {
        self.update_state(|s| s.keep_alive_count += 1);
        KeepAliveGuard {
            observer: Arc::clone(self),
        }
    }

    /// Block until the connection reports drained, bounded by `timeout`.
    /// Returns whether drained was observed.
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        self.drained.wait(timeout)
    }

    /// Register a one-shot listener fired when the connection drains.
    /// Fires immediately (synchronously) when already drained.
    pub fn add_drained_listener(&self, listener: impl FnOnce() + Send + 'static) {
        self.drained.add_listener(Box::new(listener));
    }

    /// Take the set of job queues touched since the last call
    pub fn take_touched_queues(&self) -> Vec<&'static str> {
        let mut touched = self.touched_queues.lock();
        let queues: Vec<&'static str> = touched.iter().copied().collect();
        touched.clear();
        queues
    }
}


/// Holds a keep-alive reference on the observer; released on drop.
pub struct KeepAliveGuard<Storage>
where
    Storage: CourierStorageProvider + Send + Sync + 'static,
{
    observer: Arc<ConnectionObserver<Storage>>,
}

impl<Storage> Drop for KeepAliveGuard<Storage>
where
    Storage: CourierStorageProvider + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.observer.update_state(|s| {
            s.keep_alive_count = s.keep_alive_count.saturating_sub(1);
        });
    }
}
