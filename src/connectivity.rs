//! Home server reachability gate.
//!
//! Tracks whether the home server is reachable, binding an active probe
//! only while someone is listening and the host process is foregrounded.
//! Low-latency callers read the cached atomic flag; correctness-sensitive
//! callers pay for a fresh probe.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::ops::Cancelable;
use crate::registry::ListenerRegistry;

/// Observer of reachability changes.
pub trait ConnectivityListener: Send + Sync {
    fn on_connectivity_changed(&self, has_internet: bool);
}

/// Asynchronous reachability check against the home server.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Whether the server answered. Failures are `false`, never errors.
    async fn ping(&self) -> bool;
}

/// Probe that issues a GET against a fixed URL on the home server.
pub struct HttpReachabilityProbe {
    http: Arc<dyn crate::traits::http::HttpClient>,
    url: String,
}

impl HttpReachabilityProbe {
    pub fn new(http: Arc<dyn crate::traits::http::HttpClient>, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProbe {
    async fn ping(&self) -> bool {
        match self
            .http
            .get(&self.url, &crate::traits::http::Headers::new())
            .await
        {
            Ok(response) => response.is_success(),
            Err(e) => {
                debug!("reachability probe failed: {}", e);
                false
            }
        }
    }
}

/// Gate binding state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No probe registered; the cached flag goes stale.
    Unbound,
    /// A probe has been issued and the flag is being kept fresh.
    Bound,
}

/// Reachability gate for one session.
///
/// `Unbound -> Bound` is driven by two inputs: the host process's
/// foreground/background transitions and the listener set becoming
/// non-empty/empty. The gate binds only when both hold: at least one
/// listener, and foregrounded.
pub struct ConnectivityGate {
    probe: Arc<dyn ReachabilityProbe>,
    listeners: Arc<ListenerRegistry<dyn ConnectivityListener>>,
    has_internet: Arc<AtomicBool>,
    foregrounded: AtomicBool,
    state: Mutex<GateState>,
    probe_task: Mutex<Option<Cancelable<()>>>,
}

impl ConnectivityGate {
    /// Create an unbound gate. The host starts foregrounded.
    pub fn new(probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self {
            probe,
            listeners: Arc::new(ListenerRegistry::new()),
            has_internet: Arc::new(AtomicBool::new(false)),
            foregrounded: AtomicBool::new(true),
            state: Mutex::new(GateState::Unbound),
            probe_task: Mutex::new(None),
        }
    }

    /// Current binding state.
    pub fn state(&self) -> GateState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener. The first registration binds the gate if the
    /// process is foregrounded.
    pub fn register(&self, listener: Arc<dyn ConnectivityListener>) {
        if self.listeners.add(listener) && self.foregrounded.load(Ordering::SeqCst) {
            self.bind();
        }
    }

    /// Unregister a listener. Removing the last one unbinds the gate.
    pub fn unregister(&self, listener: &Arc<dyn ConnectivityListener>) {
        if self.listeners.remove(listener) && self.listeners.is_empty() {
            self.unbind();
        }
    }

    /// The host process came to the foreground.
    pub fn on_foreground(&self) {
        self.foregrounded.store(true, Ordering::SeqCst);
        if !self.listeners.is_empty() {
            self.bind();
        }
    }

    /// The host process went to the background.
    pub fn on_background(&self) {
        self.foregrounded.store(false, Ordering::SeqCst);
        self.unbind();
    }

    /// Reachability of the home server.
    ///
    /// With `force_ping` a fresh probe is awaited and its result both
    /// cached and returned; otherwise the last cached flag is returned
    /// without any I/O.
    pub async fn has_internet_access(&self, force_ping: bool) -> bool {
        if !force_ping {
            return self.has_internet.load(Ordering::Relaxed);
        }
        let fresh = self.probe.ping().await;
        self.has_internet.store(fresh, Ordering::SeqCst);
        fresh
    }

    fn bind(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == GateState::Bound {
                return;
            }
            *state = GateState::Bound;
        }
        info!("connectivity gate bound, issuing reachability probe");

        let probe = Arc::clone(&self.probe);
        let flag = Arc::clone(&self.has_internet);
        let listeners = Arc::clone(&self.listeners);
        let task = Cancelable::spawn(async move {
            let reachable = probe.ping().await;
            let previous = flag.swap(reachable, Ordering::SeqCst);
            debug!(reachable, "reachability probe completed");
            if previous != reachable {
                listeners.broadcast(|l| l.on_connectivity_changed(reachable));
            }
        });
        *self
            .probe_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    fn unbind(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == GateState::Unbound {
                return;
            }
            *state = GateState::Unbound;
        }
        if let Some(task) = self
            .probe_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.cancel();
        }
        info!("connectivity gate unbound");
    }
}
