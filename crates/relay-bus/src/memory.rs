//! # In-Memory Transport
//!
//! A web-socket-like endpoint living in process memory. Endpoints are either
//! connected in pairs (emits on one side reach the handlers of the other) or
//! looped back onto themselves.

use crate::transport::{ChannelKind, Handler, SubscriptionId, Transport, TransportError};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

/// A payload waiting in an endpoint's inbox.
struct Delivery {
    subject: String,
    payload: Value,
}

/// In-memory implementation of the transport.
///
/// Emitted payloads are queued on the receiving endpoint and dispatched by
/// `pump()` (synchronous drain) or `run()` (async loop). Suitable for tests
/// and single-process wiring; a network deployment would put a real socket
/// behind the same `Transport` trait.
pub struct InMemoryTransport {
    /// Endpoint name (for logging).
    name: String,

    /// Registered handlers by subject, in registration order.
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, Handler)>>>,

    /// Names reserved through `claim`, per kind.
    claims: Mutex<HashSet<(ChannelKind, String)>>,

    /// Deliveries waiting for dispatch.
    inbox: Mutex<VecDeque<Delivery>>,

    /// Endpoint that receives this endpoint's emits.
    peer: RwLock<Weak<InMemoryTransport>>,

    /// Wakes the dispatch loop when the inbox grows or the endpoint closes.
    notify: Notify,

    /// Next subscription id to assign.
    next_subscription: AtomicU64,

    /// Total payloads emitted by this endpoint.
    events_emitted: AtomicU64,

    /// Total payloads dispatched by this endpoint.
    events_delivered: AtomicU64,

    /// Set once `close()` has been called.
    closed: AtomicBool,
}

impl InMemoryTransport {
    fn with_name(name: String, peer: Weak<InMemoryTransport>) -> Self {
        Self {
            name,
            handlers: RwLock::new(HashMap::new()),
            claims: Mutex::new(HashSet::new()),
            inbox: Mutex::new(VecDeque::new()),
            peer: RwLock::new(peer),
            notify: Notify::new(),
            next_subscription: AtomicU64::new(1),
            events_emitted: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Create an endpoint whose emits are delivered to its own handlers.
    #[must_use]
    pub fn loopback(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me| Self::with_name(name, me.clone()))
    }

    /// Create two connected endpoints.
    ///
    /// Emits on `left` reach the handlers of `right` and vice versa.
    #[must_use]
    pub fn pair(left: impl Into<String>, right: impl Into<String>) -> (Arc<Self>, Arc<Self>) {
        let left = Arc::new(Self::with_name(left.into(), Weak::new()));
        let right = Arc::new(Self::with_name(right.into(), Weak::new()));
        *left.peer.write() = Arc::downgrade(&right);
        *right.peer.write() = Arc::downgrade(&left);
        (left, right)
    }

    /// Emit, reporting whether the payload was queued.
    ///
    /// # Errors
    ///
    /// `TransportError::Closed` if this endpoint or its peer is closed or gone.
    pub fn try_emit(&self, subject: &str, payload: Value) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let Some(peer) = self.peer.read().upgrade() else {
            return Err(TransportError::Closed);
        };
        if peer.is_closed() {
            return Err(TransportError::Closed);
        }

        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        trace!(endpoint = %self.name, peer = %peer.name, subject, "Payload queued");
        peer.enqueue(Delivery {
            subject: subject.to_string(),
            payload,
        });
        Ok(())
    }

    fn enqueue(&self, delivery: Delivery) {
        self.inbox.lock().push_back(delivery);
        self.notify.notify_one();
    }

    /// Dispatch queued deliveries until the inbox is empty.
    ///
    /// Deliveries queued by handlers during the drain are dispatched too.
    /// Returns the number of deliveries dispatched.
    pub fn pump(&self) -> usize {
        let mut dispatched = 0;
        loop {
            let next = self.inbox.lock().pop_front();
            let Some(delivery) = next else {
                break;
            };
            self.dispatch(&delivery);
            dispatched += 1;
        }
        dispatched
    }

    fn dispatch(&self, delivery: &Delivery) {
        // Snapshot so handlers may call on()/off() while running.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .get(&delivery.subject)
            .map(|registered| registered.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        self.events_delivered.fetch_add(1, Ordering::Relaxed);

        if handlers.is_empty() {
            debug!(
                endpoint = %self.name,
                subject = %delivery.subject,
                "Payload dropped (no handlers)"
            );
            return;
        }

        trace!(
            endpoint = %self.name,
            subject = %delivery.subject,
            handlers = handlers.len(),
            "Dispatching payload"
        );
        for handler in handlers {
            handler(&delivery.payload);
        }
    }

    /// Dispatch deliveries as they arrive until the endpoint is closed.
    ///
    /// This should be spawned as a background task.
    pub async fn run(self: Arc<Self>) {
        info!(endpoint = %self.name, "Dispatch loop started");
        loop {
            self.pump();
            if self.is_closed() {
                break;
            }
            self.notify.notified().await;
        }
        info!(
            endpoint = %self.name,
            undelivered = self.queued(),
            "Dispatch loop stopped"
        );
    }

    /// Close the endpoint. Further emits to or from it are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
        debug!(endpoint = %self.name, "Endpoint closed");
    }

    /// Whether `close()` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Endpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of handlers registered on `subject`.
    #[must_use]
    pub fn handler_count(&self, subject: &str) -> usize {
        self.handlers.read().get(subject).map_or(0, Vec::len)
    }

    /// Whether the handler `id` is registered on `subject`.
    #[must_use]
    pub fn has_handler(&self, subject: &str, id: SubscriptionId) -> bool {
        self.handlers
            .read()
            .get(subject)
            .is_some_and(|registered| registered.iter().any(|(h, _)| *h == id))
    }

    /// Number of subjects with at least one handler.
    #[must_use]
    pub fn subject_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Number of deliveries waiting in the inbox.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inbox.lock().len()
    }

    /// Total payloads emitted by this endpoint.
    #[must_use]
    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Relaxed)
    }

    /// Total payloads dispatched by this endpoint.
    #[must_use]
    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }
}

impl Transport for InMemoryTransport {
    fn emit(&self, subject: &str, payload: Value) {
        if let Err(e) = self.try_emit(subject, payload) {
            warn!(endpoint = %self.name, subject, error = %e, "Payload dropped");
        }
    }

    fn on(&self, subject: &str, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(subject.to_string())
            .or_default()
            .push((id, handler));
        debug!(endpoint = %self.name, subject, id = %id, "Handler registered");
        id
    }

    fn off(&self, subject: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(registered) = handlers.get_mut(subject) else {
            return false;
        };

        let before = registered.len();
        registered.retain(|(h, _)| *h != id);
        let removed = registered.len() != before;
        if registered.is_empty() {
            handlers.remove(subject);
        }
        if removed {
            debug!(endpoint = %self.name, subject, id = %id, "Handler removed");
        }
        removed
    }

    fn claim(&self, kind: ChannelKind, name: &str) -> bool {
        let claimed = self.claims.lock().insert((kind, name.to_string()));
        if claimed {
            debug!(endpoint = %self.name, %kind, name, "Name claimed");
        }
        claimed
    }

    fn release(&self, kind: ChannelKind, name: &str) -> bool {
        self.claims.lock().remove(&(kind, name.to_string()))
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("name", &self.name)
            .field("subjects", &self.subject_count())
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Pump every endpoint until none of them has anything left to dispatch.
///
/// Returns the total number of deliveries dispatched.
pub fn settle(endpoints: &[&Arc<InMemoryTransport>]) -> usize {
    let mut total = 0;
    loop {
        let round: usize = endpoints.iter().map(|endpoint| endpoint.pump()).sum();
        if round == 0 {
            return total;
        }
        total += round;
    }
}
