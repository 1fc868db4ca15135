//! Subject Watcher - persistent success/failure classification of a subject.
//!
//! Every payload arriving on the watched subject goes to exactly one of two
//! callbacks: `error` when it carries `success: false`, `listen` otherwise
//! (including payloads with no `success` field at all).

use crate::envelope::{Outcome, ReplyEnvelope};
use parking_lot::RwLock;
use relay_bus::{Handler, Subscription, Transport};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Callback invoked with the raw inbound payload.
pub type PayloadCallback = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct WatcherCallbacks {
    listen: Option<PayloadCallback>,
    error: Option<PayloadCallback>,
}

/// A long-lived subscription on one subject.
///
/// The transport handler is registered on construction and removed when the
/// watcher is dropped.
pub struct Watcher {
    subject: String,
    transport: Arc<dyn Transport>,
    callbacks: Arc<RwLock<WatcherCallbacks>>,
    subscription: Subscription,
}

impl Watcher {
    /// Start watching `subject` on `transport`.
    pub fn new(transport: Arc<dyn Transport>, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        let callbacks = Arc::new(RwLock::new(WatcherCallbacks::default()));

        let slot = Arc::downgrade(&callbacks);
        let watched = subject.clone();
        let handler: Handler = Arc::new(move |payload: &Value| {
            if let Some(callbacks) = slot.upgrade() {
                dispatch(&watched, &callbacks, payload);
            }
        });
        let subscription = Subscription::new(transport.clone(), subject.clone(), handler);

        debug!(subject = %subject, "Watcher started");
        Self {
            subject,
            transport,
            callbacks,
            subscription,
        }
    }

    /// Set the callback for payloads on the success path.
    pub fn listen<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.callbacks.write().listen = Some(Arc::new(callback));
        self
    }

    /// Set the callback for payloads carrying `success: false`.
    pub fn error<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.callbacks.write().error = Some(Arc::new(callback));
        self
    }

    /// Emit `{success: true, data}` on the watched subject.
    pub fn emit(&self, data: Value) {
        self.trigger(ReplyEnvelope::succeeded(None, data).into_payload());
    }

    /// Emit `{success: false, message}` on the watched subject.
    pub fn fail(&self, message: impl Into<String>) {
        self.trigger(ReplyEnvelope::failed(None, message).into_payload());
    }

    /// Emit `payload` unchanged on the watched subject.
    pub fn trigger(&self, payload: Value) {
        self.transport.emit(&self.subject, payload);
    }

    /// The watched subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Whether a listen callback is set.
    pub fn has_listener(&self) -> bool {
        self.callbacks.read().listen.is_some()
    }

    /// Whether an error callback is set.
    pub fn has_error_handler(&self) -> bool {
        self.callbacks.read().error.is_some()
    }
}

fn dispatch(subject: &str, callbacks: &RwLock<WatcherCallbacks>, payload: &Value) {
    let outcome = Outcome::classify(payload);
    // Clone out so the callback runs without the lock held.
    let callback = {
        let callbacks = callbacks.read();
        match outcome {
            Outcome::Success => callbacks.listen.clone(),
            Outcome::Failure => callbacks.error.clone(),
        }
    };

    match callback {
        Some(callback) => callback(payload),
        None => debug!(subject, outcome = ?outcome, "No watcher callback bound"),
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("subject", &self.subject)
            .field("subscription", &self.subscription.id())
            .field("listen", &self.has_listener())
            .field("error", &self.has_error_handler())
            .finish()
    }
}
