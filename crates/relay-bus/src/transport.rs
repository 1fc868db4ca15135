//! # Transport Contract
//!
//! The minimal surface the request engine and watchers need from a channel.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Callback invoked for every payload delivered on a subject.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one registered handler on one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Errors from transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint (or its peer) was closed.
    #[error("Transport closed")]
    Closed,
}

/// Kind of name reserved on a transport through `Transport::claim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// A named request engine.
    Request,
    /// A watcher on a subject.
    Watcher,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Watcher => f.write_str("watcher"),
        }
    }
}

/// A bidirectional, subject-addressed publish/subscribe channel.
///
/// Implementations must allow handlers to be added and removed while a
/// delivery is being dispatched, and must not hold internal locks while a
/// handler runs.
pub trait Transport: Send + Sync {
    /// Send `payload` under `subject` to the remote side.
    ///
    /// Delivery failures are the transport's concern; callers observe them
    /// only as a reply that never arrives.
    fn emit(&self, subject: &str, payload: Value);

    /// Register `handler` for every payload arriving on `subject`.
    fn on(&self, subject: &str, handler: Handler) -> SubscriptionId;

    /// Remove the handler registered under `id`.
    ///
    /// Returns `false` if no such handler exists on `subject`.
    fn off(&self, subject: &str, id: SubscriptionId) -> bool;

    /// Reserve `name` for `kind` on this transport instance.
    ///
    /// Returns `false` if it is already reserved. Each kind has its own
    /// namespace.
    fn claim(&self, kind: ChannelKind, name: &str) -> bool;

    /// Drop a reservation made by `claim`. Returns `false` if none existed.
    fn release(&self, kind: ChannelKind, name: &str) -> bool;
}
