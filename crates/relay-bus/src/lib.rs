//! # Relay Bus - Subject-Addressed Transport
//!
//! The transport layer underneath the request/reply and watcher patterns.
//!
//! ## Contract
//!
//! - `emit(subject, payload)` sends an opaque JSON payload under a subject
//! - `on(subject, handler)` registers a handler and returns its `SubscriptionId`
//! - `off(subject, id)` removes exactly that handler
//! - `claim(kind, name)` / `release(kind, name)` reserve names per transport instance
//!
//! ## Delivery Model
//!
//! ```text
//! ┌──────────────┐   emit()   ┌──────────────┐   pump()/run()   ┌──────────┐
//! │  Endpoint A  │ ─────────→ │ B's inbox    │ ───────────────→ │ handlers │
//! └──────────────┘            └──────────────┘                  └──────────┘
//! ```
//!
//! Deliveries are queued on the receiving endpoint and dispatched one at a
//! time. A handler always runs to completion before the next delivery starts.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod memory;
pub mod subscription;
pub mod transport;

// Re-export main types
pub use memory::{settle, InMemoryTransport};
pub use subscription::Subscription;
pub use transport::{ChannelKind, Handler, SubscriptionId, Transport, TransportError};
