//! # Relay Core - Request/Reply and Subject Watchers
//!
//! Two messaging patterns on top of a `relay_bus::Transport`:
//!
//! - **Request engine**: send a request, get a `CallbackHandle`, and have
//!   exactly one reply routed back to it through a derived reply subject.
//! - **Watcher**: a persistent subscription that splits every payload on a
//!   subject into a success path and a failure path.
//!
//! ## Reply Routing
//!
//! ```text
//! Requester                               Responder
//!     │  emit(subject, {correlationId, data})  │
//!     │ ─────────────────────────────────────→ │
//!     │                                        │
//!     │  emit(subject_<id>, {correlationId,    │
//!     │       success, data | message})        │
//!     │ ←───────────────────────────────────── │
//! ```
//!
//! The requester listens on `subject_<id>` only while the request is
//! pending. The handler is removed on the first reply, on expiry, or on
//! cancellation.
//!
//! ## Classification
//!
//! A payload is a failure only when it carries `success: false`. Anything
//! else, including a missing `success` field, goes down the success path.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod correlation;
pub mod data;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod handle;
pub mod registry;
pub mod watcher;

// Re-export main types
pub use config::RelayConfig;
pub use correlation::CorrelationId;
pub use data::{find_value, public_data, Message, DEFAULT_PRIVATE_PREFIX};
pub use engine::{spawn_expiry_task, EngineStats, RequestEngine};
pub use envelope::{IncomingRequest, Outcome, ReplyEnvelope, RequestEnvelope};
pub use error::{RelayError, Result};
pub use handle::{CallbackHandle, ReplyCallback};
pub use registry::ChannelRegistry;
pub use watcher::{PayloadCallback, Watcher};
