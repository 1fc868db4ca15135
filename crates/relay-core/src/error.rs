//! Error types for relay-core.

use thiserror::Error;

/// Errors raised synchronously by relay-core operations.
///
/// Application-level failures (a responder answering `success: false`) are
/// never errors; they are routed to the bound error callback.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A request engine with this name is already bound to the transport.
    #[error("another request called {name} already exists")]
    DuplicateRequest { name: String },

    /// A watcher for this subject is already bound to the transport.
    #[error("another event watcher for {subject} already exists")]
    DuplicateWatcher { subject: String },

    /// Payload (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration rejected by `RelayConfig::validate`.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias using RelayError.
pub type Result<T> = std::result::Result<T, RelayError>;
