//! Callback handle returned by `RequestEngine::send`.
//!
//! The handle is a builder: `done`, `success` and `error` each bind one
//! callback and return the handle, so bindings chain in any order:
//!
//! ```ignore
//! engine
//!     .send("enter", json!({"name": "bob"}))
//!     .success(|reply| println!("welcome {:?}", reply.data))
//!     .error(|reply| println!("rejected: {:?}", reply.message));
//! ```
//!
//! The engine resolves a handle at most once. Bindings made after that are
//! ignored; past replies are not buffered.

use crate::correlation::CorrelationId;
use crate::envelope::{Outcome, ReplyEnvelope};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Callback bound to a pending request.
pub type ReplyCallback = Box<dyn FnOnce(&ReplyEnvelope) + Send + 'static>;

#[derive(Default)]
struct Bindings {
    on_done: Option<ReplyCallback>,
    on_success: Option<ReplyCallback>,
    on_error: Option<ReplyCallback>,
    resolved: bool,
}

#[derive(Clone, Copy)]
enum Slot {
    Done,
    Success,
    Error,
}

/// Chainable completion callbacks for one request.
///
/// Clones share the same bindings.
#[derive(Clone)]
pub struct CallbackHandle {
    correlation_id: CorrelationId,
    bindings: Arc<Mutex<Bindings>>,
}

impl CallbackHandle {
    pub(crate) fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            bindings: Arc::new(Mutex::new(Bindings::default())),
        }
    }

    /// Id of the request this handle belongs to.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Bind a callback invoked for every reply, before `success`/`error`.
    pub fn done<F>(self, callback: F) -> Self
    where
        F: FnOnce(&ReplyEnvelope) + Send + 'static,
    {
        self.bind(Slot::Done, Box::new(callback));
        self
    }

    /// Bind a callback invoked when the reply is not an explicit failure.
    pub fn success<F>(self, callback: F) -> Self
    where
        F: FnOnce(&ReplyEnvelope) + Send + 'static,
    {
        self.bind(Slot::Success, Box::new(callback));
        self
    }

    /// Bind a callback invoked when the reply carries `success: false`.
    pub fn error<F>(self, callback: F) -> Self
    where
        F: FnOnce(&ReplyEnvelope) + Send + 'static,
    {
        self.bind(Slot::Error, Box::new(callback));
        self
    }

    /// Whether the request was answered, expired or cancelled.
    pub fn is_resolved(&self) -> bool {
        self.bindings.lock().resolved
    }

    fn bind(&self, slot: Slot, callback: ReplyCallback) {
        let mut bindings = self.bindings.lock();
        if bindings.resolved {
            debug!(
                correlation_id = %self.correlation_id,
                "Callback bound after resolution, ignoring"
            );
            return;
        }
        match slot {
            Slot::Done => bindings.on_done = Some(callback),
            Slot::Success => bindings.on_success = Some(callback),
            Slot::Error => bindings.on_error = Some(callback),
        }
    }

    /// Run the bound callbacks for `reply`: `done` first, then `success` or
    /// `error` depending on the outcome. Returns `false` if the handle was
    /// already resolved.
    pub(crate) fn resolve(&self, reply: &ReplyEnvelope) -> bool {
        // Callbacks run outside the lock so they may touch the handle.
        let (on_done, on_success, on_error) = {
            let mut bindings = self.bindings.lock();
            if bindings.resolved {
                return false;
            }
            bindings.resolved = true;
            (
                bindings.on_done.take(),
                bindings.on_success.take(),
                bindings.on_error.take(),
            )
        };

        if let Some(on_done) = on_done {
            on_done(reply);
        }
        let next = match reply.outcome() {
            Outcome::Success => on_success,
            Outcome::Failure => on_error,
        };
        if let Some(callback) = next {
            callback(reply);
        }
        true
    }

    /// Mark resolved without invoking anything.
    pub(crate) fn discard(&self) {
        let mut bindings = self.bindings.lock();
        bindings.resolved = true;
        bindings.on_done = None;
        bindings.on_success = None;
        bindings.on_error = None;
    }
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings = self.bindings.lock();
        f.debug_struct("CallbackHandle")
            .field("correlation_id", &self.correlation_id)
            .field("done", &bindings.on_done.is_some())
            .field("success", &bindings.on_success.is_some())
            .field("error", &bindings.on_error.is_some())
            .field("resolved", &bindings.resolved)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn journal() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn bound(log: &Arc<Mutex<Vec<&'static str>>>) -> CallbackHandle {
        let (d, s, e) = (log.clone(), log.clone(), log.clone());
        CallbackHandle::new("abc".into())
            .error(move |_| e.lock().push("error"))
            .success(move |_| s.lock().push("success"))
            .done(move |_| d.lock().push("done"))
    }

    #[test]
    fn test_success_runs_done_then_success() {
        let log = journal();
        let handle = bound(&log);

        assert!(handle.resolve(&ReplyEnvelope::succeeded(None, json!(1))));
        assert_eq!(*log.lock(), vec!["done", "success"]);
        assert!(handle.is_resolved());
    }

    #[test]
    fn test_failure_runs_done_then_error() {
        let log = journal();
        let handle = bound(&log);

        handle.resolve(&ReplyEnvelope::failed(None, "nope"));
        assert_eq!(*log.lock(), vec!["done", "error"]);
    }

    #[test]
    fn test_resolves_at_most_once() {
        let log = journal();
        let handle = bound(&log);

        assert!(handle.resolve(&ReplyEnvelope::default()));
        assert!(!handle.resolve(&ReplyEnvelope::default()));
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_missing_handlers_are_silent() {
        let log = journal();
        let sink = log.clone();
        let handle = CallbackHandle::new("abc".into()).success(move |_| sink.lock().push("success"));

        // Failure with no error callback: nothing runs, nothing panics.
        assert!(handle.resolve(&ReplyEnvelope::failed(None, "x")));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_success_with_only_error_bound_is_silent() {
        let log = journal();
        let sink = log.clone();
        let handle = CallbackHandle::new("abc".into()).error(move |_| sink.lock().push("error"));

        assert!(handle.resolve(&ReplyEnvelope::succeeded(None, json!({"ok": true}))));
        assert!(log.lock().is_empty());
        assert!(handle.is_resolved());
    }

    #[test]
    fn test_bind_after_resolution_is_noop() {
        let log = journal();
        let handle = CallbackHandle::new("abc".into());
        handle.resolve(&ReplyEnvelope::default());

        let sink = log.clone();
        let handle = handle.success(move |_| sink.lock().push("late"));
        assert!(!handle.resolve(&ReplyEnvelope::default()));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_rebinding_replaces_callback() {
        let log = journal();
        let (first, second) = (log.clone(), log.clone());
        let handle = CallbackHandle::new("abc".into())
            .success(move |_| first.lock().push("first"))
            .success(move |_| second.lock().push("second"));

        handle.resolve(&ReplyEnvelope::default());
        assert_eq!(*log.lock(), vec!["second"]);
    }

    #[test]
    fn test_discard() {
        let log = journal();
        let handle = bound(&log);
        handle.discard();
        assert!(handle.is_resolved());
        assert!(!handle.resolve(&ReplyEnvelope::default()));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_clones_share_bindings() {
        let log = journal();
        let handle = CallbackHandle::new("abc".into());
        let sink = log.clone();
        let _ = handle.clone().done(move |_| sink.lock().push("done"));

        handle.resolve(&ReplyEnvelope::default());
        assert_eq!(*log.lock(), vec!["done"]);
    }
}
