//! Request Engine - correlated request/reply over a subject transport.
//!
//! Flow:
//! 1. `send()` generates a `CorrelationId`
//! 2. A one-shot handler is registered on `<subject><separator><id>`
//! 3. `{correlationId, data}` is emitted on `subject`
//! 4. The responder answers on the derived subject (`respond_success`/`respond_fail`)
//! 5. The reply resolves the `CallbackHandle`, the pending entry is removed
//!    and the derived-subject handler is unregistered
//!
//! Requests that are never answered are expired by `expire_pending()` (or
//! the background `spawn_expiry_task`) and resolve through the error path.

use crate::config::RelayConfig;
use crate::correlation::CorrelationId;
use crate::envelope::{IncomingRequest, Outcome, ReplyEnvelope, RequestEnvelope};
use crate::error::Result;
use crate::handle::CallbackHandle;
use dashmap::DashMap;
use relay_bus::{Handler, SubscriptionId, Transport};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A request waiting for its reply
struct PendingCall {
    /// Subject the request was sent on (for logging)
    subject: String,
    /// Derived subject the reply arrives on
    reply_subject: String,
    /// Handler registered on `reply_subject`
    subscription: SubscriptionId,
    /// Callbacks to resolve
    handle: CallbackHandle,
    /// When the request was sent
    created_at: Instant,
    /// Timeout for this request
    timeout: Option<Duration>,
}

/// Counters for one engine
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Total requests sent
    pub total_sent: AtomicU64,
    /// Replies on the success path
    pub total_completed: AtomicU64,
    /// Replies on the failure path
    pub total_failed: AtomicU64,
    /// Requests expired before a reply arrived
    pub total_timeouts: AtomicU64,
    /// Requests cancelled by the caller
    pub total_cancelled: AtomicU64,
    /// Replies dropped because no pending call matched
    pub total_unmatched: AtomicU64,
}

/// Correlates outgoing requests with their replies.
///
/// Owns its pending set; nothing is shared with other engines on the same
/// transport except the transport itself.
pub struct RequestEngine {
    /// Registry name (for logging)
    name: String,
    /// Transport requests and replies travel on
    transport: Arc<dyn Transport>,
    /// Separator and timeouts
    config: RelayConfig,
    /// Map of correlation ID to pending call
    pending: DashMap<CorrelationId, PendingCall>,
    /// Statistics
    stats: EngineStats,
    /// Handed to transport handlers so they never keep the engine alive
    me: Weak<RequestEngine>,
}

impl RequestEngine {
    /// Create an engine bound to `transport`.
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>, config: RelayConfig) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me| Self {
            name,
            transport,
            config,
            pending: DashMap::new(),
            stats: EngineStats::default(),
            me: me.clone(),
        })
    }

    /// Send `data` on `subject` using the configured timeout.
    ///
    /// The handle is returned before any reply can be processed, so callbacks
    /// may be bound right after the call.
    pub fn send(&self, subject: &str, data: Value) -> CallbackHandle {
        self.send_with_timeout(subject, data, self.config.request_timeout)
    }

    /// Serialize `data` and send it on `subject`.
    ///
    /// # Errors
    ///
    /// `RelayError::Serialization` if `data` cannot be represented as JSON.
    pub fn send_typed<T: Serialize>(&self, subject: &str, data: &T) -> Result<CallbackHandle> {
        let data = serde_json::to_value(data)?;
        Ok(self.send(subject, data))
    }

    /// Send `data` on `subject` with a per-request timeout (`None` = never).
    pub fn send_with_timeout(
        &self,
        subject: &str,
        data: Value,
        timeout: Option<Duration>,
    ) -> CallbackHandle {
        let correlation_id = CorrelationId::generate();
        let reply_subject = correlation_id.reply_subject(subject, &self.config.reply_separator);
        let handle = CallbackHandle::new(correlation_id.clone());

        let engine = self.me.clone();
        let expected = correlation_id.clone();
        let handler: Handler = Arc::new(move |payload: &Value| {
            if let Some(engine) = engine.upgrade() {
                engine.on_reply(&expected, payload);
            }
        });
        let subscription = self.transport.on(&reply_subject, handler);

        self.pending.insert(
            correlation_id.clone(),
            PendingCall {
                subject: subject.to_string(),
                reply_subject,
                subscription,
                handle: handle.clone(),
                created_at: Instant::now(),
                timeout,
            },
        );
        self.stats.total_sent.fetch_add(1, Ordering::Relaxed);

        debug!(
            engine = %self.name,
            subject,
            correlation_id = %correlation_id,
            "Request sent"
        );

        self.transport
            .emit(subject, RequestEnvelope::new(correlation_id, data).into_payload());
        handle
    }

    /// Reply arriving on the derived subject of `expected`. The subject decides
    /// which call it resolves; a payload naming another id is dropped.
    fn on_reply(&self, expected: &CorrelationId, payload: &Value) {
        let mut reply = ReplyEnvelope::from_payload(payload);
        match &reply.correlation_id {
            Some(id) if id != expected => {
                self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
                warn!(
                    engine = %self.name,
                    expected = %expected,
                    correlation_id = %id,
                    "Reply id does not match its reply subject, dropping"
                );
                return;
            }
            Some(_) => {}
            None => reply.correlation_id = Some(expected.clone()),
        }
        self.resolve(reply);
    }

    /// Route a reply payload to its pending call.
    ///
    /// Returns `true` if a pending call matched. Replies without a matching
    /// call (late, duplicate or foreign) are dropped without side effects.
    pub fn deliver_reply(&self, payload: &Value) -> bool {
        self.resolve(ReplyEnvelope::from_payload(payload))
    }

    fn resolve(&self, reply: ReplyEnvelope) -> bool {
        let Some((_, call)) = reply
            .correlation_id
            .as_ref()
            .and_then(|id| self.pending.remove(id))
        else {
            self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(
                engine = %self.name,
                correlation_id = ?reply.correlation_id,
                "Reply for unknown or expired correlation ID"
            );
            return false;
        };

        self.transport.off(&call.reply_subject, call.subscription);

        let outcome = reply.outcome();
        match outcome {
            Outcome::Success => self.stats.total_completed.fetch_add(1, Ordering::Relaxed),
            Outcome::Failure => self.stats.total_failed.fetch_add(1, Ordering::Relaxed),
        };
        debug!(
            engine = %self.name,
            subject = %call.subject,
            correlation_id = %call.handle.correlation_id(),
            outcome = ?outcome,
            response_time_ms = call.created_at.elapsed().as_millis(),
            "Request resolved"
        );

        call.handle.resolve(&reply)
    }

    /// Answer `request` on the success path: `{correlationId, success: true, data}`.
    ///
    /// Does not touch this engine's pending calls.
    pub fn respond_success(&self, request: &IncomingRequest, data: Value) {
        let reply = ReplyEnvelope::succeeded(Some(request.correlation_id.clone()), data);
        self.respond(request, reply);
    }

    /// Answer `request` on the failure path: `{correlationId, success: false, message}`.
    pub fn respond_fail(&self, request: &IncomingRequest, message: impl Into<String>) {
        let reply = ReplyEnvelope::failed(Some(request.correlation_id.clone()), message);
        self.respond(request, reply);
    }

    fn respond(&self, request: &IncomingRequest, reply: ReplyEnvelope) {
        let reply_subject = request
            .correlation_id
            .reply_subject(&request.subject, &self.config.reply_separator);
        debug!(
            engine = %self.name,
            subject = %reply_subject,
            outcome = ?reply.outcome(),
            "Responding to request"
        );
        self.transport.emit(&reply_subject, reply.into_payload());
    }

    /// Serve requests arriving on `subject`.
    ///
    /// `handler` receives this engine (to respond) and the decoded request.
    /// Payloads without a correlation id are dropped. The handler stays
    /// registered until `Transport::off` is called with the returned id.
    pub fn on_request<F>(&self, subject: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&RequestEngine, IncomingRequest) + Send + Sync + 'static,
    {
        let engine = self.me.clone();
        let served = subject.to_string();
        let wrapped: Handler = Arc::new(move |payload: &Value| {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            match IncomingRequest::from_payload(&served, payload) {
                Some(request) => handler(&engine, request),
                None => warn!(
                    engine = %engine.name,
                    subject = %served,
                    "Dropping request without correlation ID"
                ),
            }
        });
        self.transport.on(subject, wrapped)
    }

    /// Drop a pending request without invoking its callbacks.
    ///
    /// Returns `false` if the request is not pending.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        let Some((_, call)) = self.pending.remove(correlation_id) else {
            return false;
        };
        self.transport.off(&call.reply_subject, call.subscription);
        call.handle.discard();
        self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(engine = %self.name, correlation_id = %correlation_id, "Request cancelled");
        true
    }

    /// Expire requests whose timeout elapsed.
    ///
    /// Each expired request is removed, its reply handler unregistered, and
    /// its handle resolved with `{success: false, message: "request timed out after <ms>ms"}`.
    /// Returns the number of requests expired.
    pub fn expire_pending(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|entry| {
                entry
                    .timeout
                    .is_some_and(|timeout| now.duration_since(entry.created_at) >= timeout)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for correlation_id in expired {
            // A reply may have won the race since the scan.
            let Some((_, call)) = self.pending.remove(&correlation_id) else {
                continue;
            };
            self.transport.off(&call.reply_subject, call.subscription);
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);

            let timeout_ms = call.timeout.unwrap_or_default().as_millis();
            warn!(
                engine = %self.name,
                subject = %call.subject,
                correlation_id = %correlation_id,
                elapsed_ms = now.duration_since(call.created_at).as_millis(),
                timeout_ms,
                "Request timed out"
            );

            let reply = ReplyEnvelope::failed(
                Some(correlation_id),
                format!("request timed out after {timeout_ms}ms"),
            );
            call.handle.resolve(&reply);
            removed += 1;
        }
        removed
    }

    /// Name this engine was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration in use.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Get number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a correlation ID is pending
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Get statistics
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }
}

impl Drop for RequestEngine {
    fn drop(&mut self) {
        for entry in &self.pending {
            self.transport.off(&entry.reply_subject, entry.subscription);
        }
        if !self.pending.is_empty() {
            debug!(
                engine = %self.name,
                abandoned = self.pending.len(),
                "Engine dropped with pending requests"
            );
        }
    }
}

/// Background task that expires timed-out requests every `sweep_interval`.
///
/// The task ends once the engine is dropped.
pub fn spawn_expiry_task(engine: &Arc<RequestEngine>) -> JoinHandle<()> {
    let period = engine.config.sweep_interval;
    let engine = Arc::downgrade(engine);
    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(period);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            sweep.tick().await;
            let Some(engine) = engine.upgrade() else {
                break;
            };
            let expired = engine.expire_pending();
            if expired > 0 {
                debug!(engine = %engine.name, expired, "Expired pending requests");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use relay_bus::InMemoryTransport;
    use serde_json::json;

    fn engine_on(bus: &Arc<InMemoryTransport>) -> Arc<RequestEngine> {
        RequestEngine::new("test", bus.clone(), RelayConfig::default())
    }

    #[test]
    fn test_send_registers_pending_and_reply_handler() {
        let bus = InMemoryTransport::loopback("loop");
        let engine = engine_on(&bus);

        let handle = engine.send("enter", json!({"name": "bob"}));
        let id = handle.correlation_id().clone();

        assert!(engine.is_pending(&id));
        assert_eq!(engine.pending_count(), 1);
        assert_eq!(bus.handler_count(&id.reply_subject("enter", "_")), 1);
        assert_eq!(engine.stats().total_sent.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_deliver_reply_resolves_once() {
        let bus = InMemoryTransport::loopback("loop");
        let engine = engine_on(&bus);
        let hits = Arc::new(Mutex::new(Vec::new()));

        let (d, s) = (hits.clone(), hits.clone());
        let handle = engine
            .send("enter", json!(null))
            .done(move |_| d.lock().push("done"))
            .success(move |_| s.lock().push("success"));
        let id = handle.correlation_id().clone();

        let reply = ReplyEnvelope::succeeded(Some(id.clone()), json!({"ok": true})).into_payload();
        assert!(engine.deliver_reply(&reply));
        assert!(!engine.deliver_reply(&reply));

        assert_eq!(*hits.lock(), vec!["done", "success"]);
        assert!(!engine.is_pending(&id));
        assert_eq!(bus.handler_count(&id.reply_subject("enter", "_")), 0);
        assert_eq!(engine.stats().total_completed.load(Ordering::Relaxed), 1);
        assert_eq!(engine.stats().total_unmatched.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unknown_reply_is_dropped() {
        let bus = InMemoryTransport::loopback("loop");
        let engine = engine_on(&bus);
        let _handle = engine.send("enter", json!(null));

        assert!(!engine.deliver_reply(&json!({"correlationId": "nobody", "success": true})));
        assert!(!engine.deliver_reply(&json!({"success": true})));
        assert_eq!(engine.pending_count(), 1);
    }

    #[test]
    fn test_cancel() {
        let bus = InMemoryTransport::loopback("loop");
        let engine = engine_on(&bus);
        let hits = Arc::new(Mutex::new(0));
        let sink = hits.clone();
        let handle = engine.send("enter", json!(null)).done(move |_| *sink.lock() += 1);
        let id = handle.correlation_id().clone();

        assert!(engine.cancel(&id));
        assert!(!engine.cancel(&id));
        assert!(handle.is_resolved());
        assert_eq!(bus.subject_count(), 0);

        // A late reply after cancellation is ignored.
        let late = ReplyEnvelope::succeeded(Some(id), json!(1)).into_payload();
        assert!(!engine.deliver_reply(&late));
        assert_eq!(*hits.lock(), 0);
        assert_eq!(engine.stats().total_cancelled.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_expire_pending() {
        let bus = InMemoryTransport::loopback("loop");
        let engine = engine_on(&bus);
        let message = Arc::new(Mutex::new(None));

        let sink = message.clone();
        let handle = engine
            .send_with_timeout("enter", json!(null), Some(Duration::from_millis(5)))
            .error(move |reply| *sink.lock() = reply.message.clone());
        let forever = engine.send_with_timeout("enter", json!(null), None);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(engine.expire_pending(), 1);

        assert!(handle.is_resolved());
        assert_eq!(message.lock().as_deref(), Some("request timed out after 5ms"));
        assert!(engine.is_pending(forever.correlation_id()));
        assert_eq!(engine.pending_count(), 1);
        assert_eq!(engine.stats().total_timeouts.load(Ordering::Relaxed), 1);
        assert_eq!(
            bus.handler_count(&handle.correlation_id().reply_subject("enter", "_")),
            0
        );
    }

    #[test]
    fn test_send_typed() {
        #[derive(Serialize)]
        struct Enter {
            name: &'static str,
        }

        let bus = InMemoryTransport::loopback("loop");
        let engine = engine_on(&bus);
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        bus.on("enter", Arc::new(move |payload: &Value| *sink.lock() = Some(payload.clone())));

        let handle = engine.send_typed("enter", &Enter { name: "bob" }).unwrap();
        bus.pump();

        assert_eq!(
            seen.lock().clone(),
            Some(json!({"correlationId": handle.correlation_id().as_str(), "data": {"name": "bob"}}))
        );
    }

    #[test]
    fn test_drop_unregisters_reply_handlers() {
        let bus = InMemoryTransport::loopback("loop");
        let engine = engine_on(&bus);
        let _a = engine.send("a", json!(null));
        let _b = engine.send("b", json!(null));
        assert_eq!(bus.subject_count(), 2);

        drop(engine);
        assert_eq!(bus.subject_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_task() {
        let bus = InMemoryTransport::loopback("loop");
        let config = RelayConfig::default()
            .with_request_timeout(Some(Duration::from_millis(100)))
            .with_sweep_interval(Duration::from_millis(10));
        let engine = RequestEngine::new("sweeper", bus.clone(), config);
        let task = spawn_expiry_task(&engine);

        let handle = engine.send("enter", json!(null));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_resolved());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_resolved());
        assert_eq!(engine.pending_count(), 0);

        drop(engine);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(task.is_finished());
    }
}
