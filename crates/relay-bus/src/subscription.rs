//! # Subscription Guard
//!
//! Ties a handler registration to a value's lifetime.

use crate::transport::{Handler, SubscriptionId, Transport};
use std::sync::Arc;
use tracing::debug;

/// A registered handler that is removed from the transport when dropped.
pub struct Subscription {
    /// Transport the handler is registered on.
    transport: Arc<dyn Transport>,

    /// Subject the handler listens to.
    subject: String,

    /// Id returned by `Transport::on`.
    id: SubscriptionId,
}

impl Subscription {
    /// Register `handler` on `subject` and guard the registration.
    pub fn new(transport: Arc<dyn Transport>, subject: impl Into<String>, handler: Handler) -> Self {
        let subject = subject.into();
        let id = transport.on(&subject, handler);
        debug!(subject = %subject, id = %id, "Subscription created");
        Self {
            transport,
            subject,
            id,
        }
    }

    /// The guarded subscription id.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The subject this subscription listens to.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let removed = self.transport.off(&self.subject, self.id);
        debug!(subject = %self.subject, id = %self.id, removed, "Subscription dropped");
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTransport;
    use serde_json::Value;

    #[test]
    fn test_subscription_drop_cleanup() {
        let bus = InMemoryTransport::loopback("test");
        let transport: Arc<dyn Transport> = bus.clone();

        {
            let _sub1 = Subscription::new(transport.clone(), "status", Arc::new(|_: &Value| {}));
            let _sub2 = Subscription::new(transport.clone(), "status", Arc::new(|_: &Value| {}));
            assert_eq!(bus.handler_count("status"), 2);
        }

        // After drop, count should be 0
        assert_eq!(bus.handler_count("status"), 0);
    }

    #[test]
    fn test_subscription_accessors() {
        let bus = InMemoryTransport::loopback("test");
        let sub = Subscription::new(bus.clone(), "enter", Arc::new(|_: &Value| {}));
        assert_eq!(sub.subject(), "enter");
        assert!(bus.has_handler("enter", sub.id()));
    }
}
