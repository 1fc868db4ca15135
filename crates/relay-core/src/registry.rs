//! Channel Registry - named request engines and watchers per transport.
//!
//! Names are unique per transport instance: binding a second engine under a
//! name, or a second watcher on a subject, fails immediately, even through
//! another registry on the same transport. Requests and watchers are claimed
//! in separate namespaces. A registry releases its names when dropped.

use crate::config::RelayConfig;
use crate::engine::RequestEngine;
use crate::error::{RelayError, Result};
use crate::handle::CallbackHandle;
use crate::watcher::Watcher;
use parking_lot::RwLock;
use relay_bus::{ChannelKind, Transport};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Name of the engine backing one-off `send_request` calls.
const ANONYMOUS_ENGINE: &str = "<anonymous>";

/// Engines and watchers bound to one transport.
pub struct ChannelRegistry {
    /// The transport everything is bound to.
    transport: Arc<dyn Transport>,

    /// Configuration handed to every engine.
    config: RelayConfig,

    /// Request engines by name.
    requests: RwLock<HashMap<String, Arc<RequestEngine>>>,

    /// Watchers by subject.
    watchers: RwLock<HashMap<String, Arc<Watcher>>>,

    /// Engine for one-off requests.
    anonymous: Arc<RequestEngine>,
}

impl ChannelRegistry {
    /// Create a registry for `transport`.
    pub fn new(transport: Arc<dyn Transport>, config: RelayConfig) -> Self {
        let anonymous = RequestEngine::new(ANONYMOUS_ENGINE, transport.clone(), config.clone());
        Self {
            transport,
            config,
            requests: RwLock::new(HashMap::new()),
            watchers: RwLock::new(HashMap::new()),
            anonymous,
        }
    }

    /// Bind a new request engine under `name`.
    ///
    /// # Errors
    ///
    /// `RelayError::DuplicateRequest` if `name` is already bound on this
    /// transport.
    pub fn add_request(&self, name: &str) -> Result<Arc<RequestEngine>> {
        let duplicate = || RelayError::DuplicateRequest {
            name: name.to_string(),
        };
        match self.requests.write().entry(name.to_string()) {
            Entry::Occupied(_) => Err(duplicate()),
            Entry::Vacant(_) if !self.transport.claim(ChannelKind::Request, name) => Err(duplicate()),
            Entry::Vacant(slot) => {
                let engine = RequestEngine::new(name, self.transport.clone(), self.config.clone());
                slot.insert(engine.clone());
                debug!(name, "Request engine registered");
                Ok(engine)
            }
        }
    }

    /// Bind a new watcher on `subject`.
    ///
    /// # Errors
    ///
    /// `RelayError::DuplicateWatcher` if `subject` is already watched on this
    /// transport.
    pub fn add_watcher(&self, subject: &str) -> Result<Arc<Watcher>> {
        let duplicate = || RelayError::DuplicateWatcher {
            subject: subject.to_string(),
        };
        match self.watchers.write().entry(subject.to_string()) {
            Entry::Occupied(_) => Err(duplicate()),
            Entry::Vacant(_) if !self.transport.claim(ChannelKind::Watcher, subject) => Err(duplicate()),
            Entry::Vacant(slot) => {
                let watcher = Arc::new(Watcher::new(self.transport.clone(), subject));
                slot.insert(watcher.clone());
                debug!(subject, "Watcher registered");
                Ok(watcher)
            }
        }
    }

    /// Send a one-off request without registering a named engine.
    pub fn send_request(&self, subject: &str, data: Value) -> CallbackHandle {
        self.anonymous.send(subject, data)
    }

    /// Look up a request engine by name.
    pub fn request(&self, name: &str) -> Option<Arc<RequestEngine>> {
        self.requests.read().get(name).cloned()
    }

    /// Look up a watcher by subject.
    pub fn watcher(&self, subject: &str) -> Option<Arc<Watcher>> {
        self.watchers.read().get(subject).cloned()
    }

    /// Expire timed-out requests across every engine of this registry.
    pub fn expire_pending(&self) -> usize {
        let engines: Vec<Arc<RequestEngine>> = self.requests.read().values().cloned().collect();
        engines
            .iter()
            .chain(std::iter::once(&self.anonymous))
            .map(|engine| engine.expire_pending())
            .sum()
    }

    /// The engine used by `send_request`.
    pub fn anonymous(&self) -> &Arc<RequestEngine> {
        &self.anonymous
    }

    /// The bound transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Configuration handed to engines.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        for name in self.requests.get_mut().keys() {
            self.transport.release(ChannelKind::Request, name);
        }
        for subject in self.watchers.get_mut().keys() {
            self.transport.release(ChannelKind::Watcher, subject);
        }
    }
}
