//! The registry of known and active proxies.

use crate::allocator::{SessionKey, SessionTracker};
use crate::error::Result;
use crate::proxy::{Proxy, ProxyRecord};

use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct RegistryState {
    all: HashMap<String, Arc<Proxy>>,
    active: HashMap<String, Arc<Proxy>>,
    sessions: SessionTracker,
}

/// Every known proxy, the subset currently believed reachable, and the
/// allocation history, behind a single reader-writer lock.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    /// Build a registry from loaded proxies. The active set starts empty.
    pub fn new(proxies: impl IntoIterator<Item = Proxy>) -> Self {
        let all = proxies
            .into_iter()
            .map(|p| (p.address().to_string(), Arc::new(p)))
            .collect();
        Self {
            state: RwLock::new(RegistryState {
                all,
                ..Default::default()
            }),
        }
    }

    /// Look up a known proxy by address.
    pub fn get(&self, address: &str) -> Option<Arc<Proxy>> {
        self.state.read().all.get(address).cloned()
    }

    /// Add a known proxy to the active set. Returns false if unknown or already active.
    pub fn mark_active(&self, address: &str) -> bool {
        let mut state = self.state.write();
        let Some(proxy) = state.all.get(address).cloned() else {
            return false;
        };
        if state.active.contains_key(address) {
            return false;
        }
        debug!("proxy {} is active", address);
        state.active.insert(address.to_string(), proxy);
        true
    }

    /// Remove a proxy from the active set, if present.
    pub fn mark_inactive(&self, address: &str) {
        if self.state.write().active.remove(address).is_some() {
            debug!("proxy {} is inactive", address);
        }
    }

    pub fn is_active(&self, address: &str) -> bool {
        self.state.read().active.contains_key(address)
    }

    /// Hand out a proxy for `session`, see [`SessionTracker::allocate`].
    pub fn allocate(&self, session: SessionKey) -> Result<Arc<Proxy>> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.sessions.allocate(&state.active, session)
    }

    /// Forget the allocation history of `session`.
    pub fn release(&self, session: SessionKey) {
        self.state.write().sessions.release(session);
    }

    /// Drop sessions idle for longer than `max_idle`, returning how many went.
    pub fn expire_idle_sessions(&self, max_idle: Duration) -> usize {
        self.state.write().sessions.expire_idle(max_idle)
    }

    pub fn session_count(&self) -> usize {
        self.state.read().sessions.session_count()
    }

    /// Addresses of every known proxy.
    pub fn addresses(&self) -> Vec<String> {
        self.state.read().all.keys().cloned().collect()
    }

    /// Snapshot of every known proxy, sorted by address.
    pub fn records(&self) -> Vec<ProxyRecord> {
        let mut records: Vec<ProxyRecord> =
            self.state.read().all.values().map(|p| p.record()).collect();
        records.sort_by(|a, b| a.address.cmp(&b.address));
        records
    }

    /// `(total, active)` proxy counts.
    pub fn stats(&self) -> (usize, usize) {
        let state = self.state.read();
        (state.all.len(), state.active.len())
    }
}
