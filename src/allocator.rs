//! Session-aware proxy allocation.
//!
//! Two exclusion sets decide which active proxy is handed out: the addresses a
//! session has already received, and the addresses handed out to anyone since
//! the last round reset. A round resets once it covers the whole active set.

use crate::error::{Error, Result};
use crate::proxy::Proxy;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifier of a caller-defined logical session.
pub type SessionKey = i64;

#[derive(Debug)]
struct SessionEntry {
    used: HashSet<String>,
    touched: Instant,
}

/// Per-session history and pool-wide round state.
///
/// Not synchronised on its own; the registry guards it with its lock.
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: HashMap<SessionKey, SessionEntry>,
    round: HashSet<String>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out one proxy from `active` to `session`.
    ///
    /// Single pass over the active set. A round that already covers the active
    /// set, for instance after the set shrank, is reset before the pass; if
    /// every candidate is still excluded the call fails.
    pub fn allocate(
        &mut self,
        active: &HashMap<String, Arc<Proxy>>,
        session: SessionKey,
    ) -> Result<Arc<Proxy>> {
        if active.is_empty() {
            return Err(Error::NoActiveProxy);
        }

        let entry = self.sessions.entry(session).or_insert_with(|| SessionEntry {
            used: HashSet::new(),
            touched: Instant::now(),
        });
        entry.touched = Instant::now();

        if active.keys().all(|a| self.round.contains(a)) {
            self.round.clear();
        }

        let round = &self.round;
        let picked = active
            .iter()
            .find(|(address, _)| !round.contains(*address) && !entry.used.contains(*address))
            .map(|(address, proxy)| (address.clone(), Arc::clone(proxy)));

        let (address, proxy) = picked.ok_or(Error::NoActiveProxy)?;
        entry.used.insert(address.clone());
        self.round.insert(address);
        proxy.record_use();

        if active.keys().all(|a| self.round.contains(a)) {
            self.round.clear();
        }

        Ok(proxy)
    }

    /// Forget everything `session` was given. Returns whether it was tracked.
    pub fn release(&mut self, session: SessionKey) -> bool {
        self.sessions.remove(&session).is_some()
    }

    /// Drop sessions that have not allocated for longer than `max_idle`.
    pub fn expire_idle(&mut self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.touched.elapsed() <= max_idle);
        before - self.sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub(crate) fn round_len(&self) -> usize {
        self.round.len()
    }
}
