// Server-side session registry and roster.
//
// Maps each live transport session to the Unique ID it negotiated, and keeps
// the roster (the set of IDs currently in use). The roster is a `BTreeSet`
// so the ClientOnline snapshot lists IDs in a stable order.
//
// Only `ServerEngine` mutates a registry, and only from the server actor
// thread, so there is no internal locking here.

use std::collections::{BTreeSet, HashMap};

use lan_relay_protocol::{SessionHandle, join_roster};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionHandle, String>,
    roster: BTreeSet<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_id(&self, unique_id: &str) -> bool {
        self.roster.contains(unique_id)
    }

    /// The ID `desired` resolves to: itself if free, otherwise `desired`
    /// followed by the smallest positive integer that is free.
    pub fn resolve_id(&self, desired: &str) -> String {
        if !self.contains_id(desired) {
            return desired.to_string();
        }
        (1u64..)
            .map(|i| format!("{desired}{i}"))
            .find(|candidate| !self.contains_id(candidate))
            .unwrap_or_else(|| desired.to_string())
    }

    /// Bind `session` to `unique_id`. The caller resolves the ID first.
    pub fn register(&mut self, session: SessionHandle, unique_id: String) {
        if let Some(previous) = self.sessions.insert(session, unique_id.clone()) {
            self.roster.remove(&previous);
        }
        self.roster.insert(unique_id);
    }

    /// Forget `session`, returning the ID it held.
    pub fn release(&mut self, session: SessionHandle) -> Option<String> {
        let unique_id = self.sessions.remove(&session)?;
        self.roster.remove(&unique_id);
        Some(unique_id)
    }

    pub fn unique_id(&self, session: SessionHandle) -> Option<&str> {
        self.sessions.get(&session).map(String::as_str)
    }

    pub fn roster(&self) -> impl Iterator<Item = &str> {
        self.roster.iter().map(String::as_str)
    }

    /// The roster, sub-separated for a ClientOnline message.
    pub fn roster_snapshot(&self) -> String {
        join_roster(self.roster())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.roster.clear();
    }
}
