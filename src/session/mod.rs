//! Session management
//!
//! Sessions are per-browser state bags keyed by the opaque token carried in
//! the `sid` cookie. The route layer only sees the [`SessionStore`] trait.

use crate::agent::DataframeAgent;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// State attached to one session.
#[derive(Clone, Default)]
pub struct SessionState {
    pub agent: Option<Arc<DataframeAgent>>,
    pub last_seen: DateTime<Utc>,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("has_agent", &self.agent.is_some())
            .field("last_seen", &self.last_seen)
            .finish()
    }
}

impl SessionState {
    fn fresh() -> Self {
        let now = Utc::now();
        Self {
            agent: None,
            last_seen: now,
        }
    }
}

/// Storage for session state.
pub trait SessionStore: Send + Sync {
    /// Create an empty session and return its id.
    fn create(&self) -> String;

    /// State for `id`; an empty state if the session is unknown or expired.
    fn get(&self, id: &str) -> SessionState;

    /// Whether `id` names a live session.
    fn contains(&self, id: &str) -> bool;

    /// Mutate the state for `id`, creating the session if absent.
    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut SessionState));

    /// Drop a session. Returns whether it existed.
    fn expire(&self, id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local session store with optional idle expiry.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionState>>,
    ttl: Option<Duration>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Option<std::time::Duration>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: ttl.and_then(|t| Duration::from_std(t).ok()),
        }
    }

    fn is_expired(&self, state: &SessionState, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| now - state.last_seen > ttl)
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, state| !self.is_expired(state, now));
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, remaining = sessions.len(), "Purged expired sessions");
        }
        removed
    }

    #[cfg(test)]
    fn backdate(&self, id: &str, by: std::time::Duration) {
        if let Some(state) = self.sessions.write().get_mut(id) {
            state.last_seen -= Duration::from_std(by).unwrap();
        }
    }
}

pub fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl SessionStore for InMemorySessionStore {
    fn create(&self) -> String {
        let id = new_session_id();
        self.sessions.write().insert(id.clone(), SessionState::fresh());
        tracing::debug!(session_id = %id, "Created session");
        id
    }

    fn get(&self, id: &str) -> SessionState {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let expired = match sessions.get(id) {
            Some(state) => self.is_expired(state, now),
            None => return SessionState::default(),
        };
        if expired {
            sessions.remove(id);
            tracing::debug!(session_id = %id, "Session expired");
            return SessionState::default();
        }
        match sessions.get_mut(id) {
            Some(state) => {
                state.last_seen = now;
                state.clone()
            }
            None => SessionState::default(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        let now = Utc::now();
        self.sessions
            .read()
            .get(id)
            .is_some_and(|state| !self.is_expired(state, now))
    }

    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut SessionState)) {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let state = sessions
            .entry(id.to_string())
            .or_insert_with(SessionState::fresh);
        if self.is_expired(state, now) {
            *state = SessionState::fresh();
        }
        apply(state);
        state.last_seen = now;
    }

    fn expire(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    fn len(&self) -> usize {
        self.sessions.read().len()
    }
}
