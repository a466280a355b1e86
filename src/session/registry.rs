//! Session registry
//!
//! Active sessions live in a concurrent map keyed by [`FlowKey`]. Removing a
//! session freezes it into a snapshot that joins a bounded list of completed
//! sessions, oldest dropped first.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::record::{FlowKey, Session, SessionSnapshot};

/// Default number of completed sessions retained
pub const DEFAULT_MAX_COMPLETED: usize = 500;

/// Concurrent store of active and recently completed sessions
#[derive(Debug)]
pub struct SessionRegistry {
    active: DashMap<FlowKey, Arc<Session>>,
    completed: Mutex<VecDeque<SessionSnapshot>>,
    max_completed: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COMPLETED)
    }
}

impl SessionRegistry {
    /// Create a registry retaining at most `max_completed` finished sessions
    #[must_use]
    pub fn new(max_completed: usize) -> Self {
        Self {
            active: DashMap::new(),
            completed: Mutex::new(VecDeque::with_capacity(max_completed.min(1024))),
            max_completed,
        }
    }

    /// Register an active session, replacing any under the same key
    pub fn add_session(&self, key: FlowKey, session: Arc<Session>) {
        trace!(%key, "session added");
        self.active.insert(key, session);
    }

    /// Get an active session
    #[must_use]
    pub fn get_session(&self, key: &FlowKey) -> Option<Arc<Session>> {
        self.active.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Retire an active session into the completed list
    ///
    /// Returns the stored snapshot, or `None` if the key was not active.
    /// Concurrent callers for the same key retire it exactly once.
    pub fn remove_session(&self, key: &FlowKey) -> Option<SessionSnapshot> {
        let (_, session) = self.active.remove(key)?;
        let snapshot = session.snapshot(Some(SystemTime::now()));
        trace!(%key, "session completed");

        if self.max_completed > 0 {
            let mut completed = self.completed.lock();
            completed.push_back(snapshot.clone());
            while completed.len() > self.max_completed {
                completed.pop_front();
            }
        }
        Some(snapshot)
    }

    /// Number of active sessions
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of retained completed sessions
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed.lock().len()
    }

    /// Snapshot every session; active ones sorted by start time
    #[must_use]
    pub fn report(&self) -> SessionReport {
        let mut active: Vec<(SystemTime, SessionSnapshot)> = self
            .active
            .iter()
            .map(|entry| (entry.value().start(), entry.value().snapshot(None)))
            .collect();
        active.sort_by_key(|(start, _)| *start);

        SessionReport {
            active_sessions: active.into_iter().map(|(_, s)| s).collect(),
            completed_sessions: self.completed.lock().iter().cloned().collect(),
        }
    }
}

/// Copy of the registry contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionReport {
    /// Sessions still in flight, oldest first
    pub active_sessions: Vec<SessionSnapshot>,
    /// Finished sessions, oldest first
    pub completed_sessions: Vec<SessionSnapshot>,
}

impl SessionReport {
    /// Render the report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
