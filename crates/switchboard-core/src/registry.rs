//! Two views over the set of live sessions.
//!
//! `sessions` holds every registered session and is what broadcasts walk.
//! `users` maps a user id to the one session targeted deliveries go to.
//! Every id in `users` is a key of `sessions`.

use crate::session::{SessionHandle, SessionId};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct Registry {
    sessions: HashMap<SessionId, SessionHandle>,
    users: HashMap<String, SessionId>,
}

impl Registry {
    /// Add a session. A session with a user id takes over that user's
    /// mapping; the previous holder, if any, is returned and stays in the
    /// broadcast set.
    pub(crate) fn insert(&mut self, handle: SessionHandle) -> Option<SessionId> {
        let id = handle.id();
        let displaced = if handle.user_id().is_empty() {
            None
        } else {
            self.users
                .insert(handle.user_id().to_string(), id)
                .filter(|previous| *previous != id)
        };
        self.sessions.insert(id, handle);
        displaced
    }

    /// Remove a session. The user mapping is only dropped if it still
    /// points at this session.
    pub(crate) fn remove(&mut self, id: SessionId) -> Option<SessionHandle> {
        let handle = self.sessions.remove(&id)?;
        if self.users.get(handle.user_id()) == Some(&id) {
            self.users.remove(handle.user_id());
        }
        Some(handle)
    }

    pub(crate) fn session_for(&self, user_id: &str) -> Option<&SessionHandle> {
        self.users.get(user_id).and_then(|id| self.sessions.get(id))
    }

    pub(crate) fn sessions(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.values()
    }

    pub(crate) fn user_ids(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    pub(crate) fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn user_count(&self) -> usize {
        self.users.len()
    }
}
