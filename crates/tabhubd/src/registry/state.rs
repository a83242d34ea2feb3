//! The two registry maps and the lock around them.
//!
//! Only the actor writes. Broadcasters and queries take the read lock.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tabhub_core::{ConnectionId, SessionId, UserId};

use crate::session::SessionHandle;

/// Every registered session, indexed by connection and by user.
///
/// Invariant: a session is in `all` iff it is in `by_user[its user]`, and
/// `by_user` holds no empty lists.
#[derive(Debug, Default)]
pub(crate) struct RegistryMaps {
    all: HashMap<ConnectionId, SessionHandle>,
    by_user: HashMap<UserId, Vec<SessionHandle>>,
}

impl RegistryMaps {
    pub fn insert(&mut self, session: SessionHandle) {
        self.by_user
            .entry(session.user_id().clone())
            .or_default()
            .push(session.clone());
        self.all.insert(session.connection_id(), session);
    }

    /// Removes a session from both maps. `None` if it was absent.
    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<SessionHandle> {
        let session = self.all.remove(&connection_id)?;
        if let Some(list) = self.by_user.get_mut(session.user_id()) {
            list.retain(|s| s.connection_id() != connection_id);
            if list.is_empty() {
                self.by_user.remove(session.user_id());
            }
        }
        Some(session)
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&SessionHandle> {
        self.all.get(&connection_id)
    }

    pub fn find(&self, session_id: &SessionId) -> Option<&SessionHandle> {
        self.user_sessions(&session_id.user_id)
            .iter()
            .find(|s| s.id() == session_id)
    }

    pub fn user_sessions(&self, user_id: &UserId) -> &[SessionHandle] {
        self.by_user.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionHandle> {
        self.all.values()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn has_active(&self, user_id: &UserId) -> bool {
        self.user_sessions(user_id).iter().any(|s| s.is_active())
    }

    pub fn active_count(&self, user_id: &UserId) -> usize {
        self.user_sessions(user_id)
            .iter()
            .filter(|s| s.is_active())
            .count()
    }

    /// Checks the `all` / `by_user` correspondence.
    pub fn is_consistent(&self) -> bool {
        let indexed: usize = self.by_user.values().map(Vec::len).sum();
        indexed == self.all.len()
            && self.by_user.iter().all(|(user, list)| {
                !list.is_empty()
                    && list.iter().all(|s| {
                        s.user_id() == user
                            && self
                                .all
                                .get(&s.connection_id())
                                .is_some_and(|t| t.connection_id() == s.connection_id())
                    })
            })
    }
}

pub(crate) fn read(lock: &RwLock<RegistryMaps>) -> RwLockReadGuard<'_, RegistryMaps> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write(lock: &RwLock<RegistryMaps>) -> RwLockWriteGuard<'_, RegistryMaps> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
