//! Presence mediator boundary.
//!
//! The hub decides *when* a user goes online or offline; a mediator decides
//! what that means (persist a flag, notify followers). Calls are made
//! synchronously from the registry's event loop, so implementations must hand
//! their own I/O off to a background task and return quickly.

use thiserror::Error;

use crate::UserId;

/// Errors reported by a presence mediator.
///
/// The registry logs these and moves on; connection state is never rolled
/// back because a presence store failed.
#[derive(Debug, Clone, Error)]
pub enum PresenceError {
    /// The backing store rejected or failed the update.
    #[error("presence store unavailable: {0}")]
    Unavailable(String),

    /// The background worker that performs the update has gone away.
    #[error("presence worker stopped")]
    WorkerStopped,
}

/// Receives online/offline transitions for users.
///
/// The registry guarantees edge-triggering: `mark_online` is only called when
/// a user goes from zero to one active session, `mark_offline` only when the
/// last active session goes away.
pub trait PresenceMediator: Send + Sync + 'static {
    fn mark_online(&self, user_id: &UserId) -> Result<(), PresenceError>;
    fn mark_offline(&self, user_id: &UserId) -> Result<(), PresenceError>;
}

/// Mediator that ignores all transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPresence;

impl PresenceMediator for NoopPresence {
    fn mark_online(&self, _user_id: &UserId) -> Result<(), PresenceError> {
        Ok(())
    }

    fn mark_offline(&self, _user_id: &UserId) -> Result<(), PresenceError> {
        Ok(())
    }
}
