//! Registry actor commands, errors, and events.
//!
//! - `RegistryCommand`: mutations sent to the actor
//! - `RegistryError`: errors surfaced to callers
//! - `HubEvent`: notifications published for subscribers

use std::fmt;

use thiserror::Error;
use tokio::sync::oneshot;

use tabhub_core::{ConnectionId, SessionId, UserId};

use crate::session::Session;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Every mutation of the registry travels through this channel, so the
/// actor applies them one at a time in arrival order.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Add a session, evicting whatever the takeover policy says it replaces.
    ///
    /// # Errors
    /// - `RegistryError::SessionClosed` if the session was closed before
    ///   the actor got to it
    Register {
        /// Boxed to keep the enum small.
        session: Box<Session>,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a session. Removing an absent session is a no-op and answers
    /// `false`.
    Unregister {
        connection_id: ConnectionId,
        reason: RemovalReason,
        /// `None` when sent from a session driver that does not wait.
        respond_to: Option<oneshot::Sender<bool>>,
    },

    /// A tab reported moving to the foreground (`true`) or background.
    SetActivity {
        connection_id: ConnectionId,
        active: bool,
    },

    /// Close the session with this identity, if registered.
    CloseSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Close every session of a user. Answers the number closed.
    CloseUser {
        user_id: UserId,
        respond_to: oneshot::Sender<usize>,
    },

    /// Run one heartbeat sweep now. Answers the number evicted.
    SweepHeartbeats { respond_to: oneshot::Sender<usize> },

    /// Whether the presence layer currently considers the user online.
    IsOnline {
        user_id: UserId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Close every session, mark everyone offline, and stop the actor.
    Shutdown { respond_to: oneshot::Sender<()> },
}

// ============================================================================
// Registry Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The actor has stopped.
    #[error("Registry channel closed")]
    ChannelClosed,

    /// The session was closed before it could be registered.
    #[error("Session already closed: {0}")]
    SessionClosed(SessionId),
}

// ============================================================================
// Hub Events
// ============================================================================

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The client disconnected or a pump failed.
    Disconnected,
    /// A newer session of the same user (or tab) replaced it.
    Takeover,
    /// Another tab of the same user became active.
    SiblingActivated,
    /// No sign of life within the heartbeat timeout.
    HeartbeatTimeout,
    /// Closed through the admin surface.
    Explicit,
    /// The hub is shutting down.
    Shutdown,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Takeover => "takeover",
            Self::SiblingActivated => "sibling_activated",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Explicit => "explicit",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Notifications published by the hub.
///
/// Subscribers that fall behind lose events (`RecvError::Lagged`); the hub
/// never waits for them.
#[derive(Debug, Clone)]
pub enum HubEvent {
    SessionRegistered {
        session_id: SessionId,
        connection_id: ConnectionId,
    },
    SessionRemoved {
        session_id: SessionId,
        connection_id: ConnectionId,
        reason: RemovalReason,
    },
    /// Fired only when a user's online state actually flips.
    PresenceChanged { user_id: UserId, online: bool },
    /// An inbound frame the hub does not interpret itself.
    ClientMessage {
        session_id: SessionId,
        kind: String,
        payload: serde_json::Value,
    },
}
