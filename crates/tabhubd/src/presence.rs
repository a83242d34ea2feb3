//! Presence mediator that hands transitions to a background task.
//!
//! The registry calls the mediator from its event loop, so the call itself
//! only pushes onto an unbounded channel. A worker drains the channel and
//! does the slow part (here: structured logging; in a deployment, the
//! presence store).

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tabhub_core::{PresenceError, PresenceMediator, UserId};

/// One online/offline transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceUpdate {
    Online(UserId),
    Offline(UserId),
}

impl PresenceUpdate {
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::Online(user) | Self::Offline(user) => user,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online(_))
    }
}

/// Forwards transitions to a channel without blocking.
#[derive(Debug, Clone)]
pub struct ChannelPresence {
    sender: mpsc::UnboundedSender<PresenceUpdate>,
}

impl ChannelPresence {
    pub fn new(sender: mpsc::UnboundedSender<PresenceUpdate>) -> Self {
        Self { sender }
    }

    fn push(&self, update: PresenceUpdate) -> Result<(), PresenceError> {
        self.sender
            .send(update)
            .map_err(|_| PresenceError::WorkerStopped)
    }
}

impl PresenceMediator for ChannelPresence {
    fn mark_online(&self, user_id: &UserId) -> Result<(), PresenceError> {
        self.push(PresenceUpdate::Online(user_id.clone()))
    }

    fn mark_offline(&self, user_id: &UserId) -> Result<(), PresenceError> {
        self.push(PresenceUpdate::Offline(user_id.clone()))
    }
}

/// Creates a mediator and the receiver its worker should drain.
pub fn channel_presence() -> (ChannelPresence, mpsc::UnboundedReceiver<PresenceUpdate>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelPresence::new(tx), rx)
}

/// Spawns a worker that records each transition until cancelled or until
/// the mediator is dropped.
pub fn spawn_presence_logger(
    mut updates: mpsc::UnboundedReceiver<PresenceUpdate>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                update = updates.recv() => match update {
                    Some(update) => {
                        info!(
                            user_id = %update.user_id(),
                            online = update.is_online(),
                            "User presence updated"
                        );
                    }
                    None => break,
                }
            }
        }
        debug!("Presence worker stopped");
    })
}
