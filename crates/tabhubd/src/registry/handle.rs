//! Client interface for the hub.
//!
//! `HubHandle` is cheap to clone. Mutations go to the actor as commands;
//! broadcasts and lookups take the shared read lock directly and never wait
//! on the actor or on any session.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use tabhub_core::{ConnectionId, Event, SessionId, SessionView, UserId};
use tabhub_protocol::encode_event;

use super::commands::{HubEvent, RegistryCommand, RegistryError, RemovalReason};
use super::state::{self, RegistryMaps};
use crate::config::HubConfig;
use crate::session::{EnqueueError, Frame, Session, SessionHandle, Transport};

// ============================================================================
// Hub Handle
// ============================================================================

/// Handle for interacting with the hub.
///
/// ```ignore
/// let hub = spawn_hub(HubConfig::default(), Arc::new(NoopPresence));
///
/// let session = hub.connect(SessionId::new("42", "tab-a"), stream).await?;
/// hub.broadcast_to_user(&UserId::from("42"), &event);
/// ```
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<RegistryCommand>,
    event_sender: broadcast::Sender<HubEvent>,
    maps: Arc<RwLock<RegistryMaps>>,
    config: Arc<HubConfig>,
}

impl HubHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<HubEvent>,
        maps: Arc<RwLock<RegistryMaps>>,
        config: HubConfig,
    ) -> Self {
        Self {
            sender,
            event_sender,
            maps,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Subscribe to hub events.
    ///
    /// Slow subscribers lose events rather than slowing the hub.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.event_sender.subscribe()
    }

    /// Whether the actor is still accepting commands.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;
        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Hand a session to the registry, which starts its pumps.
    ///
    /// # Errors
    ///
    /// - `RegistryError::SessionClosed` if the session was closed first
    /// - `RegistryError::ChannelClosed` if the hub has shut down
    pub async fn register(&self, session: Session) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::Register {
            session: Box::new(session),
            respond_to,
        })
        .await?
    }

    /// Builds a session over `transport` with the configured queue capacity
    /// and registers it.
    pub async fn connect<T: Transport>(
        &self,
        id: SessionId,
        transport: T,
    ) -> Result<SessionHandle, RegistryError> {
        let session = Session::new(id, transport, self.config.queue_capacity);
        let handle = session.handle().clone();
        self.register(session).await?;
        Ok(handle)
    }

    /// Removes a session. Returns `false` if it was not registered.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Result<bool, RegistryError> {
        self.request(|tx| RegistryCommand::Unregister {
            connection_id,
            reason: RemovalReason::Explicit,
            respond_to: Some(tx),
        })
        .await
    }

    /// Closes every session and marks every online user offline.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::Shutdown { respond_to })
            .await
    }

    // ------------------------------------------------------------------------
    // Broadcast
    // ------------------------------------------------------------------------

    /// Queues `event` on every active session of `user_id`.
    ///
    /// Never blocks. Sessions whose queue is full drop the event. Returns the
    /// number of sessions the event was queued on; 0 for unknown users.
    pub fn broadcast_to_user(&self, user_id: &UserId, event: &Event) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        let maps = state::read(&self.maps);
        maps.user_sessions(user_id)
            .iter()
            .filter(|s| s.is_active())
            .filter(|s| deliver(s, &frame, event))
            .count()
    }

    /// Queues `event` on every registered session, active or not.
    pub fn broadcast_all(&self, event: &Event) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        let maps = state::read(&self.maps);
        maps.sessions()
            .filter(|s| deliver(s, &frame, event))
            .count()
    }

    /// Like [`Self::broadcast_all`] but skips every session of `excluded`.
    pub fn broadcast_all_except(&self, excluded: &UserId, event: &Event) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        let maps = state::read(&self.maps);
        maps.sessions()
            .filter(|s| s.user_id() != excluded)
            .filter(|s| deliver(s, &frame, event))
            .count()
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn has_session(&self, session_id: &SessionId) -> bool {
        state::read(&self.maps).find(session_id).is_some()
    }

    pub fn has_active_session(&self, user_id: &UserId) -> bool {
        state::read(&self.maps).has_active(user_id)
    }

    pub fn active_session_count(&self, user_id: &UserId) -> usize {
        state::read(&self.maps).active_count(user_id)
    }

    pub fn session_count(&self) -> usize {
        state::read(&self.maps).len()
    }

    /// Snapshot of every registered session, ordered by connection.
    pub fn sessions(&self) -> Vec<SessionView> {
        let now = Instant::now();
        let mut views: Vec<SessionView> = state::read(&self.maps)
            .sessions()
            .map(|s| s.view(now))
            .collect();
        views.sort_by_key(|v| v.connection_id);
        views
    }

    /// Verifies that the per-connection and per-user indexes agree.
    pub fn check_consistency(&self) -> bool {
        state::read(&self.maps).is_consistent()
    }

    /// Whether the presence mediator was last told this user is online.
    pub async fn is_online(&self, user_id: &UserId) -> Result<bool, RegistryError> {
        let user_id = user_id.clone();
        self.request(|respond_to| RegistryCommand::IsOnline {
            user_id,
            respond_to,
        })
        .await
    }

    // ------------------------------------------------------------------------
    // Admin
    // ------------------------------------------------------------------------

    /// Closes the session with this identity. `false` if none is registered.
    pub async fn close_session(&self, session_id: &SessionId) -> Result<bool, RegistryError> {
        let session_id = session_id.clone();
        self.request(|respond_to| RegistryCommand::CloseSession {
            session_id,
            respond_to,
        })
        .await
    }

    /// Closes every session of a user, returning how many were closed.
    pub async fn close_user_sessions(&self, user_id: &UserId) -> Result<usize, RegistryError> {
        let user_id = user_id.clone();
        self.request(|respond_to| RegistryCommand::CloseUser {
            user_id,
            respond_to,
        })
        .await
    }

    /// Runs a heartbeat sweep immediately, returning how many sessions were
    /// evicted.
    pub async fn sweep_heartbeats(&self) -> Result<usize, RegistryError> {
        self.request(|respond_to| RegistryCommand::SweepHeartbeats { respond_to })
            .await
    }
}

fn encode(event: &Event) -> Option<Frame> {
    match encode_event(event) {
        Ok(json) => Some(Frame::from(json)),
        Err(e) => {
            warn!(event = event.kind(), error = %e, "Failed to encode event");
            None
        }
    }
}

fn deliver(session: &SessionHandle, frame: &Frame, event: &Event) -> bool {
    match session.try_enqueue(frame.clone()) {
        Ok(()) => true,
        Err(EnqueueError::Full) => {
            warn!(
                session_id = %session.id(),
                event = event.kind(),
                "Outbound queue full, dropping event"
            );
            false
        }
        Err(EnqueueError::Closed) => {
            debug!(session_id = %session.id(), event = event.kind(), "Skipping closed session");
            false
        }
    }
}
