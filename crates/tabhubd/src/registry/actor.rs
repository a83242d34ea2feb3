//! Registry actor - the only writer of the session maps.
//!
//! The actor receives commands over an mpsc channel and applies them one
//! at a time, so every mutation is totally ordered. It also runs the
//! heartbeat monitor and owns the presence bookkeeping.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Poisoned locks are recovered, never propagated
//! - Channel send failures are logged or ignored, never fatal

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use tabhub_core::{ConnectionId, PresenceMediator, SessionId, UserId};

use super::commands::{HubEvent, RegistryCommand, RegistryError, RemovalReason};
use super::state::{self, RegistryMaps};
use crate::config::{HubConfig, TakeoverPolicy};
use crate::session::{run_session, PumpConfig, Session, SessionHandle};

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor.
///
/// # Ownership
///
/// - `maps`: shared with every [`super::HubHandle`] for reads; written only here
/// - `online`: users the presence mediator was last told are online
///
/// The actor keeps only a weak reference to its own command channel, so it
/// stops once every handle and every session driver is gone.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    command_sender: mpsc::WeakSender<RegistryCommand>,
    maps: Arc<RwLock<RegistryMaps>>,
    online: HashSet<UserId>,
    mediator: Arc<dyn PresenceMediator>,
    event_publisher: broadcast::Sender<HubEvent>,
    config: HubConfig,
}

impl RegistryActor {
    pub(crate) fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        command_sender: mpsc::WeakSender<RegistryCommand>,
        maps: Arc<RwLock<RegistryMaps>>,
        mediator: Arc<dyn PresenceMediator>,
        event_publisher: broadcast::Sender<HubEvent>,
        config: HubConfig,
    ) -> Self {
        Self {
            receiver,
            command_sender,
            maps,
            online: HashSet::new(),
            mediator,
            event_publisher,
            config,
        }
    }

    /// Runs the event loop until shutdown or until the channel closes.
    pub async fn run(mut self) {
        info!(
            takeover = ?self.config.takeover,
            heartbeat_timeout_ms = self.config.heartbeat_timeout_ms,
            "Registry actor starting"
        );

        let period = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(RegistryCommand::Shutdown { respond_to }) => {
                        self.handle_shutdown();
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        self.handle_shutdown();
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    self.handle_sweep();
                }
            }
        }

        info!("Registry actor stopped");
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                session,
                respond_to,
            } => {
                let result = self.handle_register(*session);
                // Ignore send error - caller may have given up
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unregister {
                connection_id,
                reason,
                respond_to,
            } => {
                let removed = self.handle_unregister(connection_id, reason);
                if let Some(tx) = respond_to {
                    let _ = tx.send(removed);
                }
            }
            RegistryCommand::SetActivity {
                connection_id,
                active,
            } => self.handle_set_activity(connection_id, active),
            RegistryCommand::CloseSession {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_close_session(&session_id));
            }
            RegistryCommand::CloseUser {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_close_user(&user_id));
            }
            RegistryCommand::SweepHeartbeats { respond_to } => {
                let _ = respond_to.send(self.handle_sweep());
            }
            RegistryCommand::IsOnline {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.online.contains(&user_id));
            }
            RegistryCommand::Shutdown { respond_to } => {
                // Normally intercepted by `run`
                self.handle_shutdown();
                let _ = respond_to.send(());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Command handlers
    // ------------------------------------------------------------------------

    fn handle_register(&mut self, session: Session) -> Result<(), RegistryError> {
        let (handle, transport, outbound_rx) = session.into_parts();

        if handle.is_closed() {
            return Err(RegistryError::SessionClosed(handle.id().clone()));
        }
        let Some(commands) = self.command_sender.upgrade() else {
            handle.close();
            return Err(RegistryError::ChannelClosed);
        };

        let policy = self.config.takeover;
        let evicted: Vec<SessionHandle> = {
            let mut maps = state::write(&self.maps);
            let victims: Vec<ConnectionId> = maps
                .user_sessions(handle.user_id())
                .iter()
                .filter(|s| match policy {
                    TakeoverPolicy::EvictAll => true,
                    TakeoverPolicy::SameTab => s.tab_id() == handle.tab_id(),
                })
                .map(SessionHandle::connection_id)
                .collect();
            let evicted = victims
                .into_iter()
                .filter_map(|id| maps.remove(id))
                .collect();
            maps.insert(handle.clone());
            evicted
        };

        for victim in &evicted {
            victim.close();
            info!(
                session_id = %victim.id(),
                connection_id = %victim.connection_id(),
                replaced_by = %handle.connection_id(),
                "Session taken over"
            );
            self.publish(HubEvent::SessionRemoved {
                session_id: victim.id().clone(),
                connection_id: victim.connection_id(),
                reason: RemovalReason::Takeover,
            });
        }

        info!(
            session_id = %handle.id(),
            connection_id = %handle.connection_id(),
            "Session registered"
        );
        self.publish(HubEvent::SessionRegistered {
            session_id: handle.id().clone(),
            connection_id: handle.connection_id(),
        });

        tokio::spawn(run_session(
            handle.clone(),
            transport,
            outbound_rx,
            commands,
            self.event_publisher.clone(),
            self.pump_config(),
        ));

        // Presence is judged on the final state, so a takeover that swaps
        // one active session for another is not a transition.
        self.reconcile_presence(handle.user_id());
        Ok(())
    }

    fn handle_unregister(&mut self, connection_id: ConnectionId, reason: RemovalReason) -> bool {
        match self.remove_session(connection_id, reason) {
            Some(session) => {
                self.reconcile_presence(session.user_id());
                true
            }
            None => {
                debug!(%connection_id, %reason, "Unregister for unknown session ignored");
                false
            }
        }
    }

    fn handle_set_activity(&mut self, connection_id: ConnectionId, active: bool) {
        let Some(session) = state::read(&self.maps).get(connection_id).cloned() else {
            debug!(%connection_id, active, "Activity change for unknown session ignored");
            return;
        };

        let was_active = session.set_active(active);
        debug!(
            session_id = %session.id(),
            was_active,
            active,
            "Session activity changed"
        );

        if active {
            // Last writer wins: the tab whose user_active arrived last stays.
            let siblings: Vec<ConnectionId> = state::read(&self.maps)
                .user_sessions(session.user_id())
                .iter()
                .filter(|s| s.connection_id() != connection_id && s.is_active())
                .map(SessionHandle::connection_id)
                .collect();
            for sibling in siblings {
                self.remove_session(sibling, RemovalReason::SiblingActivated);
            }
        }

        self.reconcile_presence(session.user_id());
    }

    fn handle_close_session(&mut self, session_id: &SessionId) -> bool {
        let found = state::read(&self.maps)
            .find(session_id)
            .map(SessionHandle::connection_id);
        match found {
            Some(connection_id) => self.handle_unregister(connection_id, RemovalReason::Explicit),
            None => false,
        }
    }

    fn handle_close_user(&mut self, user_id: &UserId) -> usize {
        let ids: Vec<ConnectionId> = state::read(&self.maps)
            .user_sessions(user_id)
            .iter()
            .map(SessionHandle::connection_id)
            .collect();

        let closed = ids
            .into_iter()
            .filter_map(|id| self.remove_session(id, RemovalReason::Explicit))
            .count();
        self.reconcile_presence(user_id);

        if closed > 0 {
            info!(user_id = %user_id, closed, "Closed user sessions");
        }
        closed
    }

    /// Evicts every session silent for longer than the heartbeat timeout.
    fn handle_sweep(&mut self) -> usize {
        let now = Instant::now();
        let timeout = self.config.heartbeat_timeout();

        let stale: Vec<ConnectionId> = state::read(&self.maps)
            .sessions()
            .filter(|s| s.liveness_age(now) > timeout)
            .map(SessionHandle::connection_id)
            .collect();

        let mut evicted = 0;
        let mut users = HashSet::new();
        for id in stale {
            if let Some(session) = self.remove_session(id, RemovalReason::HeartbeatTimeout) {
                warn!(
                    session_id = %session.id(),
                    silent_ms = session.liveness_age(now).as_millis() as u64,
                    "Heartbeat timeout, session evicted"
                );
                users.insert(session.user_id().clone());
                evicted += 1;
            }
        }

        for user in &users {
            self.reconcile_presence(user);
        }
        if evicted > 0 {
            debug!(evicted, "Heartbeat sweep finished");
        }
        evicted
    }

    fn handle_shutdown(&mut self) {
        let ids: Vec<ConnectionId> = state::read(&self.maps)
            .sessions()
            .map(SessionHandle::connection_id)
            .collect();
        let count = ids.len();

        for id in ids {
            self.remove_session(id, RemovalReason::Shutdown);
        }

        let users: Vec<UserId> = self.online.iter().cloned().collect();
        for user in &users {
            self.reconcile_presence(user);
        }

        info!(sessions_closed = count, "Registry shut down");
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Removes a session from both maps, fires its terminal signal and
    /// publishes the removal. Presence is left to the caller.
    fn remove_session(
        &mut self,
        connection_id: ConnectionId,
        reason: RemovalReason,
    ) -> Option<SessionHandle> {
        let session = state::write(&self.maps).remove(connection_id)?;
        session.close();

        debug!(
            session_id = %session.id(),
            %connection_id,
            %reason,
            "Session removed"
        );
        self.publish(HubEvent::SessionRemoved {
            session_id: session.id().clone(),
            connection_id,
            reason,
        });
        Some(session)
    }

    /// Fires the presence mediator only when the user's online state flips.
    fn reconcile_presence(&mut self, user_id: &UserId) {
        let has_active = state::read(&self.maps).has_active(user_id);
        let was_online = self.online.contains(user_id);

        if has_active == was_online {
            return;
        }

        let result = if has_active {
            self.online.insert(user_id.clone());
            self.mediator.mark_online(user_id)
        } else {
            self.online.remove(user_id);
            self.mediator.mark_offline(user_id)
        };

        if let Err(e) = result {
            warn!(user_id = %user_id, online = has_active, error = %e, "Presence update failed");
        }
        info!(user_id = %user_id, online = has_active, "Presence changed");

        self.publish(HubEvent::PresenceChanged {
            user_id: user_id.clone(),
            online: has_active,
        });
    }

    fn publish(&self, event: HubEvent) {
        // No subscribers is not an error
        let _ = self.event_publisher.send(event);
    }

    fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            ping_interval: self.config.ping_interval(),
            write_timeout: self.config.write_timeout(),
            max_frame_bytes: self.config.max_frame_bytes,
        }
    }
}
