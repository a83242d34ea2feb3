//! Session registry using the actor pattern.
//!
//! The registry is the source of truth for which sessions exist. It keeps
//! two indexes (by connection and by user) behind one read-write lock:
//! the actor is the only writer, while broadcasts and queries read through
//! a [`HubHandle`] without ever waiting on the actor.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐ RegistryCommand ┌─────────────────┐  HubEvent   ┌──────────────┐
//! │ server / pumps  │────────────────▶│  RegistryActor  │────────────▶│ subscribers  │
//! └─────────────────┘     (mpsc)      └─────────────────┘ (broadcast) └──────────────┘
//!                                        │ write   │ mark_online / mark_offline
//!                                        ▼         ▼
//!                                 RwLock<maps>   PresenceMediator
//!                                        ▲ read
//! ┌─────────────────┐                    │
//! │   broadcasters  │────────────────────┘
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use tabhub_core::PresenceMediator;

use crate::config::HubConfig;

mod actor;
mod commands;
mod handle;
mod state;

pub use actor::RegistryActor;
pub use commands::{HubEvent, RegistryCommand, RegistryError, RemovalReason};
pub use handle::HubHandle;

/// Spawns the registry actor (with its heartbeat monitor) and returns a
/// handle for interaction.
///
/// Must be called from within a tokio runtime.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tabhub_core::NoopPresence;
/// use tabhubd::config::HubConfig;
/// use tabhubd::registry::spawn_hub;
///
/// #[tokio::main]
/// async fn main() {
///     let hub = spawn_hub(HubConfig::default(), Arc::new(NoopPresence));
///     assert_eq!(hub.session_count(), 0);
/// }
/// ```
pub fn spawn_hub(config: HubConfig, mediator: Arc<dyn PresenceMediator>) -> HubHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
    let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
    let maps = Arc::new(RwLock::new(state::RegistryMaps::default()));

    debug!(
        command_buffer = config.command_buffer,
        event_buffer = config.event_buffer,
        "Spawning registry actor"
    );

    let actor = RegistryActor::new(
        cmd_rx,
        cmd_tx.downgrade(),
        Arc::clone(&maps),
        mediator,
        event_tx.clone(),
        config.clone(),
    );
    tokio::spawn(actor.run());

    HubHandle::new(cmd_tx, event_tx, maps, config)
}
