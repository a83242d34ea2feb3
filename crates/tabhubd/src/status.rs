//! Pushes `user_status_update` events to everyone else when a user's
//! presence flips.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tabhub_core::Event;

use crate::registry::{HubEvent, HubHandle};

/// Spawns the fan-out task. It stops on cancellation or when the hub's
/// event channel closes.
pub fn spawn_status_fanout(hub: HubHandle, cancel_token: CancellationToken) -> JoinHandle<()> {
    let mut events = hub.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                result = events.recv() => match result {
                    Ok(HubEvent::PresenceChanged { user_id, online }) => {
                        let event = Event::user_status(user_id.clone(), online);
                        let delivered = hub.broadcast_all_except(&user_id, &event);
                        debug!(user_id = %user_id, online, delivered, "Status update fanned out");
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Status fan-out lagged, skipped events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        debug!("Status fan-out stopped");
    })
}
