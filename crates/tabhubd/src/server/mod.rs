//! TCP listener feeding authenticated connections into the hub.
//!
//! The server:
//! - Accepts TCP connections until the cancellation token fires
//! - Runs the hello handshake for each one in its own task
//! - Hands the resulting session to the registry
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    HubServer    │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐  register  ┌─────────────────┐
//! │    handshake    │───────────▶│    HubHandle    │
//! │   (per client)  │            └─────────────────┘
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept and handshake errors are logged and allow continued operation

mod handshake;

pub use handshake::HandshakeError;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::HubHandle;

/// Default time a client has to send its hello frame.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts client connections for a hub.
pub struct HubServer {
    listener: TcpListener,
    hub: HubHandle,
    cancel_token: CancellationToken,
    /// Feeds fallback tab IDs and log correlation.
    connection_counter: AtomicU64,
    handshake_timeout: Duration,
}

impl HubServer {
    /// Wraps an already bound listener.
    pub fn new(listener: TcpListener, hub: HubHandle, cancel_token: CancellationToken) -> Self {
        Self {
            listener,
            hub,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Binds `addr` and wraps the listener.
    pub async fn bind(
        addr: &str,
        hub: HubHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_string(),
                error: e.to_string(),
            })?;
        Ok(Self::new(listener, hub, cancel_token))
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Io(e.to_string()))
    }

    /// Accepts connections until the cancellation token is triggered.
    pub async fn run(&self) -> Result<(), ServerError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(addr = %addr, "Hub server listening");
        }

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            debug!(peer = %peer, connection_number = conn_num, "Accepted connection");
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, connection_number: u64) {
        let hub = self.hub.clone();
        let handshake_timeout = self.handshake_timeout;
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel_token.cancelled() => {}
                result = handshake::accept_client(stream, &hub, connection_number, handshake_timeout) => {
                    match result {
                        Ok(session_id) => {
                            debug!(session_id = %session_id, connection_number, "Client handed to hub");
                        }
                        Err(e) => {
                            warn!(connection_number, error = %e, "Handshake failed");
                        }
                    }
                }
            }
        });
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("I/O error: {0}")]
    Io(String),
}
