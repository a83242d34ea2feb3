//! Hello handshake for raw TCP connections.
//!
//! Authentication happens upstream; the first line a client sends names the
//! already-authenticated user and (optionally) the tab:
//!
//! ```text
//! client: {"type":"hello","user_id":"42","tab_id":"7f3a"}
//! server: {"type":"connected","session_id":"42:7f3a"}
//! ```
//!
//! After the reply the stream belongs to the hub. A connection whose hello
//! is missing, late or invalid gets a `rejected` line and is closed.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use tabhub_core::{DomainError, SessionId};
use tabhub_protocol::{parse_hello, FrameError, HandshakeReply};

use crate::registry::{HubHandle, RegistryError};
use crate::session::Session;

#[derive(Debug, Clone, Error)]
pub enum HandshakeError {
    #[error("No hello within {0:?}")]
    Timeout(Duration),

    #[error("Connection closed before hello")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Bad hello: {0}")]
    Frame(#[from] FrameError),

    #[error("Bad identity: {0}")]
    Identity(#[from] DomainError),

    #[error("Registration failed: {0}")]
    Registry(#[from] RegistryError),
}

/// Runs the handshake on `stream` and registers the resulting session.
pub(crate) async fn accept_client(
    stream: TcpStream,
    hub: &HubHandle,
    connection_number: u64,
    handshake_timeout: Duration,
) -> Result<SessionId, HandshakeError> {
    let max = hub.config().max_frame_bytes;
    let mut stream = BufReader::new(stream);

    let session_id = match read_hello(&mut stream, connection_number, handshake_timeout, max).await
    {
        Ok(id) => id,
        Err(e) => {
            let _ = write_reply(&mut stream, &HandshakeReply::rejected(e.to_string())).await;
            return Err(e);
        }
    };

    write_reply(&mut stream, &HandshakeReply::connected(&session_id)).await?;
    debug!(session_id = %session_id, connection_number, "Handshake complete");

    // Any bytes the client pipelined after the hello stay in the buffer and
    // are read by the session's read pump.
    let session = Session::new(session_id.clone(), stream, hub.config().queue_capacity);
    hub.register(session).await?;
    Ok(session_id)
}

async fn read_hello(
    stream: &mut BufReader<TcpStream>,
    connection_number: u64,
    handshake_timeout: Duration,
    max: usize,
) -> Result<SessionId, HandshakeError> {
    let mut line = String::new();
    let limit = max.saturating_add(2) as u64;

    let read = timeout(handshake_timeout, (&mut *stream).take(limit).read_line(&mut line))
        .await
        .map_err(|_| HandshakeError::Timeout(handshake_timeout))?
        .map_err(|e| HandshakeError::Io(e.to_string()))?;

    if read == 0 {
        return Err(HandshakeError::Closed);
    }

    let hello = parse_hello(&line, max)?;
    Ok(hello.into_session_id(connection_number)?)
}

async fn write_reply(
    stream: &mut BufReader<TcpStream>,
    reply: &HandshakeReply,
) -> Result<(), HandshakeError> {
    let mut json =
        serde_json::to_string(reply).map_err(|e| HandshakeError::Io(e.to_string()))?;
    json.push('\n');

    let inner = stream.get_mut();
    inner
        .write_all(json.as_bytes())
        .await
        .map_err(|e| HandshakeError::Io(e.to_string()))?;
    inner
        .flush()
        .await
        .map_err(|e| HandshakeError::Io(e.to_string()))
}
