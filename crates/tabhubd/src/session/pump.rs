//! Read and write pumps for a single session.
//!
//! Both pumps run inside one driver task. Whichever stops first fires the
//! session's terminal signal so the other follows; only after both have
//! exited does the driver ask the registry to unregister the session.

use std::time::Duration;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use tabhub_core::Event;
use tabhub_protocol::{encode_event, parse_frame, ControlFrame, FrameError, InboundFrame};

use super::{EnqueueError, Frame, SessionHandle, Transport};
use crate::registry::{HubEvent, RegistryCommand, RemovalReason};

/// Settings the pumps need from the hub configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PumpConfig {
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub max_frame_bytes: usize,
}

/// Normal ways a pump can stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The client closed its side or sent a `close` frame.
    PeerClosed,
    /// The terminal signal fired (takeover, heartbeat, shutdown, other pump).
    Closed,
    /// The outbound queue was closed.
    QueueClosed,
}

/// Transport failures. Always fatal to the session, never to the hub.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Registry unavailable")]
    RegistryClosed,
}

/// Drives a registered session until both pumps exit, then reports it to
/// the registry for removal.
pub(crate) async fn run_session(
    handle: SessionHandle,
    transport: Box<dyn Transport>,
    outbound_rx: mpsc::Receiver<Frame>,
    commands: mpsc::Sender<RegistryCommand>,
    events: broadcast::Sender<HubEvent>,
    config: PumpConfig,
) {
    let (reader, writer) = tokio::io::split(transport);

    let read = read_pump(
        handle.clone(),
        BufReader::new(reader),
        commands.clone(),
        events,
        config.max_frame_bytes,
    );
    let write = write_pump(
        handle.clone(),
        BufWriter::new(writer),
        outbound_rx,
        config.ping_interval,
        config.write_timeout,
    );

    let (read_result, write_result) = tokio::join!(read, write);
    handle.mark_finished();

    match (&read_result, &write_result) {
        (Err(e), _) | (_, Err(e)) => {
            info!(
                session_id = %handle.id(),
                connection_id = %handle.connection_id(),
                error = %e,
                "Session ended with transport error"
            );
        }
        _ => {
            debug!(
                session_id = %handle.id(),
                connection_id = %handle.connection_id(),
                read = ?read_result,
                write = ?write_result,
                "Session ended"
            );
        }
    }

    // No-op in the registry if the session was already removed.
    let _ = commands
        .send(RegistryCommand::Unregister {
            connection_id: handle.connection_id(),
            reason: RemovalReason::Disconnected,
            respond_to: None,
        })
        .await;
}

// ============================================================================
// Read Pump
// ============================================================================

/// Reads frames until the peer goes away, the frame limit is exceeded, or
/// the terminal signal fires.
pub(crate) async fn read_pump<R>(
    handle: SessionHandle,
    mut reader: R,
    commands: mpsc::Sender<RegistryCommand>,
    events: broadcast::Sender<HubEvent>,
    max_frame_bytes: usize,
) -> Result<PumpExit, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let pong: Frame = match encode_event(&Event::Pong) {
        Ok(json) => Frame::from(json),
        Err(e) => {
            handle.close();
            return Err(SessionError::Io(e.to_string()));
        }
    };

    let mut buf = Vec::new();
    let result = loop {
        buf.clear();

        let read = tokio::select! {
            _ = handle.closed() => break Ok(PumpExit::Closed),
            read = read_frame(&mut reader, &mut buf, max_frame_bytes) => read,
        };

        match read {
            Ok(0) => break Ok(PumpExit::PeerClosed),
            Ok(_) => {}
            Err(e) => break Err(e),
        }

        let Ok(line) = std::str::from_utf8(&buf) else {
            warn!(session_id = %handle.id(), "Ignoring frame with invalid UTF-8");
            continue;
        };

        let frame = match parse_frame(line, max_frame_bytes) {
            Ok(frame) => frame,
            Err(FrameError::TooLarge { size, max }) => {
                break Err(SessionError::FrameTooLarge { size, max })
            }
            Err(e) => {
                warn!(session_id = %handle.id(), error = %e, "Ignoring unreadable frame");
                continue;
            }
        };

        handle.touch();
        trace!(session_id = %handle.id(), frame = frame.kind(), "Received frame");

        match frame {
            InboundFrame::Control(ControlFrame::Ping) => match handle.try_enqueue(pong.clone()) {
                Ok(()) | Err(EnqueueError::Closed) => {}
                Err(EnqueueError::Full) => {
                    warn!(session_id = %handle.id(), "Outbound queue full, dropping pong");
                }
            },
            InboundFrame::Control(ControlFrame::Pong) => {}
            InboundFrame::Control(ControlFrame::UserActive) => {
                if set_activity(&handle, &commands, true).await.is_err() {
                    break Err(SessionError::RegistryClosed);
                }
            }
            InboundFrame::Control(ControlFrame::UserAway) => {
                if set_activity(&handle, &commands, false).await.is_err() {
                    break Err(SessionError::RegistryClosed);
                }
            }
            InboundFrame::Control(ControlFrame::Close) => break Ok(PumpExit::PeerClosed),
            InboundFrame::Passthrough { kind, payload } => {
                // No subscribers is fine; business handling is optional.
                let _ = events.send(HubEvent::ClientMessage {
                    session_id: handle.id().clone(),
                    kind,
                    payload,
                });
            }
        }
    };

    handle.close();
    result
}

async fn set_activity(
    handle: &SessionHandle,
    commands: &mpsc::Sender<RegistryCommand>,
    active: bool,
) -> Result<(), SessionError> {
    commands
        .send(RegistryCommand::SetActivity {
            connection_id: handle.connection_id(),
            active,
        })
        .await
        .map_err(|_| SessionError::RegistryClosed)
}

/// Reads one newline-terminated frame of at most `max` bytes (excluding the
/// line terminator) into `buf`. Returns 0 on EOF.
///
/// Bytes are not decoded here, so invalid UTF-8 is a bad frame rather than
/// a transport error.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> Result<usize, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    // Room for the payload plus "\r\n".
    let limit = max.saturating_add(2) as u64;
    let bytes = (&mut *reader)
        .take(limit)
        .read_until(b'\n', buf)
        .await
        .map_err(|e| SessionError::Io(e.to_string()))?;

    if bytes as u64 == limit && buf.last() != Some(&b'\n') {
        return Err(SessionError::FrameTooLarge { size: bytes, max });
    }
    Ok(bytes)
}

// ============================================================================
// Write Pump
// ============================================================================

/// Drains the outbound queue onto the transport and pings idle clients.
pub(crate) async fn write_pump<W>(
    handle: SessionHandle,
    mut writer: BufWriter<W>,
    mut outbound_rx: mpsc::Receiver<Frame>,
    ping_interval: Duration,
    write_timeout: Duration,
) -> Result<PumpExit, SessionError>
where
    W: AsyncWrite + Unpin,
{
    let ping: Frame = match encode_event(&Event::Ping) {
        Ok(json) => Frame::from(json),
        Err(e) => {
            handle.close();
            return Err(SessionError::Io(e.to_string()));
        }
    };

    let mut ticker = interval_at(Instant::now() + ping_interval, ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut wrote_since_tick = false;
    let mut batch: Vec<Frame> = Vec::new();

    let result = loop {
        tokio::select! {
            biased;

            _ = handle.closed() => break Ok(PumpExit::Closed),

            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    break Ok(PumpExit::QueueClosed);
                };

                batch.clear();
                batch.push(frame);
                while let Ok(next) = outbound_rx.try_recv() {
                    batch.push(next);
                }

                if let Err(e) = write_batch(&mut writer, &batch, write_timeout).await {
                    break Err(e);
                }
                trace!(session_id = %handle.id(), frames = batch.len(), "Wrote batch");
                wrote_since_tick = true;
            }

            _ = ticker.tick() => {
                if !wrote_since_tick {
                    if let Err(e) = write_batch(&mut writer, std::slice::from_ref(&ping), write_timeout).await {
                        break Err(e);
                    }
                    trace!(session_id = %handle.id(), "Sent ping");
                }
                wrote_since_tick = false;
            }
        }
    };

    handle.close();
    outbound_rx.close();
    let _ = timeout(write_timeout, writer.shutdown()).await;
    result
}

/// Writes every frame on its own line with a single flush, bounded by the
/// write deadline.
async fn write_batch<W>(
    writer: &mut BufWriter<W>,
    frames: &[Frame],
    write_timeout: Duration,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        for frame in frames {
            writer.write_all(frame.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await
    };

    match timeout(write_timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Io(e.to_string())),
        Err(_) => Err(SessionError::WriteTimeout),
    }
}
