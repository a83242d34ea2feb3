//! Client sessions: one physical duplex connection each.
//!
//! A [`Session`] is built from an authenticated stream and handed to the
//! registry, which starts its pumps. Everything else in the system talks to
//! the session through a cheap-to-clone [`SessionHandle`]:
//!
//! ```text
//!   broadcasters ──try_enqueue──▶ outbound queue ──▶ write pump ──▶ transport
//!                                                                     │
//!   registry ◀── SetActivity / Unregister ── read pump ◀──────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Poisoned locks are recovered with `PoisonError::into_inner`

mod pump;

pub(crate) use pump::{run_session, PumpConfig};
pub use pump::{PumpExit, SessionError};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tabhub_core::{ConnectionId, SessionId, SessionView, TabId, UserId};

/// A serialized outbound frame, shared between every queue it is pushed to.
pub type Frame = Arc<str>;

/// Any bidirectional byte stream a session can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The outbound queue is at capacity; the frame was dropped.
    #[error("outbound queue full")]
    Full,
    /// The session is shutting down or already gone.
    #[error("session closed")]
    Closed,
}

// ============================================================================
// Session (unstarted)
// ============================================================================

/// A fully constructed session whose pumps have not started yet.
///
/// Pass it to [`crate::registry::HubHandle::register`]; the registry owns it
/// from then on.
pub struct Session {
    handle: SessionHandle,
    transport: Box<dyn Transport>,
    outbound_rx: mpsc::Receiver<Frame>,
}

impl Session {
    /// Wraps an authenticated stream.
    ///
    /// A zero `queue_capacity` is raised to 1.
    pub fn new<T: Transport>(id: SessionId, transport: T, queue_capacity: usize) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            handle: SessionHandle::new(id, outbound_tx),
            transport: Box::new(transport),
            outbound_rx,
        }
    }

    /// Returns the handle other components use to reach this session.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub(crate) fn into_parts(self) -> (SessionHandle, Box<dyn Transport>, mpsc::Receiver<Frame>) {
        (self.handle, self.transport, self.outbound_rx)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", self.handle.id())
            .field("connection_id", &self.handle.connection_id())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session Handle
// ============================================================================

/// Mutable bookkeeping guarded by the per-session lock.
#[derive(Debug, Clone, Copy)]
struct SessionState {
    is_active: bool,
    last_liveness_at: Instant,
}

#[derive(Debug)]
struct SessionShared {
    id: SessionId,
    connection_id: ConnectionId,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Frame>,
    state: Mutex<SessionState>,
    /// Terminal signal: fired once when the session must stop.
    closing: CancellationToken,
    /// Fired once both pumps have exited.
    finished: CancellationToken,
}

/// Shared reference to a live (or finished) session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl SessionHandle {
    fn new(id: SessionId, outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            inner: Arc::new(SessionShared {
                id,
                connection_id: next_connection_id(),
                connected_at: Utc::now(),
                outbound,
                state: Mutex::new(SessionState {
                    is_active: true,
                    last_liveness_at: Instant::now(),
                }),
                closing: CancellationToken::new(),
                finished: CancellationToken::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.inner.id.user_id
    }

    pub fn tab_id(&self) -> &TabId {
        &self.inner.id.tab_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.inner.connection_id
    }

    /// Whether the tab is in the foreground.
    pub fn is_active(&self) -> bool {
        self.state().is_active
    }

    /// Updates the activity flag, returning the previous value.
    pub(crate) fn set_active(&self, active: bool) -> bool {
        let mut state = self.state();
        std::mem::replace(&mut state.is_active, active)
    }

    /// Records a sign of life from the client.
    pub(crate) fn touch(&self) {
        self.state().last_liveness_at = Instant::now();
    }

    /// Time elapsed since the last sign of life.
    pub fn liveness_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state().last_liveness_at)
    }

    /// Pushes a frame without waiting.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        if self.inner.closing.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        self.inner.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Fires the terminal signal. Both pumps stop and the transport closes.
    ///
    /// Idempotent.
    pub fn close(&self) {
        self.inner.closing.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.is_cancelled()
    }

    /// Resolves once the terminal signal has fired.
    pub async fn closed(&self) {
        self.inner.closing.cancelled().await
    }

    pub(crate) fn mark_finished(&self) {
        self.inner.finished.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.is_cancelled()
    }

    /// Resolves once both pumps have exited.
    pub async fn finished(&self) {
        self.inner.finished.cancelled().await
    }

    /// Builds a read-only snapshot.
    pub fn view(&self, now: Instant) -> SessionView {
        let state = *self.state();
        SessionView {
            id: self.inner.id.clone(),
            connection_id: self.inner.connection_id,
            is_active: state.is_active,
            connected_at: self.inner.connected_at,
            liveness_age_ms: now
                .saturating_duration_since(state.last_liveness_at)
                .as_millis()
                .min(u128::from(u64::MAX)) as u64,
        }
    }
}
