//! Read-only session snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConnectionId, SessionId};

/// Snapshot of one registered session, as returned by registry queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub connection_id: ConnectionId,
    /// Whether this tab is in the foreground and counts toward presence.
    pub is_active: bool,
    pub connected_at: DateTime<Utc>,
    /// Milliseconds since the client last showed signs of life.
    pub liveness_age_ms: u64,
}

impl SessionView {
    /// Returns true if the session has been silent for longer than `threshold_ms`.
    #[must_use]
    pub fn is_stale(&self, threshold_ms: u64) -> bool {
        self.liveness_age_ms > threshold_ms
    }
}
