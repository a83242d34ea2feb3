//! Type-safe identifiers for users, tabs and connections.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// User / Tab Identifiers
// ============================================================================

/// Identifier of an authenticated user.
///
/// Supplied by the upgrade layer after authentication; the hub never
/// validates its format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a new UserId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of one browser/app tab belonging to a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    /// Creates a new TabId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fallback tab ID for clients that did not announce one.
    pub fn fallback(connection_number: u64) -> Self {
        Self(format!("tab-{connection_number}"))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TabId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// Session Identifiers
// ============================================================================

/// Logical session identity: one user in one tab.
///
/// Displayed as `user:tab`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    pub user_id: UserId,
    pub tab_id: TabId,
}

impl SessionId {
    pub fn new(user_id: impl Into<UserId>, tab_id: impl Into<TabId>) -> Self {
        Self {
            user_id: user_id.into(),
            tab_id: tab_id.into(),
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.tab_id)
    }
}

/// Identifier of one physical connection.
///
/// Two connections that reuse the same [`SessionId`] (a tab reconnecting)
/// still get distinct connection IDs, so a late unregister from the old
/// connection can never remove the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
