//! Protocol message types for client connections.

use serde::{Deserialize, Serialize};

use tabhub_core::{DomainError, DomainResult, SessionId, TabId, UserId};

/// Control frames interpreted by the hub itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFrame {
    /// Client liveness probe; answered with `pong`.
    Ping,
    /// Reply to a server `ping`.
    Pong,
    /// The tab moved to the foreground.
    UserActive,
    /// The tab moved to the background.
    UserAway,
    /// Client is closing the connection.
    Close,
}

impl ControlFrame {
    /// Maps a wire `type` to a control frame, if it is one.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            "user_active" => Some(Self::UserActive),
            "user_away" => Some(Self::UserAway),
            "close" => Some(Self::Close),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::UserActive => "user_active",
            Self::UserAway => "user_away",
            Self::Close => "close",
        }
    }
}

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Handled by the hub.
    Control(ControlFrame),
    /// Anything else, forwarded untouched to business-layer subscribers.
    Passthrough {
        kind: String,
        payload: serde_json::Value,
    },
}

impl InboundFrame {
    /// Returns the wire `type` of the frame.
    pub fn kind(&self) -> &str {
        match self {
            Self::Control(control) => control.as_str(),
            Self::Passthrough { kind, .. } => kind,
        }
    }
}

/// First frame on a raw connection, identifying the already-authenticated
/// caller.
///
/// ```json
/// {"type": "hello", "user_id": "42", "tab_id": "7f3a"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloFrame {
    pub user_id: UserId,
    /// Optional; a fallback is generated when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
}

impl HelloFrame {
    pub fn new(user_id: impl Into<UserId>, tab_id: Option<TabId>) -> Self {
        Self {
            user_id: user_id.into(),
            tab_id,
        }
    }

    /// Validates identifiers and resolves the tab ID.
    ///
    /// `:` is reserved as the session ID separator.
    pub fn into_session_id(self, connection_number: u64) -> DomainResult<SessionId> {
        if self.user_id.as_str().is_empty() {
            return Err(DomainError::EmptyIdentifier { field: "user_id" });
        }
        if self.user_id.as_str().contains(':') {
            return Err(DomainError::InvalidFieldValue {
                field: "user_id".to_string(),
                value: self.user_id.to_string(),
                expected: "no ':' separator".to_string(),
            });
        }

        let tab_id = match self.tab_id {
            Some(tab) if tab.as_str().is_empty() => TabId::fallback(connection_number),
            Some(tab) if tab.as_str().contains(':') => {
                return Err(DomainError::InvalidFieldValue {
                    field: "tab_id".to_string(),
                    value: tab.to_string(),
                    expected: "no ':' separator".to_string(),
                });
            }
            Some(tab) => tab,
            None => TabId::fallback(connection_number),
        };

        Ok(SessionId {
            user_id: self.user_id,
            tab_id,
        })
    }
}

/// Reply to a [`HelloFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeReply {
    /// Connection accepted and handed to the hub.
    Connected { session_id: String },
    /// Connection refused before reaching the hub.
    Rejected { reason: String },
}

impl HandshakeReply {
    pub fn connected(session_id: &SessionId) -> Self {
        Self::Connected {
            session_id: session_id.to_string(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}
