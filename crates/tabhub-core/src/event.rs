//! Outbound notification catalog.
//!
//! Every message pushed to a client is an [`Event`]: a closed set of kinds,
//! each with its own payload shape. On the wire an event is the envelope
//! `{"type": "...", "payload": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

// ============================================================================
// Event Envelope
// ============================================================================

/// A notification pushed from the hub to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    /// Transport-level liveness probe sent by the write pump.
    Ping,
    /// Reply to a client `ping`.
    Pong,

    // Posts
    PostCreated(PostCreatedPayload),
    PostLiked(PostLikedPayload),
    PostCommented(PostCommentedPayload),
    CommentCountUpdate(StatsPayload),
    UserStatsUpdated(StatsPayload),

    // Follows
    FollowUpdate(FollowUpdatePayload),
    FollowRequest(HeaderNotificationPayload),
    FollowRequestAccepted(FollowAcceptedPayload),

    // Presence
    UserStatusUpdate(UserStatusPayload),

    // Groups
    GroupEventCreated(GroupActivityPayload),
    GroupEventUpdated(GroupActivityPayload),
    GroupEventDeleted(GroupActivityPayload),
    EventResponseUpdated(GroupActivityPayload),
    GroupMessage(GroupMessagePayload),

    // Chat
    PrivateMessage(PrivateMessagePayload),
    MessagesRead(MessagesReadPayload),
    UserTyping(UserTypingPayload),

    /// Header badge refresh. The wire name keeps its historical casing.
    #[serde(rename = "notification_Update")]
    NotificationUpdate(HeaderNotificationPayload),
}

impl Event {
    /// Returns the wire `type` string of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::PostCreated(_) => "post_created",
            Self::PostLiked(_) => "post_liked",
            Self::PostCommented(_) => "post_commented",
            Self::CommentCountUpdate(_) => "comment_count_update",
            Self::UserStatsUpdated(_) => "user_stats_updated",
            Self::FollowUpdate(_) => "follow_update",
            Self::FollowRequest(_) => "follow_request",
            Self::FollowRequestAccepted(_) => "follow_request_accepted",
            Self::UserStatusUpdate(_) => "user_status_update",
            Self::GroupEventCreated(_) => "group_event_created",
            Self::GroupEventUpdated(_) => "group_event_updated",
            Self::GroupEventDeleted(_) => "group_event_deleted",
            Self::EventResponseUpdated(_) => "event_response_updated",
            Self::GroupMessage(_) => "group_message",
            Self::PrivateMessage(_) => "private_message",
            Self::MessagesRead(_) => "messages_read",
            Self::UserTyping(_) => "user_typing",
            Self::NotificationUpdate(_) => "notification_Update",
        }
    }

    /// Creates a presence change notification stamped with the current time.
    pub fn user_status(user_id: UserId, is_online: bool) -> Self {
        Self::UserStatusUpdate(UserStatusPayload {
            user_id,
            is_online,
            timestamp: Utc::now().timestamp(),
        })
    }

    /// Serializes the event into its wire envelope.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCreatedPayload {
    /// Post body as rendered by the post service.
    pub post: serde_json::Value,
    pub user_id: UserId,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostLikedPayload {
    pub post_id: i64,
    pub user_id: UserId,
    pub user_name: String,
    pub is_liked: bool,
    pub likes_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCommentedPayload {
    pub post_id: i64,
    pub comment: serde_json::Value,
    pub user_id: UserId,
    pub user_name: String,
}

/// Counter refresh (followers, following, posts, comments).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsPayload {
    pub user_id: UserId,
    pub stats_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpdatePayload {
    #[serde(rename = "followerID")]
    pub follower_id: UserId,
    #[serde(rename = "followerName")]
    pub follower_name: String,
    pub avatar: String,
    /// "follow" or "unfollow".
    pub action: String,
    /// Unix seconds, sent as a string.
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowAcceptedPayload {
    #[serde(rename = "followingID")]
    pub following_id: UserId,
    #[serde(rename = "followingName")]
    pub following_name: String,
    pub avatar: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderNotificationPayload {
    pub id: i64,
    /// Notification category, e.g. "friendRequest" or "comment".
    #[serde(rename = "type")]
    pub notification_type: String,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_avatar: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusPayload {
    pub user_id: UserId,
    pub is_online: bool,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Group calendar events and RSVP changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupActivityPayload {
    pub group_id: i64,
    pub event_id: i64,
    pub actor_id: UserId,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessageAuthor {
    pub id: UserId,
    pub first_name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMessagePayload {
    pub id: i64,
    #[serde(rename = "Content")]
    pub content: String,
    #[serde(rename = "User")]
    pub user: GroupMessageAuthor,
    #[serde(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "GroupID")]
    pub group_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessagePayload {
    pub message_id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub sender_name: String,
    pub sender_avatar: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReadPayload {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub timestamp: String,
}
