//! tabhub core - shared types for the connection hub
//!
//! This crate provides the domain types shared between the wire protocol
//! (`tabhub-protocol`) and the daemon (`tabhubd`): identifiers, the outbound
//! event catalog and the presence mediator boundary.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod event;
pub mod ids;
pub mod presence;
pub mod session;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use event::{
    Event, FollowAcceptedPayload, FollowUpdatePayload, GroupActivityPayload, GroupMessageAuthor,
    GroupMessagePayload, HeaderNotificationPayload, MessagesReadPayload, PostCommentedPayload,
    PostCreatedPayload, PostLikedPayload, PrivateMessagePayload, StatsPayload, UserStatusPayload,
    UserTypingPayload,
};
pub use ids::{ConnectionId, SessionId, TabId, UserId};
pub use presence::{NoopPresence, PresenceError, PresenceMediator};
pub use session::SessionView;
