//! tabhub protocol - wire format for client connections
//!
//! Frames are newline-delimited JSON objects shaped `{"type": ..., "payload": ...}`.
//! This crate provides the inbound control frames a client may send, the
//! handshake exchanged before a connection reaches the hub, and parsing with
//! size limits.

pub mod message;
pub mod parse;

pub use message::{ControlFrame, HandshakeReply, HelloFrame, InboundFrame};
pub use parse::{encode_event, parse_frame, parse_hello, FrameError, DEFAULT_MAX_FRAME_BYTES};
