//! tabhub daemon - connection registry, session pumps and presence tracking
//!
//! This crate provides the hub infrastructure:
//! - `registry` - registry actor owning the session maps, plus `HubHandle`
//! - `session` - per-connection state and the read/write pumps
//! - `server` - TCP listener with the hello handshake
//! - `presence` - channel-backed presence mediator
//! - `status` - `user_status_update` fan-out on presence changes
//! - `config` - TOML configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        tabhubd                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │    HubServer    │────▶│       RegistryActor         │   │
//! │  │  (TCP + hello)  │     │ (maps writer, heartbeat,    │   │
//! │  └─────────────────┘     │  presence edge detection)   │   │
//! │                          └──────┬───────────────┬──────┘   │
//! │                                 │ spawns        │ events    │
//! │                                 ▼               ▼           │
//! │  ┌─────────────────────────┐  ┌─────────────────────────┐  │
//! │  │ session pumps (per conn)│  │ broadcast::Sender       │  │
//! │  │ read ─▶ registry        │  │ (status fan-out, others)│  │
//! │  │ queue ─▶ write          │  └─────────────────────────┘  │
//! │  └─────────────────────────┘                               │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod presence;
pub mod registry;
pub mod server;
pub mod session;
pub mod status;
