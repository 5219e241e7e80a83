//! # chatlink-session
//!
//! Per-user chat session lifecycle management for Chatlink.
//!
//! This crate provides:
//! - `SessionManager`: initialize, status, unlink and shutdown, with
//!   request coalescing and generation-guarded timers
//! - The QR pairing and reconnect state machine
//! - File-backed credential storage
//! - Idle reaping of orphaned sessions
//! - Paced text and media dispatch over a connected session
//!
//! The chat protocol itself is supplied through the `SocketFactory` and
//! `ProtocolSocket` traits.

pub mod auth_store;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod inflight;
pub mod policy;
pub mod qr;
pub mod reaper;
pub mod registry;
pub mod socket;
pub mod timers;

pub use auth_store::{AuthStore, CredentialState, FileAuthStore};
pub use controller::{SessionConfig, SessionManager};
pub use dispatcher::MessageDispatcher;
pub use error::{AuthStoreError, SessionError, SocketError};
pub use inflight::InFlightTracker;
pub use policy::{ReconnectDecision, ReconnectPolicy};
pub use qr::{QrRenderer, RawPayloadRenderer};
pub use reaper::IdleReaper;
pub use registry::{SessionRegistry, SessionState};
pub use socket::{
    DisconnectReason, OpenedSocket, ProtocolSocket, SocketEvent, SocketFactory, SocketOptions,
};
pub use timers::{TimerId, TimerKind, TimerSet};
