//! # chatlink-core
//!
//! Core types and abstractions for Chatlink - a per-user chat session
//! manager that pairs accounts by QR code and relays outbound messages.
//!
//! This crate provides:
//! - Session lifecycle and status types
//! - Outbound message primitives and the `MessageSender` seam
//! - Configuration system
//! - Common error types

pub mod config;
pub mod error;
pub mod message;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use message::{Address, MediaItem, MessageSender, OutboundMessage, SendReceipt};
pub use session::{Lifecycle, SessionStatus};
