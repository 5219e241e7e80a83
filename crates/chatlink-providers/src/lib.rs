//! # chatlink-providers
//!
//! Message providers for Chatlink that do not need a paired session.
//!
//! This crate provides:
//! - `RelayProvider`, a retrying client for a hosted relay REST API
//! - `SenderRegistry` for picking a `MessageSender` by id

pub mod error;
pub mod registry;
pub mod relay;

pub use error::RelayError;
pub use registry::SenderRegistry;
pub use relay::{format_phone, RelayCredentials, RelayProvider, RelayTiming};
