//! Conduit Protocol - Shared types for the provider query orchestrator
//!
//! This crate defines the data model every other conduit crate speaks:
//! - Conversation messages and their content blocks
//! - Tool specifications and the async tool descriptor seam
//! - Provider, backend and tier identifiers
//! - The normalized `ProviderResponse` returned by every query

mod messages;
mod response;
mod tools;
mod types;

pub use messages::*;
pub use response::*;
pub use tools::*;
pub use types::*;
