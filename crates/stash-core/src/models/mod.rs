//! Data models for the gateway
//!
//! Rows of the metadata store plus the request DTOs that create them.

mod api_key;
mod file;
mod outbox;
mod project;

pub use api_key::*;
pub use file::*;
pub use outbox::*;
pub use project::*;
