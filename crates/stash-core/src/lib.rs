//! Stash Core Library
//!
//! Domain models, error types, configuration and constants shared by every
//! stash crate.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;

pub use config::{Config, StashConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::StorageBackend;
