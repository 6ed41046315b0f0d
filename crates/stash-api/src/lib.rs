//! Stash HTTP API
//!
//! The axum surface of the gateway. `setup::initialize_app` wires the Postgres
//! stores, the blob store backend and the services into a router.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod setup;
pub mod state;
pub mod telemetry;

pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
