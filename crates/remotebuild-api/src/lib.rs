//! HTTP API for remotebuild.
//!
//! Every response uses the same envelope: a status flag, a human-readable
//! message and an optional payload.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
