//! Shipyard deploy API models
//!
//! Wire types shared by the orchestrator's HTTP server and its callers.

pub mod models;

pub use models::*;
