//! HTTP surface of the orchestrator

pub mod auth;
pub mod handlers;
pub mod serve;
pub mod state;
pub mod stream;
