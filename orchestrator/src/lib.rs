//! Shipyard Library
//!
//! Deployment orchestration for sandbox and VM-image backends: provisioning,
//! artifact transfer, build execution and status reconciliation.

pub mod app;
pub mod backend;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
