//! Deployment pipeline: provision, transfer, build and status reconciliation

pub mod fsm;
pub mod image_build;
pub mod liveness;
pub mod orchestrator;
pub mod progress;
pub mod provisioner;
pub mod runner;
pub mod script_build;
pub mod status;
pub mod tracker;
pub mod transfer;
