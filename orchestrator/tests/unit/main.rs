//! Integration tests for the orchestrator

mod common;
mod test_e2e;
mod test_fsm;
mod test_liveness;
mod test_routes;
mod test_store;
