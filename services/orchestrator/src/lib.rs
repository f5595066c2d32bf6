//! emco orchestrator library.
//!
//! This crate ships the `orchestrator` binary, but the instantiation engine
//! is exposed as a library so it can be driven from integration tests and
//! embedded behind other front ends.
//!
//! The pipeline for one deployment intent group is:
//! render templates, resolve placement, build the context tree, run
//! placement and action controllers, then hand the context to the
//! resource synchronizer.

pub mod builder;
pub mod config;
pub mod error;
pub mod instantiation;
pub mod metadata;
pub mod model;
pub mod placement;
pub mod render;
pub mod resources;
pub mod rpc;
pub mod scheduler;
pub mod state;
pub mod status;

#[cfg(feature = "testkit")]
pub mod testkit;

pub use error::{OrchestratorError, OrchestratorResult};
pub use instantiation::Orchestrator;
