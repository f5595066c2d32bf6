//! Wire types for the services the orchestrator calls.
//!
//! Messages are declared by hand with `prost` derives rather than generated
//! from `.proto` files; field tags match the published service definitions.
//!
//! - [`installapp`]: the resource synchronizer's install/uninstall service
//! - [`contextupdate`]: the update hook exposed by placement and action controllers

pub mod contextupdate;
pub mod installapp;
