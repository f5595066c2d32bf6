//! # emco-id
//!
//! Stable ID types, parsing, and validation for the emco orchestrator.
//!
//! ## ID Format
//!
//! Generated identifiers use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `ctx_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//!
//! A context ID is the only pointer the outside world holds to a persisted
//! instantiation record, so it has to be unique across concurrent requests
//! and parse strictly when it comes back (termination, status, rsync).
//!
//! Nodes inside one context are addressed by [`Handle`]s, plain integers that
//! are only meaningful within the context that issued them.

mod error;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
