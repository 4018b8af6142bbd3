//! Bundle data model and wire codec.
//!
//! A bundle is a full or partial configuration snapshot: one ordered entity
//! list per entity kind, plus an optional properties block carrying metadata
//! and per-kind mapping instructions for the downstream apply step.

mod types;

pub use types::*;
