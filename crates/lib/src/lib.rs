//! rebundle-lib: Core types and logic for Rebundle
//!
//! This crate provides the bundle reconciliation engine:
//! - `Bundle`: a declarative configuration snapshot — one entity list per
//!   kind plus mapping metadata
//! - `EntityRegistry`: data-driven identity rules per entity kind
//! - merge: overwrite-merge of two bundles by entity identity
//! - delta: minimal added/changed/removed computation between snapshots
//! - mappings: deletion-instruction lifecycle (cleanup and reset)
//! - dedup: duplicate removal within a single bundle
//!
//! The engine is synchronous and side-effect free: every operation is a
//! transform over in-memory bundles. Loading bundles from disk, talking to a
//! remote gateway, and applying the resulting instructions are the caller's
//! concern.

pub mod bundle;
pub mod dedup;
pub mod delta;
pub mod error;
pub mod identity;
pub mod mappings;
pub mod merge;
pub mod registry;
