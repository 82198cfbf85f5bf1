//! Stowage cluster map - health of cluster resources
//!
//! Tracks whether disks, nodes and other resources should be considered
//! available, based on the outcome of recent requests against them.

pub mod policy;

pub use policy::{FixedBackoffResourceStatePolicy, ResourceStatePolicy};
