//! Stowage Common - Shared types and utilities
//!
//! This crate provides the error type, configuration structures, tenancy
//! sentinels and time sources used across all Stowage components.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
