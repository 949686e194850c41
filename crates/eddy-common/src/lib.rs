//! # eddy-common
//!
//! Foundation layer for Eddy: identifier types, checkpoint scopes, and utilities.
//!
//! This crate provides the fundamental building blocks used by all other
//! Eddy crates. It has no internal dependencies and should be kept minimal.
//!
//! ## Modules
//!
//! - [`types`] - Core type definitions (StreamId, Watermark, StateScope)
//! - [`utils`] - Utility functions and helpers (hashing, errors)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod types;
pub mod utils;

// Re-export commonly used types at crate root
pub use types::{StateScope, StreamId, Watermark};
pub use utils::error::{Error, Result};
