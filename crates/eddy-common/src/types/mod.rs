//! Core type definitions for Eddy.
//!
//! This module contains the fundamental types shared by the buffer and its
//! collaborators:
//! - Identifier types ([`StreamId`], [`Watermark`])
//! - Checkpoint scoping ([`StateScope`])

mod id;
mod scope;

pub use id::{StreamId, Watermark};
pub use scope::StateScope;
