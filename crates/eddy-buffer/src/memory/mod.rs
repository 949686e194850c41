//! Global memory ledger with blocking admission.
//!
//! Every buffered entry is charged against one shared ceiling. Producers that
//! would exceed it block in [`MemoryAccountant::reserve`] until a flushed batch
//! refunds its bytes, which is what throttles a fast source to the pace of a
//! slow destination.
//!
//! # Pressure Levels
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   MemoryAccountant                       │
//! │                                                          │
//! │  < 70%  Normal                                           │
//! │  70-85% Moderate                                         │
//! │  85-95% High      (drain below the flush threshold)      │
//! │  > 95%  Critical  (producers start blocking)             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use eddy_buffer::memory::MemoryAccountant;
//!
//! let accountant = MemoryAccountant::new(1024);
//! let grant = accountant.try_reserve(512).expect("fits");
//! assert_eq!(accountant.allocated_bytes(), 512);
//! accountant.release(grant);
//! assert_eq!(accountant.allocated_bytes(), 0);
//! ```

mod accountant;
mod stats;

pub use accountant::{MemoryAccountant, Reservation};
pub use stats::{MemoryStats, PressureLevel};
