//! Producer and consumer entry points.
//!
//! [`EnqueueGateway`] is the only way records enter the buffer and
//! [`DequeueGateway`] the only way they leave it. Both are cheap to clone and
//! may be shared freely across threads.

mod batch;
mod dequeue;
mod enqueue;

pub use batch::Batch;
pub use dequeue::{DequeueGateway, DrainTrigger};
pub use enqueue::EnqueueGateway;
