//! The asynchronous request pool and its ordered-results contract.
//!
//! [`AsyncPipeline`] owns a fixed number of request slots. Frames are
//! submitted under strictly increasing correlation ids, served concurrently,
//! post-processed by a [`PostProcess`] transform and buffered until the
//! consumer collects them by id.

mod completed;
mod core_trait;
mod dispatcher;
mod slot;

pub use completed::Completed;
pub use core_trait::*;
pub use dispatcher::AsyncPipeline;
pub use slot::SlotState;
