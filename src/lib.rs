//! depfix: batch graph-fix post-processing for dependency-parse predictions.
//!
//! This library streams every prediction file in a directory through a
//! fixed chain of external transforms, with a bounded number of chains
//! running at once and a barrier that waits for all of them.

// Core modules
pub mod batch;
pub mod cli;
pub mod error;
pub mod pipeline;
pub mod scheduler;

// Re-export commonly used types
pub use batch::run_batch;
pub use error::{BatchError, LayoutError, StageError};
