//! Per-file post-processing of parse predictions.
//!
//! This module provides everything that concerns a single predictions
//! directory and the files in it.
//!
//! # Architecture
//!
//! - **Config**: configuration surface of a run (`FixConfig`)
//! - **Layout**: derivation of every source, result and error-log path
//!   from a file's identifier (`OutputLayout`, `WorkItem`)
//! - **Enumerator**: deterministic, locale-independent listing of inputs
//! - **Stage**: the streaming projection → fixer → quick-fix chain
//! - **Report**: run summaries and the on-disk status reader
//!
//! # Output Layout
//!
//! ```text
//! data/predictions/
//! ├── nl_alpino-dev.conllu
//! ├── nl_lassysmall-dev.conllu
//! └── connected/
//!     ├── nl_alpino-dev.conllu
//!     ├── nl_alpino-dev.conllu.err
//!     ├── nl_lassysmall-dev.conllu
//!     └── nl_lassysmall-dev.conllu.err
//! ```
//!
//! # Configuration
//!
//! ```rust,ignore
//! // Via builder pattern
//! let config = FixConfig::new()
//!     .with_predictions_dir("data/predictions")
//!     .with_concurrency(4);
//!
//! // Via YAML file
//! let config = FixConfig::from_yaml_file(Path::new("depfix.yaml"))?;
//! ```

pub mod config;
pub mod enumerator;
pub mod layout;
pub mod report;
pub mod stage;

// Re-export main types for convenience
pub use config::{CommandLine, ConfigError, FixConfig};
pub use enumerator::enumerate;
pub use layout::{OutputLayout, WorkItem};
pub use report::{inspect, ItemStatus, RunReport, StatusEntry};
pub use stage::{ChainRunner, FixChain, StageSpec};
