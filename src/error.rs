//! Error types for depfix operations.
//!
//! Defines error types for the major subsystems:
//! - Output layout and path derivation
//! - Stage chain execution (spawning and piping external transforms)
//! - Whole-batch runs
//!
//! Configuration errors live next to the configuration in
//! [`crate::pipeline::config`].

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::config::ConfigError;
use crate::scheduler::PoolError;

/// Errors that can occur while deriving or preparing the output layout.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Predictions directory '{0}' does not exist or is not a directory")]
    NotADirectory(PathBuf),

    #[error("Failed to create output directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while executing a single stage chain.
///
/// These never cross the work item boundary: the chain converts them into a
/// failed outcome and appends their text to the item's error log.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Failed to launch stage '{stage}' ({program}): {source}")]
    Spawn {
        stage: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage '{stage}' exited with status {code}")]
    NonZeroExit { stage: String, code: i32 },

    #[error("Stage '{stage}' was terminated by a signal")]
    Terminated { stage: String },

    #[error("Failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Projection of '{path}' failed: {source}")]
    Projection {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage '{stage}' pipe setup failed: {reason}")]
    Pipe { stage: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    /// Name of the stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            StageError::Spawn { stage, .. }
            | StageError::NonZeroExit { stage, .. }
            | StageError::Terminated { stage }
            | StageError::Pipe { stage, .. } => Some(stage),
            StageError::Projection { .. } => Some(crate::pipeline::stage::PROJECT_STAGE),
            StageError::Open { .. } | StageError::Io(_) => None,
        }
    }

    /// Exit code of the failing process, when it exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StageError::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Errors at the level of a whole batch run.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Scheduler error: {0}")]
    Pool(#[from] PoolError),

    #[error("Failed to list '{path}': {source}")]
    Enumerate {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("{failed} of {total} files failed post-processing")]
    ItemsFailed { failed: usize, total: usize },
}
