//! Chain run definitions for the scheduler.
//!
//! This module defines the per-file execution types used by the governor:
//!
//! - `PipelineRun`: the execution instance of one work item's chain
//! - `ChainState`: lifecycle state of a run
//! - `ChainOutcome`: terminal result reported back to the batch driver

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::pipeline::WorkItem;

/// Lifecycle state of a chain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    /// Submitted, waiting for capacity.
    Pending,
    /// Admitted; stage processes are live.
    Running,
    /// Every stage exited with status 0.
    Completed,
    /// A stage could not be launched or exited non-zero.
    Failed,
}

impl ChainState {
    /// Returns whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainState::Completed | ChainState::Failed)
    }
}

impl std::fmt::Display for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainState::Pending => write!(f, "pending"),
            ChainState::Running => write!(f, "running"),
            ChainState::Completed => write!(f, "completed"),
            ChainState::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal result of one chain run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOutcome {
    /// Identifier of the work item.
    pub identifier: String,
    /// Final state, always terminal.
    pub state: ChainState,
    /// Stage blamed for the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    /// Exit code of the failing stage, when it exited normally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Failure description, also written to the item's error log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time from admission to the last stage exiting.
    pub duration_ms: u64,
}

impl ChainOutcome {
    /// Creates a completed outcome.
    pub fn completed(identifier: impl Into<String>, duration: Duration) -> Self {
        Self {
            identifier: identifier.into(),
            state: ChainState::Completed,
            failed_stage: None,
            exit_code: None,
            error: None,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Creates a failed outcome from a stage error.
    pub fn failed(identifier: impl Into<String>, error: &StageError, duration: Duration) -> Self {
        Self {
            identifier: identifier.into(),
            state: ChainState::Failed,
            failed_stage: error.stage().map(str::to_string),
            exit_code: error.exit_code(),
            error: Some(error.to_string()),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Creates a failed outcome for a chain whose task died without reporting.
    pub fn aborted(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            state: ChainState::Failed,
            failed_stage: None,
            exit_code: None,
            error: Some(reason.into()),
            duration_ms: 0,
        }
    }

    /// Returns whether the chain completed successfully.
    pub fn is_success(&self) -> bool {
        self.state == ChainState::Completed
    }
}

/// Execution instance of a work item's chain.
///
/// Owned by the governor task that runs it; nothing else mutates it.
#[derive(Debug)]
pub struct PipelineRun {
    item: WorkItem,
    state: ChainState,
    started_at: Option<Instant>,
}

impl PipelineRun {
    /// Creates a pending run for `item`.
    pub fn new(item: WorkItem) -> Self {
        Self {
            item,
            state: ChainState::Pending,
            started_at: None,
        }
    }

    /// The work item this run executes.
    pub fn item(&self) -> &WorkItem {
        &self.item
    }

    /// Current state.
    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Marks the run as admitted.
    pub fn start(&mut self) {
        debug_assert_eq!(self.state, ChainState::Pending);
        self.state = ChainState::Running;
        self.started_at = Some(Instant::now());
    }

    /// Records the terminal state reported by the chain and stamps the
    /// outcome with the time elapsed since admission.
    pub fn finish(&mut self, mut outcome: ChainOutcome) -> ChainOutcome {
        debug_assert_eq!(self.state, ChainState::Running);
        debug_assert!(outcome.state.is_terminal());
        self.state = outcome.state;
        outcome.duration_ms = self.elapsed().as_millis() as u64;
        outcome
    }

    /// Time since the run was admitted.
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|started| started.elapsed())
            .unwrap_or(Duration::ZERO)
    }
}
