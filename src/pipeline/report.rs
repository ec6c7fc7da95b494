//! Run reports and on-disk status inspection.
//!
//! A batch run reports success uniformly; per-file failures are visible in
//! the error logs and in the [`RunReport`] returned by the driver. The
//! [`inspect`] reader reconstructs the same picture later from disk alone,
//! using the shared [`OutputLayout`] naming.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enumerator::enumerate;
use super::layout::OutputLayout;
use crate::scheduler::{ChainOutcome, ChainState, PoolStats};

/// Summary of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique identifier of the run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the completion barrier released.
    pub finished_at: DateTime<Utc>,
    /// Configured concurrency capacity.
    pub capacity: usize,
    /// Highest number of chains observed running at once.
    pub peak_active: usize,
    /// One entry per enumerated file, in submission order.
    pub items: Vec<ChainOutcome>,
}

impl RunReport {
    /// Starts a report for a run with the given capacity.
    pub fn begin(capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            capacity,
            peak_active: 0,
            items: Vec::new(),
        }
    }

    /// Closes the report with the outcomes drained by the barrier.
    ///
    /// Outcomes arrive in completion order; they are stored sorted by
    /// identifier, which is the enumeration (and submission) order.
    pub fn finish(mut self, mut outcomes: Vec<ChainOutcome>, stats: &PoolStats) -> Self {
        outcomes.sort_by(|a, b| a.identifier.as_bytes().cmp(b.identifier.as_bytes()));
        self.items = outcomes;
        self.peak_active = stats.peak_active;
        self.finished_at = Utc::now();
        self
    }

    /// Number of chains that completed.
    pub fn completed(&self) -> usize {
        self.count(ChainState::Completed)
    }

    /// Number of chains that failed.
    pub fn failed(&self) -> usize {
        self.count(ChainState::Failed)
    }

    /// Returns whether every chain completed.
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    /// Outcomes of the failed chains.
    pub fn failures(&self) -> impl Iterator<Item = &ChainOutcome> {
        self.items.iter().filter(|o| o.state == ChainState::Failed)
    }

    fn count(&self, state: ChainState) -> usize {
        self.items.iter().filter(|o| o.state == state).count()
    }
}

/// What the files on disk say about one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// No result file.
    Missing,
    /// Result file present but no error log; the item was never run by
    /// this tool or the run was interrupted.
    Pending,
    /// The error log is non-empty.
    ErrorsLogged,
    /// Result file present, error log empty.
    Clean,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Missing => write!(f, "missing"),
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::ErrorsLogged => write!(f, "errors_logged"),
            ItemStatus::Clean => write!(f, "clean"),
        }
    }
}

/// Status of one enumerated item as found on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub identifier: String,
    pub status: ItemStatus,
    /// Size of the result file in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_bytes: Option<u64>,
    /// Size of the error log in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_bytes: Option<u64>,
}

/// Classifies every input file of `layout` by inspecting its derived
/// result and error-log paths.
///
/// # Errors
///
/// Returns the underlying `walkdir::Error` if the input directory cannot be
/// listed.
pub fn inspect(layout: &OutputLayout, suffix: &str) -> Result<Vec<StatusEntry>, walkdir::Error> {
    let names = enumerate(layout.input_dir(), suffix)?;
    Ok(names
        .into_iter()
        .map(|identifier| {
            let item = layout.work_item(identifier);
            let output_bytes = file_len(&item.output_path);
            let error_bytes = file_len(&item.error_path);
            let status = match (output_bytes, error_bytes) {
                (None, _) => ItemStatus::Missing,
                (Some(_), None) => ItemStatus::Pending,
                (Some(_), Some(len)) if len > 0 => ItemStatus::ErrorsLogged,
                (Some(_), Some(_)) => ItemStatus::Clean,
            };
            StatusEntry {
                identifier: item.identifier,
                status,
                output_bytes,
                error_bytes,
            }
        })
        .collect())
}

fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}
