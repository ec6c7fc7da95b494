//! Output layout and work item path derivation.
//!
//! Every path a run touches is derived here from the item's identifier, so
//! the chain, the batch driver and the status reader agree on naming:
//!
//! ```text
//! <predictions_dir>/<identifier>                          source
//! <predictions_dir>/<output_subdir>/<identifier>          result
//! <predictions_dir>/<output_subdir>/<identifier><err>     error log
//! ```

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::config::FixConfig;
use crate::error::LayoutError;

/// Naming rules for one predictions directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    input_dir: PathBuf,
    output_dir: PathBuf,
    error_suffix: String,
}

impl OutputLayout {
    /// Creates a layout rooted at `input_dir`.
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_subdir: &str,
        error_suffix: impl Into<String>,
    ) -> Self {
        let input_dir = input_dir.into();
        let output_dir = input_dir.join(output_subdir);
        Self {
            input_dir,
            output_dir,
            error_suffix: error_suffix.into(),
        }
    }

    /// Creates the layout described by a run configuration.
    pub fn from_config(config: &FixConfig) -> Self {
        Self::new(
            &config.predictions_dir,
            &config.output_subdir,
            &config.error_suffix,
        )
    }

    /// Directory scanned for input files.
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Directory receiving results and error logs.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Creates the output directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `LayoutError::NotADirectory` if the input directory is missing
    /// and `LayoutError::CreateDir` if the output directory cannot be created.
    pub fn prepare(&self) -> Result<(), LayoutError> {
        if !self.input_dir.is_dir() {
            return Err(LayoutError::NotADirectory(self.input_dir.clone()));
        }
        std::fs::create_dir_all(&self.output_dir).map_err(|source| LayoutError::CreateDir {
            path: self.output_dir.clone(),
            source,
        })
    }

    /// Derives the work item for an enumerated file name.
    pub fn work_item(&self, identifier: impl Into<String>) -> WorkItem {
        let identifier = identifier.into();
        let source_path = self.input_dir.join(&identifier);
        let output_path = self.output_dir.join(&identifier);
        let error_path = self
            .output_dir
            .join(format!("{}{}", identifier, self.error_suffix));
        WorkItem {
            identifier,
            source_path,
            output_path,
            error_path,
        }
    }
}

/// One file to be processed. Immutable once derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    /// Base name of the input file, unique within a run.
    pub identifier: String,
    /// Input file.
    pub source_path: PathBuf,
    /// Destination of the final stage's stdout.
    pub output_path: PathBuf,
    /// Destination of the external stages' stderr.
    pub error_path: PathBuf,
}
