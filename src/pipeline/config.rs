//! Configuration for a batch fix run.
//!
//! This module provides the configuration surface of the post-processing
//! pipeline: where the predictions live, how many chains may run at once,
//! which external transforms make up the chain, and how outputs are named.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum number of concurrently running chains.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default suffix of parse-output files picked up by the enumerator.
pub const DEFAULT_SUFFIX: &str = ".conllu";

/// Number of leading CoNLL-U columns handed to the fixer.
pub const DEFAULT_FIELDS: usize = 10;

/// Output subdirectory, named for the fix being applied.
pub const DEFAULT_OUTPUT_SUBDIR: &str = "connected";

/// Suffix appended to the identifier for the per-file error log.
pub const DEFAULT_ERROR_SUFFIX: &str = ".err";

const DEFAULT_PREDICTIONS_DIR: &str = "data/predictions";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value has the wrong shape.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The YAML configuration file could not be parsed.
    #[error("Failed to parse config file '{path}': {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An external program plus its fixed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommandLine {
    /// Program to execute, resolved through `PATH`.
    pub program: String,
    /// Fixed arguments passed on every invocation.
    pub args: Vec<String>,
}

impl CommandLine {
    /// Splits a command string on whitespace into program and arguments.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the string holds no program.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut parts = raw.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| ConfigError::InvalidValue {
            key: "command".to_string(),
            message: "command cannot be empty".to_string(),
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl TryFrom<String> for CommandLine {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CommandLine> for String {
    fn from(value: CommandLine) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Configuration for one batch fix run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FixConfig {
    /// Directory holding the parse-output files.
    pub predictions_dir: PathBuf,
    /// Maximum number of chains running at once.
    pub concurrency: usize,
    /// Only files ending with this suffix are processed.
    pub suffix: String,
    /// Number of leading tab-separated columns kept before the fixer.
    pub fields: usize,
    /// Subdirectory of `predictions_dir` receiving results and error logs.
    pub output_subdir: String,
    /// Suffix appended to the identifier for error logs.
    pub error_suffix: String,
    /// Graph-connectivity fixer.
    pub fixer_command: CommandLine,
    /// Quick-fix filter run on the fixer's output.
    pub quick_fix_command: CommandLine,
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            predictions_dir: PathBuf::from(DEFAULT_PREDICTIONS_DIR),
            concurrency: DEFAULT_CONCURRENCY,
            suffix: DEFAULT_SUFFIX.to_string(),
            fields: DEFAULT_FIELDS,
            output_subdir: DEFAULT_OUTPUT_SUBDIR.to_string(),
            error_suffix: DEFAULT_ERROR_SUFFIX.to_string(),
            fixer_command: CommandLine {
                program: "python3".to_string(),
                args: vec!["scripts/connect_graph.py".to_string()],
            },
            quick_fix_command: CommandLine {
                program: "perl".to_string(),
                args: vec!["tools/conllu-quick-fix.pl".to_string()],
            },
        }
    }
}

impl FixConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a YAML file.
    ///
    /// Keys missing from the file keep their defaults; unknown keys are
    /// rejected. Values are not validated here: environment variables and
    /// flags may still override them, so callers validate the merged result.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        if self.fields == 0 {
            return Err(ConfigError::ValidationFailed(
                "fields must be greater than 0".to_string(),
            ));
        }

        if self.suffix.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "suffix cannot be empty".to_string(),
            ));
        }

        if self.error_suffix.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "error_suffix cannot be empty".to_string(),
            ));
        }

        if self.error_suffix == self.suffix {
            return Err(ConfigError::ValidationFailed(
                "error_suffix must differ from suffix".to_string(),
            ));
        }

        let mut components = Path::new(&self.output_subdir).components();
        let single_normal = matches!(
            (components.next(), components.next()),
            (Some(std::path::Component::Normal(_)), None)
        );
        if !single_normal {
            return Err(ConfigError::ValidationFailed(format!(
                "output_subdir '{}' must be a single directory name",
                self.output_subdir
            )));
        }

        Ok(())
    }

    /// Builder method to set the predictions directory.
    pub fn with_predictions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.predictions_dir = dir.into();
        self
    }

    /// Builder method to set the concurrency capacity.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Builder method to set the output subdirectory.
    pub fn with_output_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.output_subdir = subdir.into();
        self
    }

    /// Builder method to set the fixer command.
    pub fn with_fixer_command(mut self, command: CommandLine) -> Self {
        self.fixer_command = command;
        self
    }

    /// Builder method to set the quick-fix command.
    pub fn with_quick_fix_command(mut self, command: CommandLine) -> Self {
        self.quick_fix_command = command;
        self
    }
}
