//! The per-file stage chain.
//!
//! A chain streams one input file through a fixed sequence of transforms:
//!
//! ```text
//! source ──project──▶ fixer ──▶ quick-fix ──▶ <output_path>
//!                       │           │
//!                       └─stderr────┴────────▶ <error_path>
//! ```
//!
//! Column projection runs in-process and writes into the first external
//! stage's stdin. Every later stage reads the previous stage's stdout through
//! an OS pipe, so nothing between stages is materialized on disk or buffered
//! whole in memory. Only the last stage's stdout reaches the output file.

use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::config::{CommandLine, FixConfig};
use super::layout::WorkItem;
use crate::error::StageError;
use crate::scheduler::ChainOutcome;

/// Name of the in-process column projection stage.
pub const PROJECT_STAGE: &str = "project";
/// Name of the graph-connectivity fixer stage.
pub const FIXER_STAGE: &str = "fixer";
/// Name of the quick-fix filter stage.
pub const QUICK_FIX_STAGE: &str = "quick-fix";

/// Runs the chain for one work item.
///
/// Implementations report every failure through the returned outcome; they
/// must not panic or abort sibling chains.
#[async_trait]
pub trait ChainRunner: Send + Sync + 'static {
    async fn run(&self, item: &WorkItem) -> ChainOutcome;
}

/// One external stage of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    /// Name used in logs and failure reports.
    pub name: String,
    /// Program and fixed arguments.
    pub command: CommandLine,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, command: CommandLine) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }
}

/// The projection → fixer → quick-fix chain.
#[derive(Debug, Clone)]
pub struct FixChain {
    fields: usize,
    stages: Vec<StageSpec>,
}

impl FixChain {
    /// Creates a chain keeping `fields` leading columns and piping through
    /// `stages` in order.
    pub fn new(fields: usize, stages: Vec<StageSpec>) -> Self {
        Self { fields, stages }
    }

    /// Builds the fixer/quick-fix chain described by a run configuration.
    pub fn from_config(config: &FixConfig) -> Self {
        Self::new(
            config.fields,
            vec![
                StageSpec::new(FIXER_STAGE, config.fixer_command.clone()),
                StageSpec::new(QUICK_FIX_STAGE, config.quick_fix_command.clone()),
            ],
        )
    }

    /// External stages in execution order.
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    async fn execute(&self, item: &WorkItem) -> Result<(), StageError> {
        // The error log is opened first so any later failure can be recorded.
        let error_log = open_for_write(&item.error_path)?;
        let source = File::open(&item.source_path)
            .await
            .map_err(|source| StageError::Open {
                path: item.source_path.clone(),
                source,
            })?;
        let output = open_for_write(&item.output_path)?;

        if self.stages.is_empty() {
            let sink = File::from_std(output);
            return project(source, sink, self.fields)
                .await
                .map_err(|source| StageError::Projection {
                    path: item.source_path.clone(),
                    source,
                });
        }

        let mut children = self.spawn_stages(item, &error_log, output).await?;
        drop(error_log);

        let stdin = children[0].stdin.take().ok_or_else(|| StageError::Pipe {
            stage: self.stages[0].name.clone(),
            reason: "stdin was not captured".to_string(),
        })?;

        let (projected, statuses) = tokio::join!(
            project(source, stdin, self.fields),
            futures::future::join_all(children.iter_mut().map(|child| child.wait())),
        );

        let statuses = statuses.into_iter().collect::<Result<Vec<_>, _>>()?;
        if let Some((stage, status)) = blamed_stage(&self.stages, &statuses) {
            return Err(status_error(&stage.name, status));
        }

        projected.map_err(|source| StageError::Projection {
            path: item.source_path.clone(),
            source,
        })
    }

    /// Launches every external stage, wiring each stdout into the next stdin.
    ///
    /// If a stage cannot be launched, the stages already running are killed
    /// and reaped before the error is returned.
    async fn spawn_stages(
        &self,
        item: &WorkItem,
        error_log: &std::fs::File,
        output: std::fs::File,
    ) -> Result<Vec<Child>, StageError> {
        let mut children: Vec<Child> = Vec::with_capacity(self.stages.len());
        let mut output = Some(output);
        let last = self.stages.len() - 1;

        for (idx, stage) in self.stages.iter().enumerate() {
            let spawned = spawn_stage(
                idx,
                stage,
                children.last_mut(),
                error_log,
                if idx == last { output.take() } else { None },
            );

            match spawned {
                Ok(child) => {
                    debug!(
                        identifier = %item.identifier,
                        stage = %stage.name,
                        pid = ?child.id(),
                        "Launched stage"
                    );
                    children.push(child);
                }
                Err(e) => {
                    for mut child in children {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(children)
    }
}

#[async_trait]
impl ChainRunner for FixChain {
    async fn run(&self, item: &WorkItem) -> ChainOutcome {
        let started = Instant::now();

        match self.execute(item).await {
            Ok(()) => ChainOutcome::completed(&item.identifier, started.elapsed()),
            Err(e) => {
                if let Err(log_err) = append_error_log(item, &e).await {
                    warn!(
                        identifier = %item.identifier,
                        error = %log_err,
                        "Failed to record stage failure in error log"
                    );
                }
                ChainOutcome::failed(&item.identifier, &e, started.elapsed())
            }
        }
    }
}

fn spawn_stage(
    idx: usize,
    stage: &StageSpec,
    previous: Option<&mut Child>,
    error_log: &std::fs::File,
    output: Option<std::fs::File>,
) -> Result<Child, StageError> {
    let stdin = match previous {
        None => Stdio::piped(),
        Some(prev) => {
            let stdout = prev.stdout.take().ok_or_else(|| StageError::Pipe {
                stage: stage.name.clone(),
                reason: format!("stdout of stage {} was not captured", idx - 1),
            })?;
            let piped: Stdio = stdout.try_into().map_err(|e: std::io::Error| StageError::Pipe {
                stage: stage.name.clone(),
                reason: e.to_string(),
            })?;
            piped
        }
    };
    let stdout = match output {
        Some(file) => Stdio::from(file),
        None => Stdio::piped(),
    };

    let mut cmd = Command::new(&stage.command.program);
    cmd.args(&stage.command.args)
        .kill_on_drop(true)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::from(error_log.try_clone()?));

    cmd.spawn().map_err(|source| StageError::Spawn {
        stage: stage.name.clone(),
        program: stage.command.program.clone(),
        source,
    })
}

fn open_for_write(path: &std::path::Path) -> Result<std::fs::File, StageError> {
    std::fs::File::create(path).map_err(|source| StageError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Picks the stage a failed chain is attributed to.
///
/// An upstream stage killed by SIGPIPE only died because a later stage
/// stopped reading, so the first failure that is not a broken pipe wins.
/// If every failure is a broken pipe, the most upstream one is reported.
fn blamed_stage<'a>(
    stages: &'a [StageSpec],
    statuses: &[ExitStatus],
) -> Option<(&'a StageSpec, ExitStatus)> {
    let failures: Vec<(&StageSpec, ExitStatus)> = stages
        .iter()
        .zip(statuses.iter().copied())
        .filter(|(_, status)| !status.success())
        .collect();

    failures
        .iter()
        .copied()
        .find(|(_, status)| !killed_by_broken_pipe(*status))
        .or_else(|| failures.first().copied())
}

#[cfg(unix)]
fn killed_by_broken_pipe(status: ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;

    const SIGPIPE: i32 = 13;
    status.signal() == Some(SIGPIPE)
}

#[cfg(not(unix))]
fn killed_by_broken_pipe(_status: ExitStatus) -> bool {
    false
}

fn status_error(stage: &str, status: ExitStatus) -> StageError {
    match status.code() {
        Some(code) => StageError::NonZeroExit {
            stage: stage.to_string(),
            code,
        },
        None => StageError::Terminated {
            stage: stage.to_string(),
        },
    }
}

async fn append_error_log(item: &WorkItem, error: &StageError) -> std::io::Result<()> {
    let mut log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&item.error_path)
        .await?;
    log.write_all(format!("depfix: {}\n", error).as_bytes())
        .await?;
    log.flush().await
}

/// Streams `source` into `sink` line by line, keeping the first `fields`
/// tab-separated columns of each line. `sink` is shut down at the end so the
/// reading stage sees end-of-file.
async fn project<W>(source: File, sink: W, fields: usize) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(source);
    let mut writer = BufWriter::new(sink);
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let (kept, newline) = project_line(&line, fields);
        writer.write_all(kept).await?;
        if newline {
            writer.write_all(b"\n").await?;
        }
    }

    writer.shutdown().await
}

/// Splits `line` into the part kept by a `fields`-column projection and
/// whether a trailing newline must be re-emitted.
///
/// Lines with fewer tabs than `fields` (comments, sentence breaks, short
/// rows) pass through whole.
pub(crate) fn project_line(line: &[u8], fields: usize) -> (&[u8], bool) {
    let cut = line
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'\t')
        .nth(fields.saturating_sub(1))
        .map(|(pos, _)| pos);

    match cut {
        Some(pos) => (&line[..pos], line.ends_with(b"\n")),
        None => (line, false),
    }
}
