//! Batch driver: enumerate, admit, wait.
//!
//! Wires the enumerator, the governor and the completion barrier together
//! for one predictions directory. The returned report lists every item; the
//! driver itself succeeds whether or not individual chains failed.

use tracing::{info, warn};

use crate::error::BatchError;
use crate::pipeline::{enumerate, ChainRunner, FixChain, FixConfig, OutputLayout, RunReport};
use crate::scheduler::Governor;

/// Runs the configured fix chain over every input file in the predictions
/// directory.
///
/// # Errors
///
/// Returns `BatchError` if the configuration is invalid, the output
/// directory cannot be created or the predictions directory cannot be
/// listed. Failures of individual chains are not errors; they are recorded
/// in the report and in each item's error log.
pub async fn run_batch(config: &FixConfig) -> Result<RunReport, BatchError> {
    config.validate()?;
    let layout = OutputLayout::from_config(config);
    let identifiers = prepare_inputs(&layout, &config.suffix)?;

    info!(
        dir = %layout.input_dir().display(),
        files = identifiers.len(),
        capacity = config.concurrency,
        fixer = %config.fixer_command,
        quick_fix = %config.quick_fix_command,
        "Starting fix run"
    );

    run_items(
        &layout,
        identifiers,
        config.concurrency,
        FixChain::from_config(config),
    )
    .await
}

/// Creates the output directory and lists the inputs.
///
/// An empty listing is returned as-is; the caller decides whether that is
/// an error.
pub fn prepare_inputs(layout: &OutputLayout, suffix: &str) -> Result<Vec<String>, BatchError> {
    layout.prepare()?;
    let identifiers = enumerate(layout.input_dir(), suffix).map_err(|source| {
        BatchError::Enumerate {
            path: layout.input_dir().to_path_buf(),
            source,
        }
    })?;
    if identifiers.is_empty() {
        warn!(
            dir = %layout.input_dir().display(),
            suffix,
            "No input files matched; nothing to do"
        );
    }
    Ok(identifiers)
}

/// Submits one chain per identifier, in order, and waits for all of them.
pub async fn run_items<R: ChainRunner>(
    layout: &OutputLayout,
    identifiers: Vec<String>,
    capacity: usize,
    runner: R,
) -> Result<RunReport, BatchError> {
    let report = RunReport::begin(capacity);
    let governor = Governor::new(capacity, runner)?;

    for identifier in identifiers {
        governor.submit(layout.work_item(identifier)).await?;
    }

    let (outcomes, stats) = governor.await_all().await;
    let report = report.finish(outcomes, &stats);

    info!(
        run_id = %report.run_id,
        completed = report.completed(),
        failed = report.failed(),
        peak_active = report.peak_active,
        "Fix run finished"
    );
    for failure in report.failures() {
        warn!(
            identifier = %failure.identifier,
            stage = ?failure.failed_stage,
            "Failed item; see its error log"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::WorkItem;
    use crate::scheduler::{ChainOutcome, ChainState};
    use async_trait::async_trait;
    use std::time::Duration;

    struct TouchRunner;

    #[async_trait]
    impl ChainRunner for TouchRunner {
        async fn run(&self, item: &WorkItem) -> ChainOutcome {
            if std::fs::write(&item.error_path, b"").is_err() {
                return ChainOutcome::aborted(&item.identifier, "cannot write log");
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
            ChainOutcome::completed(&item.identifier, Duration::from_millis(2))
        }
    }

    #[tokio::test]
    async fn test_run_items_reports_every_item() {
        let dir = tempfile::tempdir().expect("temp dir");
        for name in ["b.conllu", "a.conllu", "c.conllu"] {
            std::fs::write(dir.path().join(name), b"1\tx\n").expect("write");
        }
        let layout = OutputLayout::new(dir.path(), "connected", ".err");
        let ids = prepare_inputs(&layout, ".conllu").expect("inputs");

        let report = run_items(&layout, ids, 2, TouchRunner).await.expect("run");

        assert_eq!(report.items.len(), 3);
        assert!(report.items.iter().all(|o| o.state == ChainState::Completed));
        assert!(report.peak_active <= 2);
        for name in ["a.conllu", "b.conllu", "c.conllu"] {
            assert!(layout.work_item(name).error_path.exists());
        }
    }

    #[tokio::test]
    async fn test_empty_directory_yields_empty_report() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = FixConfig::default().with_predictions_dir(dir.path());

        let report = run_batch(&config).await.expect("run");

        assert!(report.items.is_empty());
        assert!(report.is_clean());
        assert!(dir.path().join("connected").is_dir());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = FixConfig::default().with_concurrency(0);
        assert!(matches!(
            run_batch(&config).await,
            Err(BatchError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_predictions_dir() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = FixConfig::default().with_predictions_dir(dir.path().join("absent"));
        assert!(matches!(
            run_batch(&config).await,
            Err(BatchError::Layout(_))
        ));
    }
}
