//! CLI command definitions for depfix.
//!
//! `fix` runs the bounded-concurrency post-processing batch over a
//! predictions directory; `status` inspects a directory that was already
//! processed.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::batch::run_batch;
use crate::error::BatchError;
use crate::pipeline::{inspect, CommandLine, FixConfig, ItemStatus, OutputLayout};

/// Batch graph-fix post-processing for dependency-parse predictions.
#[derive(Parser)]
#[command(name = "depfix")]
#[command(about = "Apply the graph-connectivity fix chain to a directory of parse predictions")]
#[command(version)]
#[command(
    long_about = "depfix streams every prediction file through a fixed chain of external transforms\n(column projection, graph-connectivity fixer, quick-fix filter), running up to N files at once.\n\nResults and per-file error logs are written to a subdirectory of the predictions directory.\n\nExample usage:\n  depfix fix -d data/predictions --concurrency 8"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the fix chain over every prediction file.
    Fix(FixArgs),

    /// Report which files have clean results, logged errors or no output.
    Status(StatusArgs),
}

/// Options locating a predictions directory and its output layout.
#[derive(clap::Args, Debug)]
pub struct LayoutArgs {
    /// Directory containing the parse-output files.
    #[arg(short = 'd', long, env = "DEPFIX_PREDICTIONS_DIR")]
    pub predictions_dir: Option<PathBuf>,

    /// Only process files ending with this suffix (default: .conllu).
    #[arg(long, env = "DEPFIX_SUFFIX")]
    pub suffix: Option<String>,

    /// Output subdirectory name (default: connected).
    #[arg(long)]
    pub output_subdir: Option<String>,

    /// YAML configuration file; flags and environment variables override it.
    #[arg(long, env = "DEPFIX_CONFIG")]
    pub config: Option<PathBuf>,
}

impl LayoutArgs {
    fn resolve(&self) -> anyhow::Result<FixConfig> {
        let mut config = match &self.config {
            Some(path) => FixConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => FixConfig::default(),
        };
        if let Some(dir) = &self.predictions_dir {
            config.predictions_dir = dir.clone();
        }
        if let Some(suffix) = &self.suffix {
            config.suffix = suffix.clone();
        }
        if let Some(subdir) = &self.output_subdir {
            config.output_subdir = subdir.clone();
        }
        Ok(config)
    }
}

/// Arguments for `depfix fix`.
#[derive(Parser, Debug)]
pub struct FixArgs {
    #[command(flatten)]
    pub layout: LayoutArgs,

    /// Maximum number of files processed at once (default: 8).
    #[arg(short = 'c', long, env = "DEPFIX_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Graph-connectivity fixer: program followed by fixed arguments.
    #[arg(long, env = "DEPFIX_FIXER_COMMAND")]
    pub fixer_command: Option<String>,

    /// Quick-fix filter: program followed by fixed arguments.
    #[arg(long, env = "DEPFIX_QUICK_FIX_COMMAND")]
    pub quick_fix_command: Option<String>,

    /// Number of leading columns kept before the fixer (default: 10).
    #[arg(long)]
    pub fields: Option<usize>,

    /// Write the run report as JSON to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Exit with an error if any file failed.
    #[arg(long)]
    pub fail_on_error: bool,

    /// Print the run report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl FixArgs {
    fn resolve(&self) -> anyhow::Result<FixConfig> {
        let mut config = self.layout.resolve()?;
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(fixer) = &self.fixer_command {
            config.fixer_command =
                CommandLine::parse(fixer).context("Invalid --fixer-command")?;
        }
        if let Some(quick_fix) = &self.quick_fix_command {
            config.quick_fix_command =
                CommandLine::parse(quick_fix).context("Invalid --quick-fix-command")?;
        }
        if let Some(fields) = self.fields {
            config.fields = fields;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Arguments for `depfix status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub layout: LayoutArgs,

    /// Print the status as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Fix(args) => run_fix_command(args).await,
        Commands::Status(args) => run_status_command(args),
    }
}

async fn run_fix_command(args: FixArgs) -> anyhow::Result<()> {
    let config = args.resolve()?;
    let report = run_batch(&config).await?;

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        info!(path = %path.display(), "Wrote run report");
    }

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json);
    } else {
        let layout = OutputLayout::from_config(&config);
        println!("✓ Fix run finished");
        println!("  Output dir: {}", layout.output_dir().display());
        println!(
            "  Files: {} total, {} completed, {} failed",
            report.items.len(),
            report.completed(),
            report.failed()
        );
        println!(
            "  Peak concurrency: {}/{}",
            report.peak_active, report.capacity
        );
        for failure in report.failures() {
            let item = layout.work_item(failure.identifier.as_str());
            println!(
                "    {} [{}] see {}",
                failure.identifier,
                failure.failed_stage.as_deref().unwrap_or("setup"),
                item.error_path.display()
            );
        }
    }

    if args.fail_on_error && !report.is_clean() {
        return Err(BatchError::ItemsFailed {
            failed: report.failed(),
            total: report.items.len(),
        }
        .into());
    }

    Ok(())
}

fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let config = args.layout.resolve()?;
    config.validate()?;
    let layout = OutputLayout::from_config(&config);

    let entries = inspect(&layout, &config.suffix)
        .with_context(|| format!("Failed to list {}", layout.input_dir().display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No input files found.");
        return Ok(());
    }

    for entry in &entries {
        println!("  {:<14} {}", entry.status.to_string(), entry.identifier);
    }
    let count = |status: ItemStatus| entries.iter().filter(|e| e.status == status).count();
    println!();
    println!(
        "{} files: {} clean, {} with errors logged, {} pending, {} missing",
        entries.len(),
        count(ItemStatus::Clean),
        count(ItemStatus::ErrorsLogged),
        count(ItemStatus::Pending),
        count(ItemStatus::Missing)
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_fix_flags() {
        let cli = Cli::try_parse_from([
            "depfix",
            "fix",
            "-d",
            "runs/pred",
            "--concurrency",
            "2",
            "--fixer-command",
            "python3 connect.py",
            "--json",
        ])
        .expect("valid args");

        let Commands::Fix(args) = cli.command else {
            panic!("expected fix command");
        };
        let config = args.resolve().expect("resolve");
        assert_eq!(config.predictions_dir, PathBuf::from("runs/pred"));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.fixer_command.args, vec!["connect.py"]);
        assert_eq!(config.quick_fix_command, FixConfig::default().quick_fix_command);
        assert!(args.json);
        assert!(!args.fail_on_error);
    }

    #[test]
    fn test_fix_rejects_zero_concurrency() {
        let cli = Cli::try_parse_from(["depfix", "fix", "-c", "0"]).expect("parses");
        let Commands::Fix(args) = cli.command else {
            panic!("expected fix command");
        };
        assert!(args.resolve().is_err());
    }

    #[test]
    fn test_cli_parses_status() {
        let cli = Cli::try_parse_from(["depfix", "status", "-d", "x", "--output-subdir", "fixed"])
            .expect("valid args");
        let Commands::Status(args) = cli.command else {
            panic!("expected status command");
        };
        let config = args.layout.resolve().expect("resolve");
        assert_eq!(config.output_subdir, "fixed");
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_zero_concurrency_in_config_file_overridden_by_flag() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(&mut file, b"concurrency: 0\n").expect("write config");
        let path = file.path().to_string_lossy().to_string();

        let cli = Cli::try_parse_from(["depfix", "fix", "--config", &path, "-c", "4"])
            .expect("valid args");
        let Commands::Fix(args) = cli.command else {
            panic!("expected fix command");
        };
        let config = args.resolve().expect("merged config is valid");
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn test_env_overrides_config_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(&mut file, b"fixer_command: \"python3 from_yaml.py\"\n")
            .expect("write config");
        let path = file.path().to_string_lossy().to_string();

        std::env::set_var("DEPFIX_FIXER_COMMAND", "python3 from_env.py");
        let parsed = Cli::try_parse_from(["depfix", "fix", "--config", &path]);
        std::env::remove_var("DEPFIX_FIXER_COMMAND");

        let Commands::Fix(args) = parsed.expect("valid args").command else {
            panic!("expected fix command");
        };
        let config = args.resolve().expect("resolve");
        assert_eq!(config.fixer_command.args, vec!["from_env.py"]);
    }

    #[cfg(unix)]
    fn failing_fix_args(dir: &std::path::Path, extra: &[&str]) -> Vec<String> {
        std::fs::write(dir.join("a.conllu"), "1\tDe\n").expect("write input");
        std::fs::write(dir.join("b.conllu"), "1\thond\n").expect("write input");

        let mut args: Vec<String> = [
            "depfix",
            "fix",
            "-d",
            dir.to_str().expect("utf-8 path"),
            "--fixer-command",
            "false",
            "--quick-fix-command",
            "cat",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend(extra.iter().map(|s| s.to_string()));
        args
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fix_succeeds_despite_item_failures_by_default() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cli = Cli::try_parse_from(failing_fix_args(dir.path(), &[])).expect("valid args");

        run_with_cli(cli).await.expect("run exits cleanly");
        assert!(dir.path().join("connected/a.conllu.err").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fail_on_error_reports_failed_items() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cli = Cli::try_parse_from(failing_fix_args(dir.path(), &["--fail-on-error"]))
            .expect("valid args");

        let err = run_with_cli(cli).await.expect_err("run should fail");
        let batch_err = err.downcast_ref::<BatchError>().expect("batch error");
        assert!(matches!(
            batch_err,
            BatchError::ItemsFailed {
                failed: 2,
                total: 2
            }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_report_file_is_written() {
        let dir = tempfile::tempdir().expect("temp dir");
        let report_path = dir.path().join("report.json");
        let cli = Cli::try_parse_from(failing_fix_args(
            dir.path(),
            &["--report", report_path.to_str().expect("utf-8 path")],
        ))
        .expect("valid args");

        run_with_cli(cli).await.expect("run");

        let raw = std::fs::read_to_string(&report_path).expect("read report");
        let report: crate::pipeline::RunReport = serde_json::from_str(&raw).expect("parse");
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.failed(), 2);
        assert!(report
            .items
            .iter()
            .all(|o| o.failed_stage.as_deref() == Some("fixer") && o.exit_code == Some(1)));
    }

    #[test]
    fn test_config_file_overridden_by_flags() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(&mut file, b"concurrency: 3\nsuffix: .pred\n")
            .expect("write config");
        let path = file.path().to_string_lossy().to_string();

        let cli = Cli::try_parse_from(["depfix", "fix", "--config", &path, "-c", "5"])
            .expect("valid args");
        let Commands::Fix(args) = cli.command else {
            panic!("expected fix command");
        };
        let config = args.resolve().expect("resolve");
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.suffix, ".pred");
    }
}
