//! prgate - pre-merge pull request validation
//!
//! ## Commands
//!
//! - `run`: Full pipeline (commit check, services, tools, summary)
//! - `check-commit`: Validate the head commit message only
//! - `classify`: Print the change set of a pull request as JSON
//! - `normalize`: Turn one raw tool report into summary fragments
//! - `summarize`: Rebuild the summary from a report directory

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use prgate_ci::{
    normalize, ComposeBackend, JobInput, PipelineConfig, ReportDir, SummaryPublisher, ToolKind,
    ValidationPipeline,
};
use prgate_core::ChangeSet;

#[derive(Parser)]
#[command(name = "prgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pre-merge validation pipeline for pull requests", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full validation pipeline
    Run {
        /// Repository working tree
        #[arg(long, env = "PRGATE_REPO", default_value = ".")]
        repo: PathBuf,

        /// Target branch
        #[arg(long, env = "PRGATE_BASE", default_value = "main")]
        base: String,

        /// Pull request head
        #[arg(long, env = "PRGATE_HEAD", default_value = "HEAD")]
        head: String,

        /// Pull request identifier
        #[arg(long, env = "PRGATE_PR")]
        pr: Option<String>,

        /// Config file (default: <repo>/prgate.toml if present)
        #[arg(long, env = "PRGATE_CONFIG")]
        config: Option<PathBuf>,

        /// Report directory; must be absent or empty
        #[arg(long, env = "PRGATE_REPORT_DIR", default_value = "reports")]
        report_dir: PathBuf,

        /// CI step summary file to append the summary to
        #[arg(long, env = "GITHUB_STEP_SUMMARY")]
        step_summary: Option<PathBuf>,

        /// Print the job report as JSON on stdout
        #[arg(long)]
        json_report: bool,
    },

    /// Validate the head commit message
    CheckCommit {
        #[arg(long, env = "PRGATE_REPO", default_value = ".")]
        repo: PathBuf,

        #[arg(long, env = "PRGATE_HEAD", default_value = "HEAD")]
        head: String,

        #[arg(long, env = "PRGATE_CONFIG")]
        config: Option<PathBuf>,

        /// Maximum line length (default: commit.max_line_length from config)
        #[arg(long)]
        max_line_length: Option<usize>,
    },

    /// Print the change set as JSON
    Classify {
        #[arg(long, env = "PRGATE_REPO", default_value = ".")]
        repo: PathBuf,

        #[arg(long, env = "PRGATE_BASE", default_value = "main")]
        base: String,

        #[arg(long, env = "PRGATE_HEAD", default_value = "HEAD")]
        head: String,

        #[arg(long, env = "PRGATE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Normalize a raw tool report and print its fragment(s)
    Normalize {
        /// Report name used as the fragment title
        #[arg(long)]
        tool: String,

        /// Raw report file
        #[arg(long)]
        input: PathBuf,

        /// Output kind: generic, test-runner, migration-check
        #[arg(long, default_value = "generic")]
        kind: String,
    },

    /// Rebuild the summary from the fragments of a report directory
    Summarize {
        #[arg(long, env = "PRGATE_REPO", default_value = ".")]
        repo: PathBuf,

        #[arg(long, env = "PRGATE_REPORT_DIR", default_value = "reports")]
        report_dir: PathBuf,

        #[arg(long, env = "PRGATE_CONFIG")]
        config: Option<PathBuf>,

        /// Also write summary.md into the report directory
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    prgate_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            repo,
            base,
            head,
            pr,
            config,
            report_dir,
            step_summary,
            json_report,
        } => {
            let mut input = JobInput::new(repo, base, head, report_dir);
            input.pr = pr;
            input.step_summary = step_summary;
            cmd_run(&input, config.as_deref(), json_report).await
        }
        Commands::CheckCommit {
            repo,
            head,
            config,
            max_line_length,
        } => cmd_check_commit(&repo, &head, config.as_deref(), max_line_length),
        Commands::Classify {
            repo,
            base,
            head,
            config,
        } => cmd_classify(&repo, &base, &head, config.as_deref()),
        Commands::Normalize { tool, input, kind } => cmd_normalize(&tool, &input, &kind),
        Commands::Summarize {
            repo,
            report_dir,
            config,
            write,
        } => cmd_summarize(&repo, &report_dir, config.as_deref(), write),
    }
}

/// Run the pipeline and print the results
async fn cmd_run(input: &JobInput, config_path: Option<&Path>, json_report: bool) -> Result<()> {
    let config = PipelineConfig::load_or_default(config_path, &input.repo)
        .context("Failed to load pipeline configuration")?;

    let backend = ComposeBackend::new(
        config.services.compose_file.clone(),
        config.services.project_name.clone(),
    )
    .in_dir(input.repo.clone());
    let pipeline = ValidationPipeline::new(config, Arc::new(backend));

    info!(repo = %input.repo.display(), base = %input.base, head = %input.head, "Starting validation");
    let report = pipeline.run(input).await.context("Validation aborted")?;

    if json_report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Job ID: {}", report.job.job_id);
        println!("Head: {}", report.job.head_sha);
        println!("Status: {}", if report.success { "✓ PASSED" } else { "✗ FAILED" });
        println!("Duration: {}ms", report.duration_ms);
        println!();

        for outcome in &report.outcomes {
            let status = if !outcome.ran() {
                "-"
            } else if outcome.passed() {
                "✓"
            } else {
                "✗"
            };
            let detail = match outcome.failure_reason() {
                Some(reason) => format!(" ({reason})"),
                None if !outcome.ran() => " (skipped)".to_string(),
                None => String::new(),
            };
            println!("  {} {}{}", status, outcome.tool_name, detail);
        }

        println!();
        println!(
            "Summary: {} passed, {} failed, {} skipped",
            report.passed_count(),
            report.failed_count(),
            report.skipped_count()
        );
        println!("Report: {}", report.summary_path.display());

        if !report.verdict.violations.is_empty() {
            println!("Violations:");
            for violation in &report.verdict.violations {
                println!("  - {}", violation);
            }
        }
    }

    if report.success {
        Ok(())
    } else {
        anyhow::bail!("Validation failed")
    }
}

/// Validate the commit message of `head`
fn cmd_check_commit(
    repo: &Path,
    head: &str,
    config_path: Option<&Path>,
    max_line_length: Option<usize>,
) -> Result<()> {
    let max_line_length = match max_line_length {
        Some(limit) => limit,
        None => {
            PipelineConfig::load_or_default(config_path, repo)
                .context("Failed to load pipeline configuration")?
                .commit
                .max_line_length
        }
    };
    let message = prgate_core::commit_message(repo, head)
        .with_context(|| format!("Failed to read commit message of {head}"))?;
    prgate_core::validate_commit_message(&message, max_line_length)?;
    println!("✓ Commit message lines are at most {max_line_length} characters");
    Ok(())
}

/// Print the classified change set
fn cmd_classify(repo: &Path, base: &str, head: &str, config_path: Option<&Path>) -> Result<()> {
    let config = PipelineConfig::load_or_default(config_path, repo)
        .context("Failed to load pipeline configuration")?;
    let files = prgate_core::changed_files(repo, base, head).context("Failed to diff")?;
    let changes = ChangeSet::classify(files, &config.predicates)?;
    println!("{}", serde_json::to_string_pretty(&changes)?);
    Ok(())
}

fn parse_kind(kind: &str) -> Result<ToolKind> {
    match kind {
        "generic" => Ok(ToolKind::Generic),
        "test-runner" | "test_runner" => Ok(ToolKind::TestRunner),
        "migration-check" | "migration_check" => Ok(ToolKind::MigrationCheck),
        other => anyhow::bail!("Unknown report kind: {}", other),
    }
}

/// Print the fragments of one raw report
fn cmd_normalize(tool: &str, input: &Path, kind: &str) -> Result<()> {
    let kind = parse_kind(kind)?;
    let bytes =
        std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    for fragment in normalize(tool, kind, &String::from_utf8_lossy(&bytes)) {
        print!("{}", fragment.body);
    }
    Ok(())
}

/// Rebuild the summary from existing fragments
fn cmd_summarize(
    repo: &Path,
    report_dir: &Path,
    config_path: Option<&Path>,
    write: bool,
) -> Result<()> {
    let config = PipelineConfig::load_or_default(config_path, repo)
        .context("Failed to load pipeline configuration")?;
    let reports = ReportDir::open(report_dir)?;
    let publisher = SummaryPublisher::new(config.summary_order());
    let summary = publisher.compose_from_dir(&reports, &[])?;

    if write {
        let path = publisher
            .publish(&summary, &reports, None)
            .context("Failed to write summary")?;
        info!(path = %path.display(), "Summary written");
    }
    print!("{}", summary.text);
    Ok(())
}
