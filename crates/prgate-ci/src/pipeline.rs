//! Pipeline orchestration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use prgate_core::{git, obs, validate_commit_message, ChangeSet, Result};
use serde::Serialize;
use tracing::{info, warn, Instrument};

use crate::artifacts::ReportDir;
use crate::config::PipelineConfig;
use crate::gate::{JobGate, JobVerdict};
use crate::normalize::{normalize, ReportFragment};
use crate::runner::{ToolRunOutcome, ToolRunner};
use crate::services::{ServiceBackend, ServiceOrchestrator};
use crate::spec::JobSpec;
use crate::summary::{Summary, SummaryPublisher};
use crate::tool::ToolDescriptor;

/// What to validate and where to put the reports.
#[derive(Debug, Clone)]
pub struct JobInput {
    /// Repository working tree.
    pub repo: PathBuf,

    /// Target branch ref.
    pub base: String,

    /// Pull request head ref.
    pub head: String,

    pub pr: Option<String>,

    /// Fresh (absent or empty) report directory.
    pub report_dir: PathBuf,

    /// CI step summary file the summary is also appended to.
    pub step_summary: Option<PathBuf>,
}

impl JobInput {
    pub fn new(
        repo: impl Into<PathBuf>,
        base: impl Into<String>,
        head: impl Into<String>,
        report_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repo: repo.into(),
            base: base.into(),
            head: head.into(),
            pr: None,
            report_dir: report_dir.into(),
            step_summary: None,
        }
    }

    pub fn with_pr(mut self, pr: impl Into<String>) -> Self {
        self.pr = Some(pr.into());
        self
    }

    pub fn with_step_summary(mut self, path: impl Into<PathBuf>) -> Self {
        self.step_summary = Some(path.into());
        self
    }
}

/// Result of a job that got as far as publishing its summary.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: JobSpec,

    /// Whether the job passed.
    pub success: bool,

    /// Per-tool outcomes in declared order.
    pub outcomes: Vec<ToolRunOutcome>,

    pub verdict: JobVerdict,

    pub summary: Summary,

    pub summary_path: PathBuf,

    /// Whether the job deadline cut tool execution short.
    pub deadline_exceeded: bool,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl JobReport {
    /// Tools that ran and passed.
    pub fn passed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.ran() && o.passed())
            .count()
    }

    /// Tools that failed, advisory or fatal.
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.failed()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.ran()).count()
    }
}

/// Pre-merge validation pipeline.
pub struct ValidationPipeline {
    config: PipelineConfig,
    backend: Arc<dyn ServiceBackend>,
}

impl ValidationPipeline {
    pub fn new(config: PipelineConfig, backend: Arc<dyn ServiceBackend>) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one job.
    ///
    /// Returns `Err` when the job aborts before any report exists: an
    /// overlong commit message, a service that never became ready, or an
    /// environment problem (git, config, report directory). Every other
    /// outcome, including fatal tool failures and the job deadline, yields a
    /// `JobReport` with a published summary and `success` set accordingly.
    pub async fn run(&self, input: &JobInput) -> Result<JobReport> {
        let registry = self.config.registry()?;
        let job = JobSpec::from_git(
            &input.repo,
            &input.base,
            &input.head,
            input.pr.clone(),
            &registry.names(),
        )?;
        let span = obs::job_span(&job.job_id);
        self.run_job(job, registry.tools(), input)
            .instrument(span)
            .await
    }

    async fn run_job(
        &self,
        job: JobSpec,
        tools: &[ToolDescriptor],
        input: &JobInput,
    ) -> Result<JobReport> {
        let start = Instant::now();
        obs::emit_job_started(&job.job_id, &job.head_sha, job.pr.as_deref());

        let message = git::commit_message(&job.repo, &job.head_sha)?;
        validate_commit_message(&message, self.config.commit.max_line_length)?;

        let files = git::changed_files(&job.repo, &job.merge_base, &job.head_sha)?;
        let changes = ChangeSet::classify(files, &self.config.predicates)?;
        let matched: Vec<&str> = changes
            .predicates()
            .filter(|p| p.matched)
            .map(|p| p.name.as_str())
            .collect();
        obs::emit_change_set_classified(changes.files().len(), &matched);

        let reports = ReportDir::create(&input.report_dir)?;
        reports.write_environment(&job.environment())?;

        let orchestrator = ServiceOrchestrator::new(
            Arc::clone(&self.backend),
            self.config.services.required.clone(),
            // startup never outlives the job deadline
            self.config
                .services
                .startup_timeout()
                .min(self.config.job_timeout()),
            self.config.services.poll_interval(),
        );
        let session = orchestrator.start(&orchestrator.service_names()).await?;

        // nothing between start and stop may return early
        let (outcomes, deadline_exceeded) = self.run_tools(tools, &changes, &reports, input).await;

        if let Err(e) = session.stop().await {
            warn!(error = %e, "service teardown failed");
        }

        let fragments = write_fragments(&reports, &outcomes)?;

        let deadline = deadline_exceeded.then_some(self.config.job_timeout_secs);
        let verdict = JobGate::evaluate(&outcomes, deadline);

        let publisher = SummaryPublisher::new(self.config.summary_order());
        let summary = publisher.compose(&fragments, &verdict.violations);
        let summary_path = publisher.publish(&summary, &reports, input.step_summary.as_deref())?;

        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_job_finished(&job.job_id, duration_ms, verdict.passed);
        info!(message = %verdict.message, "job verdict");

        Ok(JobReport {
            job,
            success: verdict.passed,
            outcomes,
            verdict,
            summary,
            summary_path,
            deadline_exceeded,
            duration_ms,
        })
    }

    /// Run the tool table under the job deadline. Tools still running when
    /// the deadline passes are killed and recorded as aborted.
    async fn run_tools(
        &self,
        tools: &[ToolDescriptor],
        changes: &ChangeSet,
        reports: &ReportDir,
        input: &JobInput,
    ) -> (Vec<ToolRunOutcome>, bool) {
        let runner = ToolRunner::new(reports, &input.repo);
        let mut slots: Vec<Option<ToolRunOutcome>> = vec![None; tools.len()];

        let deadline_exceeded = tokio::time::timeout(
            self.config.job_timeout(),
            runner.run_into(tools, changes, self.config.parallel_tools, &mut slots),
        )
        .await
        .is_err();

        let outcomes = slots
            .into_iter()
            .zip(tools)
            .map(|(slot, tool)| {
                slot.unwrap_or_else(|| {
                    let partial = reports
                        .read_raw(tool.report_name())
                        .ok()
                        .flatten()
                        .unwrap_or_default();
                    ToolRunOutcome::aborted(tool, partial)
                })
            })
            .collect();

        (outcomes, deadline_exceeded)
    }
}

/// Normalize every tool that produced output and write its fragments.
fn write_fragments(
    reports: &ReportDir,
    outcomes: &[ToolRunOutcome],
) -> Result<Vec<ReportFragment>> {
    let mut fragments = Vec::new();
    for outcome in outcomes.iter().filter(|o| o.ran()) {
        for fragment in normalize(&outcome.report_name, outcome.kind, &outcome.output) {
            reports.write_fragment(&fragment)?;
            fragments.push(fragment);
        }
    }
    Ok(fragments)
}
