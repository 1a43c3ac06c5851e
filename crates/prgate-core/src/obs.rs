//! Structured observability hooks for the job lifecycle.
//!
//! Every event is emitted with an `event` field so log pipelines can filter
//! on it, e.g. `event=tool.finished tool=pytest exit_code=1`.

use tracing::{info, warn};

/// Span tagged with the job id.
///
/// The pipeline is async, so attach it with `tracing::Instrument::instrument`
/// rather than entering it across await points.
pub fn job_span(job_id: &str) -> tracing::Span {
    tracing::info_span!("prgate.job", job_id = %job_id)
}

pub fn emit_job_started(job_id: &str, head_sha: &str, pr: Option<&str>) {
    info!(
        event = "job.started",
        job_id = %job_id,
        head_sha = %head_sha,
        pr = pr.unwrap_or("-"),
    );
}

pub fn emit_change_set_classified(files: usize, predicates_true: &[&str]) {
    info!(
        event = "changes.classified",
        files = files,
        predicates = %predicates_true.join(","),
    );
}

pub fn emit_service_ready(service: &str, waited_ms: u64) {
    info!(event = "service.ready", service = %service, waited_ms = waited_ms);
}

pub fn emit_services_stopped(services: &[String]) {
    info!(event = "service.stopped", services = %services.join(","));
}

pub fn emit_tool_skipped(tool: &str, reason: &str) {
    info!(event = "tool.skipped", tool = %tool, reason = %reason);
}

pub fn emit_tool_finished(tool: &str, exit_code: i32, duration_ms: u64, fatal: bool) {
    info!(
        event = "tool.finished",
        tool = %tool,
        exit_code = exit_code,
        duration_ms = duration_ms,
        fatal = fatal,
    );
}

/// Tool could not be run at all (spawn failure, per-tool timeout).
pub fn emit_tool_errored(tool: &str, error: &dyn std::fmt::Display) {
    warn!(event = "tool.errored", tool = %tool, error = %error);
}

pub fn emit_summary_published(fragments: usize, path: &str) {
    info!(event = "summary.published", fragments = fragments, path = %path);
}

pub fn emit_job_finished(job_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "job.finished",
        job_id = %job_id,
        duration_ms = duration_ms,
        success = success,
    );
}
