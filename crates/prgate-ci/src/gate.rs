//! Job verdict evaluation.

use prgate_core::PipelineError;
use serde::{Deserialize, Serialize};

use crate::runner::{ToolRunOutcome, ToolStatus};
use crate::tool::ToolKind;

/// Final pass/fail decision of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobVerdict {
    /// Whether the job passed.
    pub passed: bool,

    /// Rendered violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Pass/fail rules.
pub struct JobGate;

impl JobGate {
    /// Typed violations for `outcomes`.
    ///
    /// - A fatal tool that exited non-zero or errored is a
    ///   `ToolExecutionFailure`, or a `MigrationCheckFailure` for a
    ///   migration check.
    /// - Advisory failures and skipped tools never count.
    /// - Tools aborted by the job deadline are collected into one
    ///   `JobTimeout` when `deadline_secs` is given.
    pub fn violations(
        outcomes: &[ToolRunOutcome],
        deadline_secs: Option<u64>,
    ) -> Vec<PipelineError> {
        let mut violations = Vec::new();

        for outcome in outcomes.iter().filter(|o| o.is_fatal_failure()) {
            let reason = outcome
                .failure_reason()
                .unwrap_or_else(|| "failed".to_string());
            let error = match outcome.kind {
                ToolKind::MigrationCheck => PipelineError::MigrationCheckFailure {
                    tool: outcome.tool_name.clone(),
                    reason,
                },
                ToolKind::Generic | ToolKind::TestRunner => PipelineError::ToolExecutionFailure {
                    tool: outcome.tool_name.clone(),
                    reason,
                },
            };
            violations.push(error);
        }

        if let Some(timeout_secs) = deadline_secs {
            let aborted: Vec<String> = outcomes
                .iter()
                .filter(|o| matches!(o.status, ToolStatus::Aborted))
                .map(|o| o.tool_name.clone())
                .collect();
            violations.push(PipelineError::JobTimeout {
                timeout_secs,
                aborted,
            });
        }

        violations
    }

    /// Evaluate outcomes into a verdict.
    pub fn evaluate(outcomes: &[ToolRunOutcome], deadline_secs: Option<u64>) -> JobVerdict {
        let violations: Vec<String> = Self::violations(outcomes, deadline_secs)
            .iter()
            .map(ToString::to_string)
            .collect();

        let passed = violations.is_empty();
        let message = if passed {
            let ran = outcomes.iter().filter(|o| o.ran()).count();
            format!("All checks passed ({ran} tool(s) ran)")
        } else {
            format!("Job failed with {} violation(s)", violations.len())
        };

        JobVerdict {
            passed,
            violations,
            message,
        }
    }
}
