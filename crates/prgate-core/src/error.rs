//! Error taxonomy for the validation pipeline.

use serde::{Deserialize, Serialize};

/// A commit-message line that exceeds the configured limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongLine {
    /// 1-based line number inside the message.
    pub number: usize,

    /// Length in characters.
    pub length: usize,

    /// The offending line, verbatim.
    pub text: String,
}

impl std::fmt::Display for LongLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {} ({} chars): {}", self.number, self.length, self.text)
    }
}

fn render_long_lines(lines: &[LongLine]) -> String {
    lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(
        "commit message has {} line(s) longer than {limit} characters: {}",
        .lines.len(),
        render_long_lines(.lines)
    )]
    CommitMessageTooLong { limit: usize, lines: Vec<LongLine> },

    #[error("service {service} was not ready after {timeout_secs}s")]
    ServiceStartupTimeout { service: String, timeout_secs: u64 },

    #[error("tool {tool} failed: {reason}")]
    ToolExecutionFailure { tool: String, reason: String },

    #[error("migration check {tool} failed: {reason}")]
    MigrationCheckFailure { tool: String, reason: String },

    #[error("job deadline of {timeout_secs}s exceeded, aborted: {}", .aborted.join(", "))]
    JobTimeout {
        timeout_secs: u64,
        aborted: Vec<String>,
    },

    #[error("git error: {0}")]
    Git(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("report directory error: {0}")]
    ReportDir(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether this error stops the job before any report exists.
    ///
    /// Only commit-message and service-startup failures abort outright; every
    /// other failure still ends with a published summary.
    pub fn aborts_pipeline(&self) -> bool {
        matches!(
            self,
            PipelineError::CommitMessageTooLong { .. } | PipelineError::ServiceStartupTimeout { .. }
        )
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_message_error_lists_every_line() {
        let err = PipelineError::CommitMessageTooLong {
            limit: 72,
            lines: vec![
                LongLine {
                    number: 1,
                    length: 80,
                    text: "a".repeat(80),
                },
                LongLine {
                    number: 4,
                    length: 73,
                    text: "b".repeat(73),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 line(s)"));
        assert!(msg.contains("line 1 (80 chars)"));
        assert!(msg.contains("line 4 (73 chars)"));
    }

    #[test]
    fn test_abort_classification() {
        let timeout = PipelineError::ServiceStartupTimeout {
            service: "db".to_string(),
            timeout_secs: 30,
        };
        assert!(timeout.aborts_pipeline());

        let tool = PipelineError::ToolExecutionFailure {
            tool: "pytest".to_string(),
            reason: "exited with code 1".to_string(),
        };
        assert!(!tool.aborts_pipeline());
        assert!(tool.to_string().contains("pytest"));
    }

    #[test]
    fn test_job_timeout_names_aborted_tools() {
        let err = PipelineError::JobTimeout {
            timeout_secs: 10,
            aborted: vec!["pytest".to_string(), "bandit".to_string()],
        };
        assert!(err.to_string().contains("pytest, bandit"));
    }
}
