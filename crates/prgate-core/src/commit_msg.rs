//! Commit message line-length validation.
//!
//! Runs before anything else in the job so an over-long message fails fast,
//! without starting services or tools.

use serde::{Deserialize, Serialize};

use crate::error::{LongLine, PipelineError, Result};

/// Default maximum line length for commit messages.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 72;

/// A commit message as an ordered sequence of lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    lines: Vec<String>,
}

impl CommitMessage {
    /// Split raw message text into lines. A trailing newline does not add an
    /// empty line, and `\r\n` endings are accepted.
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// The message lines, in order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Every line longer than `limit` characters, with 1-based line numbers.
    pub fn long_lines(&self, limit: usize) -> Vec<LongLine> {
        self.lines
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| {
                let length = line.chars().count();
                (length > limit).then(|| LongLine {
                    number: idx + 1,
                    length,
                    text: line.clone(),
                })
            })
            .collect()
    }

    /// Fail with `CommitMessageTooLong` if any line exceeds `limit`.
    pub fn validate(&self, limit: usize) -> Result<()> {
        let lines = self.long_lines(limit);
        if lines.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::CommitMessageTooLong { limit, lines })
        }
    }
}

/// Validate raw message text against `limit`.
pub fn validate_commit_message(text: &str, limit: usize) -> Result<()> {
    CommitMessage::parse(text).validate(limit)
}
