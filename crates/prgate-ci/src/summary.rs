//! Summary aggregation and publishing.

use std::io::Write;
use std::path::{Path, PathBuf};

use prgate_core::{obs, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::artifacts::ReportDir;
use crate::normalize::ReportFragment;

/// Fragment order of the stock workflow.
pub const DEFAULT_SUMMARY_ORDER: [&str; 7] = [
    "pytest",
    "coverage",
    "migrations",
    "pylint",
    "black",
    "isort",
    "bandit",
];

/// Heading of the failure section appended to a failed job's summary.
pub const JOB_STATUS_HEADING: &str = "### Job status";

/// The rendered summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    pub text: String,

    /// Fragment names included, in order.
    pub included: Vec<String>,
}

impl Summary {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Concatenates fragments in a fixed order.
#[derive(Debug, Clone)]
pub struct SummaryPublisher {
    order: Vec<String>,
}

impl Default for SummaryPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_ORDER.iter().map(|s| (*s).to_string()).collect())
    }
}

impl SummaryPublisher {
    pub fn new(order: Vec<String>) -> Self {
        Self { order }
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Render `fragments` in the configured order, followed by a failure
    /// section when `failures` is non-empty.
    ///
    /// Missing fragments are skipped silently. Fragments whose name is not in
    /// the order are left out with a warning.
    pub fn compose(&self, fragments: &[ReportFragment], failures: &[String]) -> Summary {
        for fragment in fragments {
            if !self.order.contains(&fragment.name) {
                warn!(fragment = %fragment.name, "fragment has no place in the summary order");
            }
        }

        let mut text = String::new();
        let mut included = Vec::new();
        for name in &self.order {
            if let Some(fragment) = fragments.iter().find(|f| &f.name == name) {
                text.push_str(&fragment.body);
                included.push(name.clone());
            }
        }

        if !failures.is_empty() {
            text.push_str(JOB_STATUS_HEADING);
            text.push_str("\n\n");
            for failure in failures {
                text.push_str("- ");
                text.push_str(&failure.replace('\n', " "));
                text.push('\n');
            }
        }

        Summary { text, included }
    }

    /// Compose from the fragments already written to `reports`.
    pub fn compose_from_dir(&self, reports: &ReportDir, failures: &[String]) -> Result<Summary> {
        let mut fragments = Vec::new();
        for name in reports.fragment_names()? {
            if let Some(fragment) = reports.read_fragment(&name)? {
                fragments.push(fragment);
            }
        }
        Ok(self.compose(&fragments, failures))
    }

    /// Write `summary.md` and, when given, append to the CI step summary file.
    pub fn publish(
        &self,
        summary: &Summary,
        reports: &ReportDir,
        step_summary: Option<&Path>,
    ) -> Result<PathBuf> {
        let path = reports.write_summary(&summary.text)?;

        if let Some(step_summary) = step_summary {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(step_summary)?;
            file.write_all(summary.text.as_bytes())?;
        }

        obs::emit_summary_published(summary.included.len(), &path.display().to_string());
        Ok(path)
    }
}
