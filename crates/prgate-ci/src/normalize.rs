//! Report normalization.
//!
//! Raw tool output is stripped of terminal escape sequences, the test
//! runner's log is split into a narrative part and a coverage summary, and
//! every non-empty piece is wrapped in a collapsible markdown block.
//! Empty output produces no fragment at all, which downstream treats exactly
//! like a skipped tool.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tool::ToolKind;

/// Start of the coverage section in test-runner output.
pub const COVERAGE_MARKER: &str = "---------- coverage:";

/// Last line of the coverage section.
pub const COVERAGE_TERMINATOR: &str = "TOTAL";

/// Fragment name of the coverage summary.
pub const COVERAGE_FRAGMENT: &str = "coverage";

/// Normalized, tool-scoped report text ready for aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportFragment {
    /// Report name (tool name, or `coverage` for the split-off section).
    pub name: String,

    /// Rendered disclosure block.
    pub body: String,
}

fn ansi_regex() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| {
        // CSI sequences, OSC sequences (BEL or ST terminated), two-byte escapes
        Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)|[@-Z\\^_])")
            .expect("ANSI pattern is valid")
    })
}

/// Remove ANSI/terminal escape sequences. Plain text is returned unchanged.
pub fn strip_ansi(text: &str) -> String {
    ansi_regex().replace_all(text, "").into_owned()
}

/// Title-case a tool name: `sign_node` -> `Sign Node`.
pub fn title_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wrap `text` in the uniform disclosure format, or `None` if it is blank.
pub fn fragment(name: &str, text: &str) -> Option<ReportFragment> {
    if text.trim().is_empty() {
        return None;
    }
    let body = format!(
        "<details><summary>{}</summary>\n\n```\n{}\n```\n\n</details>\n\n",
        title_case(name),
        text.trim_end_matches(&['\n', '\r'][..])
    );
    Some(ReportFragment {
        name: name.to_string(),
        body,
    })
}

/// The two disjoint sections of test-runner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunnerSections {
    /// Everything after the first line, up to the coverage marker line.
    pub narrative: String,

    /// From the coverage marker line through the `TOTAL` line, if present.
    pub coverage: Option<String>,
}

/// Split plain test-runner output into narrative log and coverage summary.
///
/// The first line is a duplicate header and is always dropped. Without a
/// coverage marker the whole remainder is narrative. A coverage section with
/// no `TOTAL` line runs to the end of the output.
pub fn split_test_runner_output(plain: &str) -> TestRunnerSections {
    let mut lines = plain.split_inclusive('\n');
    let _header = lines.next();

    let mut narrative = String::new();
    let mut coverage: Option<String> = None;

    for line in lines.by_ref() {
        if line.starts_with(COVERAGE_MARKER) {
            coverage = Some(line.to_string());
            break;
        }
        narrative.push_str(line);
    }

    if let Some(section) = coverage.as_mut() {
        for line in lines {
            section.push_str(line);
            if line.starts_with(COVERAGE_TERMINATOR) {
                break;
            }
        }
    }

    TestRunnerSections {
        narrative,
        coverage,
    }
}

/// Normalize one tool's raw output into zero, one or two fragments.
pub fn normalize(report_name: &str, kind: ToolKind, raw: &str) -> Vec<ReportFragment> {
    let plain = strip_ansi(raw);
    match kind {
        ToolKind::TestRunner => {
            let sections = split_test_runner_output(&plain);
            let mut fragments = Vec::new();
            fragments.extend(fragment(report_name, &sections.narrative));
            if let Some(coverage) = sections.coverage {
                fragments.extend(fragment(COVERAGE_FRAGMENT, &coverage));
            }
            fragments
        }
        ToolKind::Generic | ToolKind::MigrationCheck => {
            fragment(report_name, &plain).into_iter().collect()
        }
    }
}

/// Normalize generic output into at most one fragment.
pub fn normalize_text(report_name: &str, raw: &str) -> Option<ReportFragment> {
    fragment(report_name, &strip_ansi(raw))
}
