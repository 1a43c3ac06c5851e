//! The job's report directory.
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   environment.txt      key=value job metadata
//!   <tool>-report.txt    raw combined output, one per tool that ran
//!   <name>-report.md     normalized fragment, only when non-empty
//!   summary.md           final concatenated summary
//! ```
//!
//! A `ReportDir` is created once per job and passed explicitly to every stage
//! that writes into it.

use std::path::{Path, PathBuf};

use prgate_core::{PipelineError, Result};

use crate::normalize::ReportFragment;

pub const ENVIRONMENT_FILE: &str = "environment.txt";
pub const SUMMARY_FILE: &str = "summary.md";

const RAW_SUFFIX: &str = "-report.txt";
const FRAGMENT_SUFFIX: &str = "-report.md";

/// Handle on one job's report directory.
#[derive(Debug, Clone)]
pub struct ReportDir {
    root: PathBuf,
}

impl ReportDir {
    /// Create the directory for a new job. An existing non-empty directory is
    /// refused so reports are never mixed across jobs.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.exists() {
            let mut entries = std::fs::read_dir(&root).map_err(|e| {
                PipelineError::ReportDir(format!("cannot read {}: {e}", root.display()))
            })?;
            if entries.next().is_some() {
                return Err(PipelineError::ReportDir(format!(
                    "{} already contains reports",
                    root.display()
                )));
            }
        }
        std::fs::create_dir_all(&root).map_err(|e| {
            PipelineError::ReportDir(format!("cannot create {}: {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    /// Open an existing report directory (e.g. to rebuild its summary).
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(PipelineError::ReportDir(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn raw_report_path(&self, report_name: &str) -> PathBuf {
        self.root.join(format!("{report_name}{RAW_SUFFIX}"))
    }

    pub fn fragment_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{FRAGMENT_SUFFIX}"))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE)
    }

    /// Raw output of a tool, if it ran.
    pub fn read_raw(&self, report_name: &str) -> Result<Option<String>> {
        read_optional(&self.raw_report_path(report_name))
    }

    pub fn write_fragment(&self, fragment: &ReportFragment) -> Result<PathBuf> {
        let path = self.fragment_path(&fragment.name);
        std::fs::write(&path, &fragment.body)?;
        Ok(path)
    }

    pub fn read_fragment(&self, name: &str) -> Result<Option<ReportFragment>> {
        Ok(read_optional(&self.fragment_path(name))?.map(|body| ReportFragment {
            name: name.to_string(),
            body,
        }))
    }

    /// Names of every fragment present, sorted.
    pub fn fragment_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_string_lossy().strip_suffix(FRAGMENT_SUFFIX) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Write `environment.txt` as `key=value` lines.
    pub fn write_environment(&self, entries: &[(String, String)]) -> Result<PathBuf> {
        let mut content = String::new();
        for (key, value) in entries {
            content.push_str(key);
            content.push('=');
            // values stay on one line
            content.push_str(&value.replace('\n', " "));
            content.push('\n');
        }
        let path = self.root.join(ENVIRONMENT_FILE);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Write the summary. A job writes its summary at most once.
    pub fn write_summary(&self, text: &str) -> Result<PathBuf> {
        let path = self.summary_path();
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                PipelineError::ReportDir(format!("cannot write {}: {e}", path.display()))
            })?;
        std::io::Write::write_all(&mut file, text.as_bytes())?;
        Ok(path)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
