//! Change-set classification.
//!
//! A [`ChangeSet`] is computed once from the pull request diff and then only
//! read. Every named predicate carries both its boolean and the literal list
//! of matching paths, so a tool gated on a broad predicate can still be handed
//! a narrower file list.

use std::collections::BTreeMap;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Git change status of one path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    TypeChanged,
    Other,
}

impl ChangeStatus {
    /// Map a `git diff --name-status` code (`M`, `A`, `R100`, ...) to a status.
    pub fn from_code(code: &str) -> Self {
        match code.chars().next() {
            Some('A') => ChangeStatus::Added,
            Some('M') => ChangeStatus::Modified,
            Some('D') => ChangeStatus::Deleted,
            Some('R') => ChangeStatus::Renamed,
            Some('C') => ChangeStatus::Copied,
            Some('T') => ChangeStatus::TypeChanged,
            _ => ChangeStatus::Other,
        }
    }

    pub fn is_added_or_modified(&self) -> bool {
        matches!(self, ChangeStatus::Added | ChangeStatus::Modified)
    }
}

/// One changed, repository-relative path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub status: ChangeStatus,
}

impl ChangedFile {
    pub fn new(path: impl Into<String>, status: ChangeStatus) -> Self {
        Self {
            path: path.into(),
            status,
        }
    }
}

/// Declarative definition of a predicate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PredicateSpec {
    /// Predicate name referenced by tool gates.
    pub name: String,

    /// Glob set; a path matches when any glob matches.
    pub globs: Vec<String>,

    /// Only count added or modified paths (renames and deletions never match).
    #[serde(default)]
    pub added_or_modified_only: bool,
}

impl PredicateSpec {
    pub fn new(name: impl Into<String>, globs: &[&str]) -> Self {
        Self {
            name: name.into(),
            globs: globs.iter().map(|g| (*g).to_string()).collect(),
            added_or_modified_only: false,
        }
    }

    /// Restrict the predicate to added-or-modified paths.
    pub fn added_or_modified(mut self) -> Self {
        self.added_or_modified_only = true;
        self
    }

    /// Evaluate this predicate against a list of changed files.
    pub fn evaluate(&self, files: &[ChangedFile]) -> Result<Predicate> {
        let patterns = self
            .globs
            .iter()
            .map(|g| {
                Pattern::new(g).map_err(|e| {
                    PipelineError::Config(format!(
                        "predicate {}: invalid glob {:?}: {}",
                        self.name, g, e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };

        let matched_files: Vec<String> = files
            .iter()
            .filter(|f| !self.added_or_modified_only || f.status.is_added_or_modified())
            .filter(|f| patterns.iter().any(|p| p.matches_with(&f.path, options)))
            .map(|f| f.path.clone())
            .collect();

        Ok(Predicate {
            name: self.name.clone(),
            matched: !matched_files.is_empty(),
            files: matched_files,
        })
    }
}

/// An evaluated predicate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Predicate {
    pub name: String,

    /// True iff at least one changed path matched.
    pub matched: bool,

    /// Matching paths, in diff order.
    pub files: Vec<String>,
}

/// The classified set of changes in a pull request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeSet {
    files: Vec<ChangedFile>,
    predicates: BTreeMap<String, Predicate>,
}

impl ChangeSet {
    /// Classify `files` under every predicate in `specs`.
    ///
    /// An empty file list is valid and makes every predicate false.
    pub fn classify(files: Vec<ChangedFile>, specs: &[PredicateSpec]) -> Result<Self> {
        let mut predicates = BTreeMap::new();
        for spec in specs {
            let predicate = spec.evaluate(&files)?;
            if predicates.insert(spec.name.clone(), predicate).is_some() {
                return Err(PipelineError::Config(format!(
                    "duplicate predicate name: {}",
                    spec.name
                )));
            }
        }
        Ok(Self { files, predicates })
    }

    pub fn files(&self) -> &[ChangedFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn predicate(&self, name: &str) -> Option<&Predicate> {
        self.predicates.get(name)
    }

    pub fn predicates(&self) -> impl Iterator<Item = &Predicate> {
        self.predicates.values()
    }

    /// Whether the named predicate holds. Unknown names are false.
    pub fn is_true(&self, name: &str) -> bool {
        self.predicate(name).map(|p| p.matched).unwrap_or(false)
    }

    /// Matching paths for the named predicate. Unknown names yield an empty list.
    pub fn files_for(&self, name: &str) -> &[String] {
        self.predicate(name).map(|p| p.files.as_slice()).unwrap_or(&[])
    }
}
