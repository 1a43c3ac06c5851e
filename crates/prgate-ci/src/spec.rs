//! Job identity.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use prgate_core::{git, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identity and inputs of one validation job.
///
/// Written to `environment.txt` so a report directory can be traced back to
/// the exact commits and tool table that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSpec {
    pub job_id: String,

    /// Pull request identifier, when known.
    pub pr: Option<String>,

    pub repo: PathBuf,

    /// Target branch ref as given.
    pub base: String,

    /// Resolved head commit.
    pub head_sha: String,

    /// Merge-base of base and head; the diff origin.
    pub merge_base: String,

    /// SHA-256 digest of ordered tool names (deterministic).
    pub tools_digest: String,

    pub started_at: DateTime<Utc>,
}

impl JobSpec {
    pub fn new(
        repo: PathBuf,
        pr: Option<String>,
        base: String,
        head_sha: String,
        merge_base: String,
        tools: &[String],
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            pr,
            repo,
            base,
            head_sha,
            merge_base,
            tools_digest: compute_tools_digest(tools),
            started_at: Utc::now(),
        }
    }

    /// Resolve `head` and the merge-base against `base` in `repo`.
    pub fn from_git(
        repo: &Path,
        base: &str,
        head: &str,
        pr: Option<String>,
        tools: &[String],
    ) -> Result<Self> {
        let head_sha = git::rev_parse(repo, head)?;
        let merge_base = git::merge_base(repo, base, &head_sha)?;
        Ok(Self::new(
            repo.to_path_buf(),
            pr,
            base.to_string(),
            head_sha,
            merge_base,
            tools,
        ))
    }

    /// `environment.txt` entries.
    pub fn environment(&self) -> Vec<(String, String)> {
        vec![
            ("job_id".to_string(), self.job_id.clone()),
            (
                "pr".to_string(),
                self.pr.clone().unwrap_or_else(|| "-".to_string()),
            ),
            ("repo".to_string(), self.repo.display().to_string()),
            ("base".to_string(), self.base.clone()),
            ("head_sha".to_string(), self.head_sha.clone()),
            ("merge_base".to_string(), self.merge_base.clone()),
            ("tools_digest".to_string(), self.tools_digest.clone()),
            ("started_at".to_string(), self.started_at.to_rfc3339()),
            ("prgate_version".to_string(), prgate_core::VERSION.to_string()),
        ]
    }
}

/// Compute deterministic digest of ordered tool names.
fn compute_tools_digest(tools: &[String]) -> String {
    let mut hasher = Sha256::new();
    for tool in tools {
        hasher.update(tool.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::tempdir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_tools_digest_deterministic() {
        let a = compute_tools_digest(&names(&["pytest", "pylint"]));
        let b = compute_tools_digest(&names(&["pytest", "pylint"]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_tools_digest_order_sensitive() {
        let a = compute_tools_digest(&names(&["pytest", "pylint"]));
        let b = compute_tools_digest(&names(&["pylint", "pytest"]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let tools = names(&["pytest"]);
        let a = JobSpec::new(".".into(), None, "main".into(), "h".into(), "m".into(), &tools);
        let b = JobSpec::new(".".into(), None, "main".into(), "h".into(), "m".into(), &tools);
        assert_ne!(a.job_id, b.job_id);
        assert_eq!(a.tools_digest, b.tools_digest);
    }

    #[test]
    fn test_environment_entries() {
        let spec = JobSpec::new(
            "/src/app".into(),
            Some("42".into()),
            "main".into(),
            "abc".into(),
            "def".into(),
            &names(&["pytest"]),
        );
        let env = spec.environment();
        let get = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("pr"), "42");
        assert_eq!(get("head_sha"), "abc");
        assert_eq!(get("merge_base"), "def");
        assert_eq!(get("job_id"), spec.job_id);
    }

    #[test]
    fn test_from_git_resolves_commits() {
        let dir = tempdir().unwrap();
        let repo = dir.path();
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(repo)
                .status()
                .unwrap();
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.email", "ci@example.com"]);
        run(&["config", "user.name", "CI"]);
        std::fs::write(repo.join("a.txt"), "a").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "base"]);
        run(&["checkout", "-q", "-b", "feature"]);
        std::fs::write(repo.join("b.txt"), "b").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "feature"]);

        let spec = JobSpec::from_git(repo, "main", "HEAD", None, &names(&["pytest"])).unwrap();
        assert_eq!(spec.head_sha, git::rev_parse(repo, "feature").unwrap());
        assert_eq!(spec.merge_base, git::rev_parse(repo, "main").unwrap());
    }
}
