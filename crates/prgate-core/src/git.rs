//! Git plumbing for reading the pull request under validation.

use std::path::Path;
use std::process::Command;

use crate::changeset::{ChangeStatus, ChangedFile};
use crate::error::{PipelineError, Result};

fn run_git(repo_dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| PipelineError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(output.stdout)
}

/// Resolve a revision to a full commit SHA.
pub fn rev_parse(repo_dir: &Path, rev: &str) -> Result<String> {
    let out = run_git(repo_dir, &["rev-parse", "--verify", &format!("{rev}^{{commit}}")])?;
    let sha = String::from_utf8_lossy(&out).trim().to_string();
    if sha.is_empty() {
        return Err(PipelineError::Git(format!(
            "git rev-parse {rev} returned empty output"
        )));
    }
    Ok(sha)
}

/// Capture the HEAD commit SHA.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    rev_parse(repo_dir, "HEAD")
}

/// Best common ancestor of `base` and `head`.
pub fn merge_base(repo_dir: &Path, base: &str, head: &str) -> Result<String> {
    let out = run_git(repo_dir, &["merge-base", base, head])?;
    Ok(String::from_utf8_lossy(&out).trim().to_string())
}

/// Full message of a single commit.
pub fn commit_message(repo_dir: &Path, rev: &str) -> Result<String> {
    let out = run_git(repo_dir, &["log", "--format=%B", "-n", "1", rev])?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Files changed between the merge-base of `base`/`head` and `head`.
pub fn changed_files(repo_dir: &Path, base: &str, head: &str) -> Result<Vec<ChangedFile>> {
    let merge_base = merge_base(repo_dir, base, head)?;
    let out = run_git(
        repo_dir,
        &["diff", "--name-status", "-z", "-M", &merge_base, head],
    )?;
    parse_name_status_z(&String::from_utf8_lossy(&out))
}

/// Parse NUL-separated `git diff --name-status -z` output.
///
/// Renames and copies carry two paths; the destination path is recorded.
pub fn parse_name_status_z(output: &str) -> Result<Vec<ChangedFile>> {
    let mut tokens = output.split('\0').filter(|t| !t.is_empty());
    let mut files = Vec::new();

    while let Some(code) = tokens.next() {
        let status = ChangeStatus::from_code(code);
        let path = match status {
            ChangeStatus::Renamed | ChangeStatus::Copied => {
                let _source = tokens.next();
                tokens.next()
            }
            _ => tokens.next(),
        };
        let path = path.ok_or_else(|| {
            PipelineError::Git(format!("truncated name-status output after {code:?}"))
        })?;
        files.push(ChangedFile::new(path, status));
    }

    Ok(files)
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
