//! prgate core library
//!
//! Domain logic for pre-merge pull request validation: commit message
//! checks, change-set classification, git access, the error taxonomy and
//! tracing setup. Execution lives in `prgate-ci`.

pub mod changeset;
pub mod commit_msg;
pub mod error;
pub mod git;
pub mod obs;
pub mod telemetry;

pub use changeset::{ChangeSet, ChangeStatus, ChangedFile, Predicate, PredicateSpec};
pub use commit_msg::{validate_commit_message, CommitMessage, DEFAULT_MAX_LINE_LENGTH};
pub use error::{LongLine, PipelineError, Result};
pub use git::{
    capture_head_sha, changed_files, commit_message, is_git_repo, merge_base, rev_parse,
};
pub use obs::job_span;
pub use telemetry::init_tracing;

/// prgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
