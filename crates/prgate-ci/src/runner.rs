//! Conditional tool execution.
//!
//! Each tool's stdout and stderr share one file descriptor, the raw report
//! file, so interleaving is exactly what the kernel saw (`> file 2>&1`).
//! Separate pipes would reorder lines across the two streams.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use prgate_core::{obs, ChangeSet, PipelineError, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::artifacts::ReportDir;
use crate::tool::{Dispatch, FailurePolicy, ToolDescriptor, ToolKind};

/// How a tool run ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolStatus {
    /// Gate was false (or nothing to check).
    Skipped { reason: String },

    /// Process ran to completion.
    Finished { exit_code: i32 },

    /// Process could not be spawned or hit its own timeout.
    Errored { message: String },

    /// Killed by the job deadline.
    Aborted,
}

/// Result of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRunOutcome {
    pub tool_name: String,
    pub report_name: String,
    pub kind: ToolKind,
    pub policy: FailurePolicy,
    pub status: ToolStatus,

    /// Combined output as captured (empty when skipped).
    pub output: String,

    pub duration_ms: u64,
}

impl ToolRunOutcome {
    fn from_descriptor(tool: &ToolDescriptor, status: ToolStatus) -> Self {
        Self {
            tool_name: tool.name.clone(),
            report_name: tool.report_name().to_string(),
            kind: tool.kind,
            policy: tool.effective_policy(),
            status,
            output: String::new(),
            duration_ms: 0,
        }
    }

    pub fn skipped(tool: &ToolDescriptor, reason: impl Into<String>) -> Self {
        Self::from_descriptor(
            tool,
            ToolStatus::Skipped {
                reason: reason.into(),
            },
        )
    }

    /// Outcome for a tool cut off by the job deadline, keeping whatever it
    /// had written so far.
    pub fn aborted(tool: &ToolDescriptor, partial_output: String) -> Self {
        let mut outcome = Self::from_descriptor(tool, ToolStatus::Aborted);
        outcome.output = partial_output;
        outcome
    }

    /// Whether the tool was invoked (gate was true).
    pub fn ran(&self) -> bool {
        !matches!(self.status, ToolStatus::Skipped { .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ToolStatus::Finished { exit_code } => Some(exit_code),
            _ => None,
        }
    }

    /// Skipped or exited zero.
    pub fn passed(&self) -> bool {
        match &self.status {
            ToolStatus::Skipped { .. } => true,
            ToolStatus::Finished { exit_code } => *exit_code == 0,
            ToolStatus::Errored { .. } | ToolStatus::Aborted => false,
        }
    }

    pub fn failed(&self) -> bool {
        !self.passed()
    }

    /// A failure that fails the job on its own (job-deadline aborts are
    /// reported separately).
    pub fn is_fatal_failure(&self) -> bool {
        self.policy == FailurePolicy::Fatal
            && self.failed()
            && !matches!(self.status, ToolStatus::Aborted)
    }

    /// Human-readable failure reason, if the tool failed.
    pub fn failure_reason(&self) -> Option<String> {
        match &self.status {
            ToolStatus::Finished { exit_code } if *exit_code != 0 => {
                Some(format!("exited with code {exit_code}"))
            }
            ToolStatus::Errored { message } => Some(message.clone()),
            ToolStatus::Aborted => Some("aborted by job deadline".to_string()),
            _ => None,
        }
    }
}

/// Runs tool descriptors against a change set, writing raw reports.
pub struct ToolRunner<'a> {
    reports: &'a ReportDir,
    working_dir: PathBuf,
}

impl<'a> ToolRunner<'a> {
    pub fn new(reports: &'a ReportDir, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports,
            working_dir: working_dir.into(),
        }
    }

    /// Evaluate the gate and, if it holds, run the tool.
    ///
    /// Never fails: spawn errors and timeouts become `Errored` outcomes so
    /// one broken tool cannot take its siblings down.
    pub async fn execute(&self, tool: &ToolDescriptor, changes: &ChangeSet) -> ToolRunOutcome {
        let argv = match tool.dispatch(changes) {
            Dispatch::Skip { reason } => {
                obs::emit_tool_skipped(&tool.name, &reason);
                return ToolRunOutcome::skipped(tool, reason);
            }
            Dispatch::Run { argv } => argv,
        };

        let start = Instant::now();
        let mut outcome = ToolRunOutcome::from_descriptor(tool, ToolStatus::Aborted);

        match self.spawn_captured(tool, &argv).await {
            Ok(exit_code) => {
                outcome.status = ToolStatus::Finished { exit_code };
                obs::emit_tool_finished(
                    &tool.name,
                    exit_code,
                    start.elapsed().as_millis() as u64,
                    tool.is_fatal(),
                );
            }
            Err(e) => {
                obs::emit_tool_errored(&tool.name, &e);
                outcome.status = ToolStatus::Errored {
                    message: e.to_string(),
                };
            }
        }

        outcome.duration_ms = start.elapsed().as_millis() as u64;
        outcome.output = self
            .reports
            .read_raw(tool.report_name())
            .ok()
            .flatten()
            .unwrap_or_default();
        outcome
    }

    async fn spawn_captured(&self, tool: &ToolDescriptor, argv: &[String]) -> Result<i32> {
        let (exe, args) = argv.split_first().ok_or_else(|| {
            PipelineError::Config(format!("tool {} has an empty command", tool.name))
        })?;

        let raw_path = self.reports.raw_report_path(tool.report_name());
        let stdout = std::fs::File::create(&raw_path)?;
        let stderr = stdout.try_clone()?;

        let mut command = Command::new(exe);
        command
            .args(args)
            .envs(&tool.env)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| PipelineError::ToolExecutionFailure {
                tool: tool.name.clone(),
                reason: format!("failed to spawn {exe}: {e}"),
            })?;
        // dropped on every exit path, including the job deadline cancelling us
        let _group = ProcessGroup::new(child.id());

        let status = if tool.timeout_secs > 0 {
            match tokio::time::timeout(Duration::from_secs(tool.timeout_secs), child.wait()).await
            {
                Ok(status) => status?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(PipelineError::ToolExecutionFailure {
                        tool: tool.name.clone(),
                        reason: format!("timed out after {} seconds", tool.timeout_secs),
                    });
                }
            }
        } else {
            child.wait().await?
        };

        Ok(status.code().unwrap_or(-1))
    }

    /// Run every tool, filling `slots[i]` with the outcome of `tools[i]`.
    ///
    /// Slots are filled as tools complete, so if the caller drops this future
    /// (job deadline) the finished outcomes survive. With `parallel`, tools
    /// run concurrently; slot order still follows declaration order.
    pub async fn run_into(
        &self,
        tools: &[ToolDescriptor],
        changes: &ChangeSet,
        parallel: bool,
        slots: &mut [Option<ToolRunOutcome>],
    ) {
        if parallel {
            let mut pending: FuturesUnordered<_> = tools
                .iter()
                .enumerate()
                .map(|(idx, tool)| async move { (idx, self.execute(tool, changes).await) })
                .collect();
            while let Some((idx, outcome)) = pending.next().await {
                slots[idx] = Some(outcome);
            }
        } else {
            for (idx, tool) in tools.iter().enumerate() {
                slots[idx] = Some(self.execute(tool, changes).await);
            }
        }
    }

    /// Run every tool to completion, returning outcomes in declared order.
    pub async fn run_all(
        &self,
        tools: &[ToolDescriptor],
        changes: &ChangeSet,
        parallel: bool,
    ) -> Vec<ToolRunOutcome> {
        let mut slots: Vec<Option<ToolRunOutcome>> = vec![None; tools.len()];
        self.run_into(tools, changes, parallel, &mut slots).await;
        slots
            .into_iter()
            .zip(tools)
            .map(|(slot, tool)| slot.unwrap_or_else(|| ToolRunOutcome::aborted(tool, String::new())))
            .collect()
    }
}

/// Process group led by a tool. Dropping it kills whatever the tool left
/// behind (`sh -c` children, `docker compose run` clients).
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    leader: Option<u32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self { leader }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.leader.and_then(|pid| i32::try_from(pid).ok()) {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            // ESRCH just means the group is already gone
            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
}
