//! Backing service orchestration.
//!
//! `ServiceOrchestrator::start` brings services up concurrently and returns
//! only once every one of them is ready. The returned [`ServiceSession`] is
//! consumed by [`ServiceSession::stop`], so teardown happens at most once; the
//! pipeline calls it on every path, including failures and the job deadline.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use prgate_core::{obs, PipelineError, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

/// A backing service the tools depend on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Service name as known to the backend (compose service name).
    pub name: String,

    /// Readiness probe executed inside the service. Empty means "running is ready".
    #[serde(default)]
    pub probe: Vec<String>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probe: Vec::new(),
        }
    }

    pub fn with_probe(mut self, probe: &[&str]) -> Self {
        self.probe = probe.iter().map(|s| (*s).to_string()).collect();
        self
    }
}

/// Readiness state of a service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Starting,
    Ready,
    Stopped,
}

/// A running backing service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceHandle {
    pub name: String,
    pub state: ReadinessState,
}

/// Container runtime seam.
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    /// Start the service (non-blocking with respect to readiness).
    async fn up(&self, spec: &ServiceSpec) -> Result<()>;

    /// Whether the service currently reports ready.
    async fn is_ready(&self, spec: &ServiceSpec) -> Result<bool>;

    /// Stop the services and reclaim their ephemeral volumes.
    async fn down(&self, names: &[String]) -> Result<()>;
}

/// `docker compose` backend.
#[derive(Debug, Clone, Default)]
pub struct ComposeBackend {
    compose_file: Option<PathBuf>,
    project_name: Option<String>,
    working_dir: Option<PathBuf>,
}

impl ComposeBackend {
    pub fn new(compose_file: Option<PathBuf>, project_name: Option<String>) -> Self {
        Self {
            compose_file,
            project_name,
            working_dir: None,
        }
    }

    pub fn in_dir(mut self, working_dir: PathBuf) -> Self {
        self.working_dir = Some(working_dir);
        self
    }

    fn compose(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("compose");
        if let Some(file) = &self.compose_file {
            cmd.arg("-f").arg(file);
        }
        if let Some(project) = &self.project_name {
            cmd.arg("-p").arg(project);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!(args = ?args, "docker compose");
        self.compose()
            .args(args)
            .output()
            .await
            .map_err(|e| PipelineError::Service(format!("failed to run docker compose: {e}")))
    }
}

#[async_trait]
impl ServiceBackend for ComposeBackend {
    async fn up(&self, spec: &ServiceSpec) -> Result<()> {
        let output = self.run(&["up", "-d", &spec.name]).await?;
        if !output.status.success() {
            return Err(PipelineError::Service(format!(
                "docker compose up {} failed: {}",
                spec.name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn is_ready(&self, spec: &ServiceSpec) -> Result<bool> {
        if spec.probe.is_empty() {
            let output = self
                .run(&["ps", "--status", "running", "-q", &spec.name])
                .await?;
            return Ok(output.status.success()
                && !String::from_utf8_lossy(&output.stdout).trim().is_empty());
        }

        let mut args = vec!["exec", "-T", spec.name.as_str()];
        args.extend(spec.probe.iter().map(String::as_str));
        let output = self.run(&args).await?;
        Ok(output.status.success())
    }

    async fn down(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut args = vec!["rm", "--stop", "--force", "--volumes"];
        args.extend(names.iter().map(String::as_str));
        let output = self.run(&args).await?;
        if !output.status.success() {
            return Err(PipelineError::Service(format!(
                "docker compose rm failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Starts services and hands out the session that tears them down.
pub struct ServiceOrchestrator {
    backend: Arc<dyn ServiceBackend>,
    specs: Vec<ServiceSpec>,
    startup_timeout: Duration,
    poll_interval: Duration,
}

impl ServiceOrchestrator {
    pub fn new(
        backend: Arc<dyn ServiceBackend>,
        specs: Vec<ServiceSpec>,
        startup_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            specs,
            startup_timeout,
            poll_interval,
        }
    }

    pub fn service_names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    /// Start `names` concurrently and wait until all of them are ready.
    ///
    /// On any failure every requested service is torn down before the error
    /// is returned, so the caller never holds a half-started session.
    pub async fn start(&self, names: &[String]) -> Result<ServiceSession> {
        let specs = names
            .iter()
            .map(|name| {
                self.specs
                    .iter()
                    .find(|s| &s.name == name)
                    .ok_or_else(|| PipelineError::Config(format!("unknown service: {name}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let results = futures::future::join_all(specs.iter().map(|s| self.start_one(s))).await;

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                // a timeout is the more useful report than a follow-on backend error
                let replace = match (&first_error, &e) {
                    (None, _) => true,
                    (Some(PipelineError::ServiceStartupTimeout { .. }), _) => false,
                    (Some(_), PipelineError::ServiceStartupTimeout { .. }) => true,
                    _ => false,
                };
                if replace {
                    first_error = Some(e);
                }
            }
        }

        if let Some(err) = first_error {
            if let Err(teardown) = self.backend.down(names).await {
                warn!(error = %teardown, "teardown after failed startup also failed");
            }
            obs::emit_services_stopped(names);
            return Err(err);
        }

        Ok(ServiceSession {
            backend: Arc::clone(&self.backend),
            handles: names
                .iter()
                .map(|name| ServiceHandle {
                    name: name.clone(),
                    state: ReadinessState::Ready,
                })
                .collect(),
            stopped: false,
        })
    }

    /// Bring one service up and poll it until ready. The startup timeout
    /// bounds the whole attempt, including a hung `up` or readiness check.
    async fn start_one(&self, spec: &ServiceSpec) -> Result<()> {
        let started = Instant::now();
        match tokio::time::timeout(self.startup_timeout, self.wait_ready(spec)).await {
            Ok(Ok(())) => {
                obs::emit_service_ready(&spec.name, started.elapsed().as_millis() as u64);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PipelineError::ServiceStartupTimeout {
                service: spec.name.clone(),
                timeout_secs: self.startup_timeout.as_secs(),
            }),
        }
    }

    async fn wait_ready(&self, spec: &ServiceSpec) -> Result<()> {
        self.backend.up(spec).await?;
        while !self.backend.is_ready(spec).await? {
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(())
    }
}

/// Running services owned by one job.
pub struct ServiceSession {
    backend: Arc<dyn ServiceBackend>,
    handles: Vec<ServiceHandle>,
    stopped: bool,
}

impl ServiceSession {
    pub fn handles(&self) -> &[ServiceHandle] {
        &self.handles
    }

    pub fn names(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.name.clone()).collect()
    }

    /// Tear every service down and reclaim volumes. Consumes the session.
    pub async fn stop(mut self) -> Result<()> {
        self.stopped = true;
        let names = self.names();
        let result = self.backend.down(&names).await;
        for handle in &mut self.handles {
            handle.state = ReadinessState::Stopped;
        }
        obs::emit_services_stopped(&names);
        result
    }
}

impl Drop for ServiceSession {
    fn drop(&mut self) {
        if !self.stopped && !self.handles.is_empty() {
            warn!(
                services = %self.names().join(","),
                "service session dropped without stop; services may still be running"
            );
        }
    }
}

/// In-memory backend for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Number of `is_ready` polls before a service reports ready; services
    /// missing from the map are ready on the first poll.
    ready_after: std::collections::HashMap<String, usize>,
    state: std::sync::Mutex<MemoryBackendState>,
}

#[derive(Debug, Default)]
struct MemoryBackendState {
    polls: std::collections::HashMap<String, usize>,
    running: Vec<String>,
    down_calls: Vec<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report ready only after `polls` readiness checks.
    pub fn ready_after(mut self, name: impl Into<String>, polls: usize) -> Self {
        self.ready_after.insert(name.into(), polls);
        self
    }

    /// Never report ready.
    pub fn never_ready(self, name: impl Into<String>) -> Self {
        self.ready_after(name, usize::MAX)
    }

    pub fn running(&self) -> Vec<String> {
        self.lock().running.clone()
    }

    /// Every `down` invocation, in call order.
    pub fn down_calls(&self) -> Vec<Vec<String>> {
        self.lock().down_calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryBackendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ServiceBackend for MemoryBackend {
    async fn up(&self, spec: &ServiceSpec) -> Result<()> {
        let mut state = self.lock();
        if !state.running.contains(&spec.name) {
            state.running.push(spec.name.clone());
        }
        Ok(())
    }

    async fn is_ready(&self, spec: &ServiceSpec) -> Result<bool> {
        let mut state = self.lock();
        let polls = state.polls.entry(spec.name.clone()).or_insert(0);
        *polls += 1;
        let needed = self.ready_after.get(&spec.name).copied().unwrap_or(1);
        Ok(*polls >= needed)
    }

    async fn down(&self, names: &[String]) -> Result<()> {
        let mut state = self.lock();
        state.running.retain(|n| !names.contains(n));
        state.down_calls.push(names.to_vec());
        Ok(())
    }
}
