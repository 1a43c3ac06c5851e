//! Pipeline configuration (`prgate.toml`).
//!
//! Every field has a default mirroring the stock workflow, so a missing file
//! or an empty table yields a working pipeline.
//!
//! ```toml
//! job_timeout_secs = 3600
//! parallel_tools = false
//!
//! [commit]
//! max_line_length = 72
//!
//! [[predicates]]
//! name = "python"
//! globs = ["**/*.py"]
//! added_or_modified_only = true
//!
//! [services]
//! startup_timeout_secs = 120
//!
//! [[services.required]]
//! name = "db"
//! probe = ["pg_isready", "-U", "postgres"]
//!
//! [[tools]]
//! name = "pylint"
//! gate = "python"
//! files_from = "python"
//! command = ["pylint", "{files}"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use prgate_core::{PipelineError, PredicateSpec, Result, DEFAULT_MAX_LINE_LENGTH};
use serde::{Deserialize, Serialize};

use crate::services::ServiceSpec;
use crate::normalize::COVERAGE_FRAGMENT;
use crate::tool::{BuiltinTool, ToolDescriptor, ToolKind, ToolRegistry};

/// Default config file name, looked up in the repository root.
pub const CONFIG_FILE: &str = "prgate.toml";

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Whole-job deadline covering tool execution.
    pub job_timeout_secs: u64,

    /// Run tools concurrently against the shared services.
    pub parallel_tools: bool,

    /// Fragment order of the published summary. Derived from the tool table
    /// when unset; when set it must name every fragment a tool can produce.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_order: Option<Vec<String>>,

    pub commit: CommitConfig,

    /// Change-set predicates, evaluated once per job.
    pub predicates: Vec<PredicateSpec>,

    pub services: ServicesConfig,

    /// Tool table in execution order.
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommitConfig {
    pub max_line_length: usize,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServicesConfig {
    /// Compose file; `None` lets compose discover it.
    pub compose_file: Option<PathBuf>,

    pub project_name: Option<String>,

    pub startup_timeout_secs: u64,

    pub poll_interval_ms: u64,

    /// Services started before any tool runs.
    pub required: Vec<ServiceSpec>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            compose_file: None,
            project_name: None,
            startup_timeout_secs: 120,
            poll_interval_ms: 1000,
            required: vec![
                ServiceSpec::new("db").with_probe(&["pg_isready", "-U", "postgres"]),
                ServiceSpec::new("sign_node"),
            ],
        }
    }
}

impl ServicesConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn names(&self) -> Vec<String> {
        self.required.iter().map(|s| s.name.clone()).collect()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: 3600,
            parallel_tools: false,
            summary_order: None,
            commit: CommitConfig::default(),
            predicates: default_predicates(),
            services: ServicesConfig::default(),
            tools: BuiltinTool::ALL.iter().map(BuiltinTool::descriptor).collect(),
        }
    }
}

/// `python`: any added or modified Python file. `core`: the subset under the
/// application package.
pub fn default_predicates() -> Vec<PredicateSpec> {
    vec![
        PredicateSpec::new("python", &["**/*.py"]).added_or_modified(),
        PredicateSpec::new("core", &["alws/**/*.py"]).added_or_modified(),
    ]
}

impl PipelineConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `<repo>/prgate.toml` if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>, repo_dir: &Path) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let candidate = repo_dir.join(CONFIG_FILE);
                if candidate.is_file() {
                    Self::load(&candidate)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Reject references to undeclared predicates and malformed tool tables.
    pub fn validate(&self) -> Result<()> {
        let known = |name: &str| self.predicates.iter().any(|p| p.name == name);

        for tool in &self.tools {
            for reference in [&tool.gate, &tool.files_from].into_iter().flatten() {
                if !known(reference.as_str()) {
                    return Err(PipelineError::Config(format!(
                        "tool {} references unknown predicate {reference}",
                        tool.name
                    )));
                }
            }
        }

        if let Some(order) = &self.summary_order {
            for tool in &self.tools {
                for fragment in fragment_names(tool) {
                    if !order.iter().any(|name| name == fragment) {
                        return Err(PipelineError::Config(format!(
                            "summary_order has no place for fragment {fragment} of tool {}",
                            tool.name
                        )));
                    }
                }
            }
        }

        if self.job_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "job_timeout_secs must be greater than zero".to_string(),
            ));
        }

        self.registry().map(|_| ())
    }

    /// The tool table as a registry (checks for duplicate names).
    pub fn registry(&self) -> Result<ToolRegistry> {
        ToolRegistry::try_from(self.tools.clone())
    }

    /// The configured fragment order, or one fragment per tool in table order
    /// with `coverage` right after each test runner.
    pub fn summary_order(&self) -> Vec<String> {
        if let Some(order) = &self.summary_order {
            return order.clone();
        }
        let mut order: Vec<String> = Vec::new();
        for fragment in self.tools.iter().flat_map(fragment_names) {
            if !order.iter().any(|name| name == fragment) {
                order.push(fragment.to_string());
            }
        }
        order
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Fragments a tool can contribute to the summary.
fn fragment_names(tool: &ToolDescriptor) -> Vec<&str> {
    match tool.kind {
        ToolKind::TestRunner => vec![tool.report_name(), COVERAGE_FRAGMENT],
        ToolKind::Generic | ToolKind::MigrationCheck => vec![tool.report_name()],
    }
}
