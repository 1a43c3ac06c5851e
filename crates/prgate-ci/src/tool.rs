//! Tool descriptors and the declarative dispatch table.
//!
//! New tools are added by registering another [`ToolDescriptor`], never by
//! editing control flow in the runner.

use std::collections::BTreeMap;

use prgate_core::{ChangeSet, PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Placeholder argument replaced by the matching file list.
pub const FILES_PLACEHOLDER: &str = "{files}";

/// Whether a tool's own failure fails the job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Output is recorded for visibility only.
    #[default]
    Advisory,

    /// Non-zero exit fails the job; siblings still run.
    Fatal,
}

/// How a tool's output is normalized and how its failure is classified.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    #[default]
    Generic,

    /// Output is split into a narrative log and a coverage summary.
    TestRunner,

    /// Failure is reported as a migration check failure.
    MigrationCheck,
}

/// Static definition of one validation tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDescriptor {
    /// Tool name, also the default report name.
    pub name: String,

    /// Predicate gating the tool. `None` runs unconditionally.
    #[serde(default)]
    pub gate: Option<String>,

    /// Command template (first element is the executable).
    pub command: Vec<String>,

    /// Predicate whose file list is passed to the tool.
    #[serde(default)]
    pub files_from: Option<String>,

    #[serde(default)]
    pub policy: FailurePolicy,

    #[serde(default)]
    pub kind: ToolKind,

    /// Report file stem; defaults to `name`.
    #[serde(default)]
    pub report_name: Option<String>,

    /// Timeout in seconds (0 = no per-tool timeout).
    #[serde(default)]
    pub timeout_secs: u64,

    /// Extra environment for the process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// What the runner should do with a descriptor for a given change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Run { argv: Vec<String> },
    Skip { reason: String },
}

impl ToolDescriptor {
    /// An unconditional, advisory tool.
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            gate: None,
            command,
            files_from: None,
            policy: FailurePolicy::Advisory,
            kind: ToolKind::Generic,
            report_name: None,
            timeout_secs: 0,
            env: BTreeMap::new(),
            enabled: true,
        }
    }

    /// Run only when `predicate` holds.
    pub fn gated_on(mut self, predicate: impl Into<String>) -> Self {
        self.gate = Some(predicate.into());
        self
    }

    /// Pass the files matched by `predicate` to the tool.
    pub fn with_files_from(mut self, predicate: impl Into<String>) -> Self {
        self.files_from = Some(predicate.into());
        self
    }

    pub fn fatal(mut self) -> Self {
        self.policy = FailurePolicy::Fatal;
        self
    }

    pub fn with_kind(mut self, kind: ToolKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_report_name(mut self, report_name: impl Into<String>) -> Self {
        self.report_name = Some(report_name.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn report_name(&self) -> &str {
        self.report_name.as_deref().unwrap_or(&self.name)
    }

    /// Policy in force. A migration check is fatal whatever it is configured as.
    pub fn effective_policy(&self) -> FailurePolicy {
        match self.kind {
            ToolKind::MigrationCheck => FailurePolicy::Fatal,
            ToolKind::Generic | ToolKind::TestRunner => self.policy,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.effective_policy() == FailurePolicy::Fatal
    }

    /// Expand the command template with `files`.
    ///
    /// An argument equal to `{files}` is replaced by the list. Without a
    /// placeholder, a tool that consumes files gets them appended.
    pub fn render_command(&self, files: &[String]) -> Vec<String> {
        let has_placeholder = self.command.iter().any(|a| a == FILES_PLACEHOLDER);
        let mut argv = Vec::with_capacity(self.command.len() + files.len());
        for arg in &self.command {
            if arg == FILES_PLACEHOLDER {
                argv.extend(files.iter().cloned());
            } else {
                argv.push(arg.clone());
            }
        }
        if !has_placeholder && self.files_from.is_some() {
            argv.extend(files.iter().cloned());
        }
        argv
    }

    /// Decide whether to run against `changes`, and with which arguments.
    pub fn dispatch(&self, changes: &ChangeSet) -> Dispatch {
        if !self.enabled {
            return Dispatch::Skip {
                reason: "disabled".to_string(),
            };
        }

        if let Some(gate) = &self.gate {
            if !changes.is_true(gate) {
                return Dispatch::Skip {
                    reason: format!("predicate {gate} is false"),
                };
            }
        }

        let files: &[String] = match &self.files_from {
            Some(source) => {
                let files = changes.files_for(source);
                if files.is_empty() {
                    return Dispatch::Skip {
                        reason: format!("no files match predicate {source}"),
                    };
                }
                files
            }
            None => &[],
        };

        Dispatch::Run {
            argv: self.render_command(files),
        }
    }
}

/// Builtin tools of the default pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinTool {
    /// Test suite with coverage, run inside the application container.
    Pytest,

    /// `alembic upgrade head` against the database service.
    Migrations,

    Pylint,
    Black,
    Isort,

    /// Security linter, scoped to core application files.
    Bandit,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 6] = [
        BuiltinTool::Pytest,
        BuiltinTool::Migrations,
        BuiltinTool::Pylint,
        BuiltinTool::Black,
        BuiltinTool::Isort,
        BuiltinTool::Bandit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinTool::Pytest => "pytest",
            BuiltinTool::Migrations => "migrations",
            BuiltinTool::Pylint => "pylint",
            BuiltinTool::Black => "black",
            BuiltinTool::Isort => "isort",
            BuiltinTool::Bandit => "bandit",
        }
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        match self {
            BuiltinTool::Pytest => ToolDescriptor::new(
                self.name(),
                in_app_container(&["pytest", "-v", "--cov", "--cov-report", "term"]),
            )
            .fatal()
            .with_kind(ToolKind::TestRunner)
            .with_timeout(1800),
            BuiltinTool::Migrations => ToolDescriptor::new(
                self.name(),
                in_app_container(&["alembic", "upgrade", "head"]),
            )
            .fatal()
            .with_kind(ToolKind::MigrationCheck)
            .with_timeout(300),
            BuiltinTool::Pylint => ToolDescriptor::new(
                self.name(),
                in_app_container(&["pylint", FILES_PLACEHOLDER]),
            )
            .gated_on("python")
            .with_files_from("python")
            .with_timeout(600),
            BuiltinTool::Black => ToolDescriptor::new(
                self.name(),
                in_app_container(&["black", "--check", "--diff", FILES_PLACEHOLDER]),
            )
            .gated_on("python")
            .with_files_from("python")
            .with_timeout(300),
            BuiltinTool::Isort => ToolDescriptor::new(
                self.name(),
                in_app_container(&["isort", "--check", "--diff", FILES_PLACEHOLDER]),
            )
            .gated_on("python")
            .with_files_from("python")
            .with_timeout(300),
            BuiltinTool::Bandit => ToolDescriptor::new(
                self.name(),
                in_app_container(&["bandit", "-c", "pyproject.toml", FILES_PLACEHOLDER]),
            )
            .gated_on("python")
            .with_files_from("core")
            .with_timeout(300),
        }
    }
}

fn in_app_container(args: &[&str]) -> Vec<String> {
    ["docker", "compose", "run", "--rm", "-T", "web_server"]
        .iter()
        .chain(args.iter())
        .map(|s| (*s).to_string())
        .collect()
}

/// Ordered tool table.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every builtin tool in declared order.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for tool in BuiltinTool::ALL {
            registry.tools.push(tool.descriptor());
        }
        registry
    }

    /// Append a tool. Names and report names must be unique.
    pub fn register(&mut self, tool: ToolDescriptor) -> Result<()> {
        if tool.command.is_empty() {
            return Err(PipelineError::Config(format!(
                "tool {} has an empty command",
                tool.name
            )));
        }
        if self.get(&tool.name).is_some() {
            return Err(PipelineError::Config(format!(
                "duplicate tool name: {}",
                tool.name
            )));
        }
        if self
            .tools
            .iter()
            .any(|t| t.report_name() == tool.report_name())
        {
            return Err(PipelineError::Config(format!(
                "duplicate report name: {}",
                tool.report_name()
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl TryFrom<Vec<ToolDescriptor>> for ToolRegistry {
    type Error = PipelineError;

    fn try_from(tools: Vec<ToolDescriptor>) -> Result<Self> {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prgate_core::{ChangeStatus, ChangedFile, PredicateSpec};

    fn changes(paths: &[&str]) -> ChangeSet {
        let files = paths
            .iter()
            .map(|p| ChangedFile::new(*p, ChangeStatus::Modified))
            .collect();
        ChangeSet::classify(
            files,
            &[
                PredicateSpec::new("python", &["**/*.py"]).added_or_modified(),
                PredicateSpec::new("core", &["alws/**/*.py"]).added_or_modified(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_builtin_names() {
        let names: Vec<&str> = BuiltinTool::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec!["pytest", "migrations", "pylint", "black", "isort", "bandit"]
        );
    }

    #[test]
    fn test_migration_check_is_always_fatal() {
        let tool = ToolDescriptor::new("migrations", vec!["alembic".into()])
            .with_kind(ToolKind::MigrationCheck);
        assert_eq!(tool.policy, FailurePolicy::Advisory);
        assert_eq!(tool.effective_policy(), FailurePolicy::Fatal);
        assert!(tool.is_fatal());
        assert!(!ToolDescriptor::new("black", vec!["black".into()]).is_fatal());
    }

    #[test]
    fn test_builtin_policies() {
        assert!(BuiltinTool::Pytest.descriptor().is_fatal());
        assert!(BuiltinTool::Migrations.descriptor().is_fatal());
        assert!(!BuiltinTool::Pylint.descriptor().is_fatal());
        assert!(!BuiltinTool::Bandit.descriptor().is_fatal());
        assert_eq!(BuiltinTool::Pytest.descriptor().kind, ToolKind::TestRunner);
        assert_eq!(
            BuiltinTool::Migrations.descriptor().kind,
            ToolKind::MigrationCheck
        );
    }

    #[test]
    fn test_render_command_with_placeholder() {
        let tool = ToolDescriptor::new(
            "black",
            vec!["black".into(), "--check".into(), FILES_PLACEHOLDER.into(), "-q".into()],
        )
        .with_files_from("python");
        let argv = tool.render_command(&["a.py".to_string(), "b.py".to_string()]);
        assert_eq!(argv, vec!["black", "--check", "a.py", "b.py", "-q"]);
    }

    #[test]
    fn test_render_command_appends_without_placeholder() {
        let tool = ToolDescriptor::new("lint", vec!["lint".into()]).with_files_from("python");
        let argv = tool.render_command(&["a.py".to_string()]);
        assert_eq!(argv, vec!["lint", "a.py"]);
    }

    #[test]
    fn test_render_command_without_files() {
        let tool = ToolDescriptor::new("echo", vec!["echo".into(), "hi".into()]);
        assert_eq!(tool.render_command(&[]), vec!["echo", "hi"]);
    }

    #[test]
    fn test_dispatch_skips_on_false_predicate() {
        let tool = BuiltinTool::Pylint.descriptor();
        match tool.dispatch(&changes(&["README.md"])) {
            Dispatch::Skip { reason } => assert!(reason.contains("python")),
            other => panic!("expected skip, got {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_scopes_to_narrower_file_list() {
        let tool = BuiltinTool::Bandit.descriptor();
        let set = changes(&["setup.py", "alws/crud.py"]);
        match tool.dispatch(&set) {
            Dispatch::Run { argv } => {
                assert!(argv.contains(&"alws/crud.py".to_string()));
                assert!(!argv.contains(&"setup.py".to_string()));
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_skips_when_scoped_list_is_empty() {
        let tool = BuiltinTool::Bandit.descriptor();
        let set = changes(&["scripts/export.py"]);
        assert!(matches!(tool.dispatch(&set), Dispatch::Skip { .. }));
    }

    #[test]
    fn test_unconditional_tool_runs_on_empty_change_set() {
        let tool = BuiltinTool::Pytest.descriptor();
        assert!(matches!(tool.dispatch(&changes(&[])), Dispatch::Run { .. }));
    }

    #[test]
    fn test_disabled_tool_is_skipped() {
        let tool = BuiltinTool::Pytest.descriptor().disabled();
        assert_eq!(
            tool.dispatch(&changes(&[])),
            Dispatch::Skip {
                reason: "disabled".to_string()
            }
        );
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = ToolRegistry::builtin();
        let err = registry
            .register(ToolDescriptor::new("pytest", vec!["true".into()]))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate tool name"));

        let err = registry
            .register(
                ToolDescriptor::new("pytest2", vec!["true".into()]).with_report_name("pylint"),
            )
            .unwrap_err();
        assert!(err.to_string().contains("duplicate report name"));
    }

    #[test]
    fn test_registry_rejects_empty_command() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(ToolDescriptor::new("x", vec![])).is_err());
    }

    #[test]
    fn test_registry_preserves_declared_order() {
        let registry = ToolRegistry::try_from(vec![
            ToolDescriptor::new("b", vec!["true".into()]),
            ToolDescriptor::new("a", vec!["true".into()]),
        ])
        .unwrap();
        assert_eq!(registry.names(), vec!["b", "a"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_descriptor_from_toml() {
        let raw = r#"
            name = "mypy"
            gate = "python"
            command = ["mypy", "{files}"]
            files_from = "python"
            policy = "fatal"
        "#;
        let tool: ToolDescriptor = toml::from_str(raw).unwrap();
        assert!(tool.is_fatal());
        assert_eq!(tool.kind, ToolKind::Generic);
        assert!(tool.enabled);
        assert_eq!(tool.report_name(), "mypy");
    }
}
