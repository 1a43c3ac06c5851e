//! Integration tests for the validation pipeline with MemoryBackend.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use prgate_ci::summary::JOB_STATUS_HEADING;
use prgate_ci::{
    JobInput, MemoryBackend, PipelineConfig, ServiceSpec, ToolDescriptor, ToolKind, ToolStatus,
    ValidationPipeline,
};
use prgate_core::PipelineError;
use tempfile::{tempdir, TempDir};

const PYTEST_OUTPUT: &str = "printf '\\033[1m=== test session starts ===\\033[0m\\n\
collected 1 item\\n\
tests/test_app.py::test_ok PASSED\\n\
---------- coverage: platform linux ----------\\n\
Name Stmts Miss Cover\\n\
TOTAL 10 0 100%%\\n\
=== 1 passed ===\\n'";

fn git(repo: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(repo)
        .status()
        .expect("run git");
    assert!(status.success(), "git {args:?} failed");
}

/// A repository with `main` and a `feature` branch whose single commit
/// touches `files` with `message`.
fn repo_with_change(files: &[&str], message: &str) -> TempDir {
    let dir = tempdir().unwrap();
    let repo = dir.path();
    git(repo, &["init", "-q", "-b", "main"]);
    git(repo, &["config", "user.email", "ci@example.com"]);
    git(repo, &["config", "user.name", "CI"]);
    std::fs::write(repo.join("README.md"), "readme\n").unwrap();
    git(repo, &["add", "."]);
    git(repo, &["commit", "-q", "-m", "Initial commit"]);

    git(repo, &["checkout", "-q", "-b", "feature"]);
    for file in files {
        let path = repo.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, format!("# {file}\nchanged = True\n")).unwrap();
    }
    git(repo, &["add", "."]);
    git(repo, &["commit", "-q", "-m", message]);
    dir
}

fn sh(name: &str, script: &str) -> ToolDescriptor {
    ToolDescriptor::new(name, vec!["sh".into(), "-c".into(), script.into()])
}

fn config(tools: Vec<ToolDescriptor>) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.tools = tools;
    config.services.required = vec![
        ServiceSpec::new("db").with_probe(&["pg_isready", "-U", "postgres"]),
        ServiceSpec::new("sign_node"),
    ];
    config.services.startup_timeout_secs = 1;
    config.services.poll_interval_ms = 5;
    config
}

fn stock_tools() -> Vec<ToolDescriptor> {
    vec![
        sh("pytest", PYTEST_OUTPUT)
            .fatal()
            .with_kind(ToolKind::TestRunner),
        sh("migrations", "echo upgraded").fatal().with_kind(ToolKind::MigrationCheck),
        ToolDescriptor::new(
            "pylint",
            vec![
                "sh".into(),
                "-c".into(),
                "echo \"linted $*\"".into(),
                "pylint".into(),
                "{files}".into(),
            ],
        )
        .gated_on("python")
        .with_files_from("python"),
        sh("black", "true").gated_on("python").with_files_from("python"),
    ]
}

/// Test: a documentation-only change skips every Python-gated tool
#[tokio::test]
async fn test_doc_only_change_skips_gated_tools() {
    let repo = repo_with_change(&["docs/guide.md"], "Update the guide");
    let reports = repo.path().join("reports");
    let backend = Arc::new(MemoryBackend::new().ready_after("db", 2));
    let pipeline = ValidationPipeline::new(config(stock_tools()), backend.clone());

    let report = pipeline
        .run(&JobInput::new(repo.path(), "main", "HEAD", &reports).with_pr("7"))
        .await
        .expect("pipeline failed");

    assert!(report.success, "unexpected violations: {:?}", report.verdict.violations);
    assert_eq!(report.skipped_count(), 2);
    assert!(!report.outcomes[2].ran());
    assert!(!reports.join("pylint-report.txt").exists());
    assert!(!reports.join("pylint-report.md").exists());

    assert_eq!(report.summary.included, vec!["pytest", "coverage", "migrations"]);
    let summary = std::fs::read_to_string(reports.join("summary.md")).unwrap();
    assert!(!summary.contains('\x1b'));
    assert!(!summary.contains("test session starts"));
    assert!(summary.contains("TOTAL 10 0 100%"));
    assert!(!summary.contains(JOB_STATUS_HEADING));

    let environment = std::fs::read_to_string(reports.join("environment.txt")).unwrap();
    assert!(environment.contains("pr=7\n"));
    assert!(environment.contains(&format!("head_sha={}\n", report.job.head_sha)));

    assert!(backend.running().is_empty());
    assert_eq!(backend.down_calls().len(), 1);
}

/// Test: a fatal failure fails the job while advisory siblings still run
#[tokio::test]
async fn test_fatal_failure_keeps_siblings_running() {
    let repo = repo_with_change(&["alws/crud.py", "scripts/tool.py"], "Fix build lookup");
    let reports = repo.path().join("reports");
    let backend = Arc::new(MemoryBackend::new());

    let mut tools = stock_tools();
    tools[0] = sh("pytest", "echo header; echo 'FAILED tests/test_x.py'; exit 1")
        .fatal()
        .with_kind(ToolKind::TestRunner);
    tools[3] = sh("black", "echo 'would reformat alws/crud.py'; exit 1")
        .gated_on("python")
        .with_files_from("python");
    let pipeline = ValidationPipeline::new(config(tools), backend.clone());

    let report = pipeline
        .run(&JobInput::new(repo.path(), "main", "HEAD", &reports))
        .await
        .expect("pipeline failed");

    assert!(!report.success);
    assert_eq!(report.verdict.violations.len(), 1);
    assert!(report.verdict.violations[0].contains("pytest"));

    // siblings ran after the fatal failure
    assert_eq!(report.outcomes[1].exit_code(), Some(0));
    assert_eq!(report.outcomes[2].output, "linted alws/crud.py scripts/tool.py\n");
    assert_eq!(report.outcomes[3].exit_code(), Some(1));

    let summary = std::fs::read_to_string(&report.summary_path).unwrap();
    assert!(summary.contains("FAILED tests/test_x.py"));
    assert!(summary.contains("<summary>Black</summary>"));
    assert!(!summary.contains("<summary>Coverage</summary>"));
    let status_at = summary.find(JOB_STATUS_HEADING).unwrap();
    assert!(summary.find("<summary>Black</summary>").unwrap() < status_at);

    assert!(backend.running().is_empty());
    assert_eq!(backend.down_calls().len(), 1);
}

/// Test: a failed migration check is classified separately
#[tokio::test]
async fn test_migration_failure_fails_job() {
    let repo = repo_with_change(&["alembic/versions/0002.py"], "Add build index");
    let reports = repo.path().join("reports");
    let backend = Arc::new(MemoryBackend::new());

    let mut tools = stock_tools();
    tools[1] = sh("migrations", "echo 'duplicate revision'; exit 255")
        .fatal()
        .with_kind(ToolKind::MigrationCheck);
    let pipeline = ValidationPipeline::new(config(tools), backend);

    let report = pipeline
        .run(&JobInput::new(repo.path(), "main", "HEAD", &reports))
        .await
        .expect("pipeline failed");

    assert!(!report.success);
    assert!(report.verdict.violations[0].starts_with("migration check migrations failed"));
}

/// Test: an overlong commit line aborts before services or reports
#[tokio::test]
async fn test_long_commit_message_aborts() {
    let subject = format!("Fix {}", "x".repeat(80));
    let repo = repo_with_change(&["alws/crud.py"], &subject);
    let reports = repo.path().join("reports");
    let backend = Arc::new(MemoryBackend::new());
    let pipeline = ValidationPipeline::new(config(stock_tools()), backend.clone());

    let err = pipeline
        .run(&JobInput::new(repo.path(), "main", "HEAD", &reports))
        .await
        .unwrap_err();

    match err {
        PipelineError::CommitMessageTooLong { limit, lines } => {
            assert_eq!(limit, 72);
            assert_eq!(lines.len(), 1);
            assert_eq!(lines[0].number, 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!reports.exists());
    assert!(backend.down_calls().is_empty());
}

/// Test: a service that never becomes ready aborts after teardown
#[tokio::test]
async fn test_service_startup_timeout_aborts() {
    let repo = repo_with_change(&["alws/crud.py"], "Fix build lookup");
    let reports = repo.path().join("reports");
    let backend = Arc::new(MemoryBackend::new().never_ready("db"));
    let pipeline = ValidationPipeline::new(config(stock_tools()), backend.clone());

    let err = pipeline
        .run(&JobInput::new(repo.path(), "main", "HEAD", &reports))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::ServiceStartupTimeout { ref service, .. } if service == "db"
    ));
    assert!(backend.running().is_empty());
    assert_eq!(backend.down_calls().len(), 1);
    assert!(!reports.join("summary.md").exists());
    assert!(!reports.join("pytest-report.txt").exists());
}

/// Test: the job deadline aborts running tools but still tears down and reports
#[tokio::test]
async fn test_job_deadline_aborts_tools() {
    let repo = repo_with_change(&["alws/crud.py"], "Fix build lookup");
    let reports = repo.path().join("reports");
    let backend = Arc::new(MemoryBackend::new());

    let mut config = config(vec![
        sh("pytest", "echo started; sleep 10").fatal().with_kind(ToolKind::TestRunner),
        sh("pylint", "echo never").gated_on("python"),
    ]);
    config.job_timeout_secs = 1;
    let pipeline = ValidationPipeline::new(config, backend.clone());

    let report = pipeline
        .run(&JobInput::new(repo.path(), "main", "HEAD", &reports))
        .await
        .expect("pipeline failed");

    assert!(!report.success);
    assert!(report.deadline_exceeded);
    assert!(report
        .outcomes
        .iter()
        .all(|o| matches!(o.status, ToolStatus::Aborted)));
    assert_eq!(report.verdict.violations.len(), 1);
    assert!(report.verdict.violations[0].contains("pytest, pylint"));

    assert!(backend.running().is_empty());
    assert_eq!(backend.down_calls().len(), 1);
    let summary = std::fs::read_to_string(reports.join("summary.md")).unwrap();
    assert!(summary.contains(JOB_STATUS_HEADING));
}

/// Test: concurrent tools keep the fixed summary order
#[tokio::test]
async fn test_parallel_tools_keep_summary_order() {
    let repo = repo_with_change(&["alws/crud.py"], "Fix build lookup");
    let reports = repo.path().join("reports");
    let step_summary = repo.path().join("step-summary.md");

    let mut config = config(vec![
        sh("pylint", "sleep 0.3; echo pylint done"),
        sh("black", "echo black done"),
        sh("isort", "echo isort done"),
    ]);
    config.parallel_tools = true;
    let pipeline = ValidationPipeline::new(config, Arc::new(MemoryBackend::new()));

    let report = pipeline
        .run(&JobInput::new(repo.path(), "main", "HEAD", &reports).with_step_summary(&step_summary))
        .await
        .expect("pipeline failed");

    assert!(report.success);
    assert_eq!(report.summary.included, vec!["pylint", "black", "isort"]);
    assert_eq!(
        std::fs::read_to_string(&step_summary).unwrap(),
        report.summary.text
    );

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["outcomes"][0]["tool_name"], "pylint");
    assert_eq!(json["outcomes"][0]["status"]["status"], "finished");
}

/// Test: a reused report directory is refused
#[tokio::test]
async fn test_non_empty_report_dir_is_refused() {
    let repo = repo_with_change(&["alws/crud.py"], "Fix build lookup");
    let reports = repo.path().join("reports");
    std::fs::create_dir_all(&reports).unwrap();
    std::fs::write(reports.join("summary.md"), "stale").unwrap();

    let backend = Arc::new(MemoryBackend::new());
    let pipeline = ValidationPipeline::new(config(stock_tools()), backend.clone());
    let err = pipeline
        .run(&JobInput::new(repo.path(), "main", "HEAD", &reports))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ReportDir(_)));
    assert!(backend.down_calls().is_empty());
}

/// Test: a tool appended to the table reports in the summary without extra config
#[tokio::test]
async fn test_added_tool_reaches_summary() {
    let repo = repo_with_change(&["alws/crud.py"], "Type the build lookup");
    let reports = repo.path().join("reports");

    let mut tools = stock_tools();
    tools.push(sh("mypy", "echo 'alws/crud.py:2: error: bad type'; exit 1").fatal());
    let pipeline = ValidationPipeline::new(config(tools), Arc::new(MemoryBackend::new()));

    let report = pipeline
        .run(&JobInput::new(repo.path(), "main", "HEAD", &reports))
        .await
        .expect("pipeline failed");

    assert!(!report.success);
    assert_eq!(report.summary.included.last().map(String::as_str), Some("mypy"));
    let summary = std::fs::read_to_string(&report.summary_path).unwrap();
    assert!(summary.contains("<summary>Mypy</summary>"));
    assert!(summary.contains("bad type"));
}

/// Test: a migration check fails the job even when left advisory
#[tokio::test]
async fn test_advisory_migration_check_still_fails_job() {
    let repo = repo_with_change(&["alembic/versions/0003.py"], "Add build column");
    let reports = repo.path().join("reports");

    let mut tools = stock_tools();
    tools[1] = sh("migrations", "echo 'multiple heads'; exit 1").with_kind(ToolKind::MigrationCheck);
    let pipeline = ValidationPipeline::new(config(tools), Arc::new(MemoryBackend::new()));

    let report = pipeline
        .run(&JobInput::new(repo.path(), "main", "HEAD", &reports))
        .await
        .expect("pipeline failed");

    assert!(!report.success);
    assert_eq!(report.verdict.violations.len(), 1);
    assert!(report.verdict.violations[0].starts_with("migration check migrations failed"));
}
