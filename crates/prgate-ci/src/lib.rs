//! prgate CI - pre-merge pull request validation
//!
//! Provides the validation pipeline that:
//! - Starts backing services and waits for readiness
//! - Runs gated analysis tools with combined output capture
//! - Normalizes raw reports into collapsible summary fragments
//! - Publishes one summary and a pass/fail verdict per job

pub mod artifacts;
pub mod config;
pub mod gate;
pub mod normalize;
pub mod pipeline;
pub mod runner;
pub mod services;
pub mod spec;
pub mod summary;
pub mod tool;

// Re-export key types
pub use artifacts::ReportDir;
pub use config::{PipelineConfig, CONFIG_FILE};
pub use gate::{JobGate, JobVerdict};
pub use normalize::{normalize, strip_ansi, ReportFragment};
pub use pipeline::{JobInput, JobReport, ValidationPipeline};
pub use runner::{ToolRunOutcome, ToolRunner, ToolStatus};
pub use services::{
    ComposeBackend, MemoryBackend, ServiceBackend, ServiceOrchestrator, ServiceSession,
    ServiceSpec,
};
pub use spec::JobSpec;
pub use summary::{Summary, SummaryPublisher};
pub use tool::{BuiltinTool, FailurePolicy, ToolDescriptor, ToolKind, ToolRegistry};
