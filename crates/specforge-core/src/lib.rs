//! specforge core library
//!
//! Turns a markdown source document into tested code by drafting
//! several candidates, repairing them against a static analyzer and their
//! own tests, and promoting the first one that passes.

pub mod analyzer;
pub mod cancel;
pub mod candidate;
pub mod config;
pub mod domain;
pub mod dynamic_repair;
pub mod extract;
pub mod fakes;
pub mod generation;
pub mod ledger;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod prompts;
pub mod protocol;
pub mod race;
pub mod reporting;
pub mod sandbox;
pub mod static_repair;
pub mod telemetry;
pub mod workspace;

pub use analyzer::{Analyzer, CommandAnalyzer, Finding};
pub use cancel::{CancelSource, CancelToken};
pub use candidate::{CandidatePipeline, CandidateState, PipelineStages};
pub use config::{
    AnalyzerConfig, ForgeConfig, GenerationConfig, OrchestratorConfig, RepairConfig,
    SandboxConfig,
};
pub use domain::{
    Artifact, ArtifactSet, CompilationUnit, ForgeError, Result, Role, UnitKind, UnitSet,
};
pub use dynamic_repair::{DynamicRepairLoop, Repaired};
pub use extract::{extract, extract_file};
pub use generation::drafting::{draft_candidates, DraftDocument};
pub use generation::openai::OpenAiService;
pub use generation::{
    CompletionRequest, CompletionResponse, CompletionService, GenerationClient, RequestKind,
    ServiceError, Usage,
};
pub use ledger::{CostLedger, ModelClass, PricingTable, RunStats, Stage, StageStats};
pub use orchestrator::{Compilation, Orchestrator};
pub use protocol::{ProtocolViolation, Shape, MANIFEST_FILENAME};
pub use race::{Candidate, CandidateOutcome, CandidateRunner, FailedArchive, Verdict, Winner};
pub use reporting::{pretty_duration, render_stats_md, write_stats_md};
pub use sandbox::{FailureMarkers, SandboxExecutor, TestHarness, TestOutcome};
pub use static_repair::StaticRepairLoop;
pub use workspace::CandidateWorkspace;

pub use metrics::METRICS;
pub use telemetry::init_tracing;

/// specforge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
