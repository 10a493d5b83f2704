//! Error taxonomy for the generate/repair/race engine.

use std::time::Duration;

use crate::ledger::Stage;
use crate::protocol::ProtocolViolation;

/// Engine errors.
///
/// Failures inside a candidate are contained by the runner, failures inside
/// an attempt are contained by the orchestrator; see [`ForgeError::is_fatal_to_run`].
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("generation service unavailable: {0}")]
    TransientService(String),

    #[error("context length exceeded for model {model}")]
    ContextOverflow { model: String },

    #[error("generation exhausted after {tries} tries: {last_error}")]
    GenerationExhausted { tries: u32, last_error: String },

    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),

    #[error("{stage} exhausted after {rounds} rounds")]
    RepairExhausted { stage: Stage, rounds: u32 },

    #[error("test run timed out after {limit_secs}s")]
    ExecutionTimeout { limit_secs: u64 },

    #[error("test run could not complete: {0}")]
    ExecutionError(String),

    #[error("all {count} candidates failed")]
    AllCandidatesFailed { count: usize, failures: Vec<String> },

    #[error(
        "failed to generate working code for {name} after {attempts} attempts \
         (elapsed {}, total cost ${total_cost:.4})",
        crate::reporting::pretty_duration(*elapsed)
    )]
    AttemptsExhausted {
        name: String,
        attempts: u32,
        elapsed: Duration,
        total_cost: f64,
    },

    #[error("candidate cancelled")]
    Cancelled,

    #[error("invalid specification: {0}")]
    InvalidSpecification(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("static analyzer failed: {0}")]
    Analyzer(String),

    #[error("environment error: {0}")]
    Environment(#[from] venv_env_manager::EnvError),

    #[error("subprocess error: {0}")]
    Exec(#[from] specforge_exec::ExecError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ForgeError {
    /// Whether this error must stop the whole run instead of the current
    /// candidate or attempt.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            ForgeError::InvalidSpecification(_)
                | ForgeError::Config(_)
                | ForgeError::AttemptsExhausted { .. }
                | ForgeError::Cancelled
        )
    }

    /// Timeouts and launch failures say nothing about the code under test.
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            ForgeError::ExecutionTimeout { .. } | ForgeError::ExecutionError(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ForgeError>;
