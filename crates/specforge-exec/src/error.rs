//! Error types for subprocess execution.

use thiserror::Error;

/// Errors produced while running a subprocess stage.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The stage had no program to run.
    #[error("stage {0} has empty command")]
    EmptyCommand(String),

    /// The program could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process outlived its timeout and was killed.
    #[error("stage {stage} timed out after {limit_secs} seconds")]
    Timeout { stage: String, limit_secs: u64 },

    /// Waiting on the process or reading its pipes failed.
    #[error("io error while running {stage}: {source}")]
    Io {
        stage: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    /// Whether the failure was the timeout firing.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }
}

/// Result type for subprocess execution.
pub type Result<T> = std::result::Result<T, ExecError>;
