//! Error types for venv-env-manager

use thiserror::Error;

/// Errors that can occur while provisioning an isolated environment
#[derive(Error, Debug)]
pub enum EnvError {
    /// No usable Python interpreter on PATH
    #[error("Python is not installed or not in PATH")]
    PythonNotFound,

    /// Creating the virtual environment failed
    #[error("failed to create virtual environment at {path}: {reason}")]
    CreateFailed { path: String, reason: String },

    /// Installing the dependency manifest failed
    #[error("failed to install dependencies from {manifest}: {reason}")]
    InstallFailed { manifest: String, reason: String },

    /// Subprocess error
    #[error("command failed: {0}")]
    Exec(#[from] specforge_exec::ExecError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
