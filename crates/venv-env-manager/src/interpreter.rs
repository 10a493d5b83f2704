//! Python interpreter discovery

use crate::error::EnvError;
use crate::Result;
use std::process::Command;
use tracing::debug;

/// Candidate executable names, in preference order
const PYTHON_NAMES: &[&str] = &["python", "python3"];

/// A base Python interpreter used to create environments and run tests
/// when no isolated environment exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    /// Executable name or path
    pub program: String,
}

impl Interpreter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl std::fmt::Display for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)
    }
}

/// Check whether `program --version` runs successfully
pub fn is_python_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Find the user's Python executable (`python` first, then `python3`)
pub fn detect_python() -> Result<Interpreter> {
    for name in PYTHON_NAMES {
        if is_python_available(name) {
            debug!(python = %name, "Detected Python interpreter");
            return Ok(Interpreter::new(*name));
        }
    }
    Err(EnvError::PythonNotFound)
}
