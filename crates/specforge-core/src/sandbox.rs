//! Sandbox test executor.
//!
//! Runs a candidate's test file as a subprocess inside its workspace, after
//! preparing the workspace's isolated environment when a dependency
//! manifest is present.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use specforge_exec::{CommandRunner, CommandSpec, ExecError};
use tracing::{debug, info, warn};
use venv_env_manager::{EnvProvisioner, EnvSlot};

use crate::config::SandboxConfig;
use crate::domain::{ArtifactSet, ForgeError, Result};

/// Classified result of one test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TestOutcome {
    Passed { output: String },
    Failed { output: String },
    /// The run could not complete; says nothing about the code.
    ExecutionError { reason: String },
}

impl TestOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TestOutcome::Passed { .. } => "passed",
            TestOutcome::Failed { .. } => "failed",
            TestOutcome::ExecutionError { .. } => "execution_error",
        }
    }
}

/// Substrings of test output that mark a failed run.
///
/// Matching is a plain substring test on stdout followed by stderr, the
/// contract of Python's `unittest` runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureMarkers {
    markers: Vec<String>,
}

impl Default for FailureMarkers {
    fn default() -> Self {
        Self::new(["FAILED", "Traceback"])
    }
}

impl FailureMarkers {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn classify(&self, output: String) -> TestOutcome {
        if self.markers.iter().any(|m| output.contains(m.as_str())) {
            TestOutcome::Failed { output }
        } else {
            TestOutcome::Passed { output }
        }
    }
}

/// Runs a candidate's tests.
#[async_trait]
pub trait TestHarness: Send + Sync {
    /// `Err(ExecutionTimeout)` when the run was killed; every other
    /// incomplete run is an `Ok(ExecutionError)`.
    async fn run(&self, files: &ArtifactSet, env: &mut EnvSlot, workdir: &Path)
        -> Result<TestOutcome>;
}

/// Run `harness`, folding indeterminate errors (timeouts) into
/// [`TestOutcome::ExecutionError`].
pub async fn observe(
    harness: &dyn TestHarness,
    files: &ArtifactSet,
    env: &mut EnvSlot,
    workdir: &Path,
) -> Result<TestOutcome> {
    match harness.run(files, env, workdir).await {
        Err(err) if err.is_indeterminate() => Ok(TestOutcome::ExecutionError {
            reason: err.to_string(),
        }),
        other => other,
    }
}

/// Subprocess-backed [`TestHarness`].
pub struct SandboxExecutor {
    provisioner: Arc<dyn EnvProvisioner>,
    markers: FailureMarkers,
    timeout_secs: u64,
}

impl SandboxExecutor {
    pub fn new(provisioner: Arc<dyn EnvProvisioner>, config: &SandboxConfig) -> Self {
        Self {
            provisioner,
            markers: FailureMarkers::new(config.failure_markers.iter().cloned()),
            timeout_secs: config.test_timeout_secs,
        }
    }
}

#[async_trait]
impl TestHarness for SandboxExecutor {
    async fn run(
        &self,
        files: &ArtifactSet,
        env: &mut EnvSlot,
        workdir: &Path,
    ) -> Result<TestOutcome> {
        let python = env
            .prepare(self.provisioner.as_ref(), workdir, files.manifest.as_deref())
            .await?;

        let spec = CommandSpec::new("unit_tests", python)
            .path_arg(&files.test)
            .arg("-f")
            .current_dir(workdir)
            .timeout_secs(self.timeout_secs);
        info!(command = %spec.display_command(), "running test suite");

        match CommandRunner::execute(&spec).await {
            Ok(output) => {
                let outcome = self.markers.classify(output.combined());
                debug!(
                    outcome = outcome.label(),
                    exit_code = output.exit_code,
                    duration_ms = output.duration_ms,
                    "test suite finished"
                );
                Ok(outcome)
            }
            Err(ExecError::Timeout { limit_secs, .. }) => {
                warn!(limit_secs, "test suite timed out");
                Err(ForgeError::ExecutionTimeout { limit_secs })
            }
            Err(err) => {
                warn!(error = %err, "test suite could not run");
                Ok(TestOutcome::ExecutionError {
                    reason: err.to_string(),
                })
            }
        }
    }
}
