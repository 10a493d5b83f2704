//! Subprocess execution with captured output and kill-on-timeout.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use crate::error::{ExecError, Result};
use crate::stage::CommandSpec;

/// Result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Stage name.
    pub stage_name: String,

    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the process exited successfully.
    pub success: bool,
}

impl CommandOutput {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Stdout followed by stderr, the way a terminal would interleave a
    /// runner that writes its report to stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Runs [`CommandSpec`]s as child processes.
pub struct CommandRunner;

impl CommandRunner {
    /// Execute a single stage and return its output.
    ///
    /// The child is spawned with `kill_on_drop`, so when the timeout fires the
    /// pending wait is dropped and the process is killed before
    /// [`ExecError::Timeout`] is returned.
    pub async fn execute(spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();

        if spec.program.is_empty() {
            return Err(ExecError::EmptyCommand(spec.name.clone()));
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        debug!(stage = %spec.name, command = %spec.display_command(), "spawning stage");
        let child = command.spawn().map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let output = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| ExecError::Timeout {
                stage: spec.name.clone(),
                limit_secs: spec.timeout_secs,
            })?
        } else {
            child.wait_with_output().await
        }
        .map_err(|source| ExecError::Io {
            stage: spec.name.clone(),
            source,
        })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);

        Ok(CommandOutput {
            stage_name: spec.name.clone(),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success: output.status.success(),
        })
    }
}
