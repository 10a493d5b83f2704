//! Subprocess stage definitions.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default timeout applied when none is given.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// A single command to run as a pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandSpec {
    /// Human-readable stage name (used in logs and errors).
    pub name: String,

    /// Executable to launch.
    pub program: String,

    /// Arguments passed to the executable.
    pub args: Vec<String>,

    /// Working directory; inherits the caller's when `None`.
    pub cwd: Option<PathBuf>,

    /// Timeout in seconds. Zero disables the timeout.
    pub timeout_secs: u64,
}

impl CommandSpec {
    /// Create a stage for `program` with the default timeout.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a path argument.
    pub fn path_arg(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run inside `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Override the timeout.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Render as a shell-like command line for logging.
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_defaults() {
        let spec = CommandSpec::new("lint", "python3");
        assert_eq!(spec.name, "lint");
        assert_eq!(spec.program, "python3");
        assert!(spec.args.is_empty());
        assert!(spec.cwd.is_none());
        assert_eq!(spec.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("tests", "python3")
            .path_arg(Path::new("/tmp/ws/fib_test.py"))
            .arg("-f")
            .current_dir("/tmp/ws")
            .timeout_secs(5);
        assert_eq!(spec.args, vec!["/tmp/ws/fib_test.py", "-f"]);
        assert_eq!(spec.cwd, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(spec.timeout_secs, 5);
        assert_eq!(spec.display_command(), "python3 /tmp/ws/fib_test.py -f");
    }

    #[test]
    fn test_command_spec_extend_args() {
        let spec = CommandSpec::new("pip", "pip").args(["install", "-r", "requirements.txt"]);
        assert_eq!(spec.args.len(), 3);
    }
}
