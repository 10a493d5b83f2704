//! specforge-exec - subprocess stages for the generation pipeline
//!
//! Provides the process runner the orchestration engine builds on:
//! - Describes a command as a [`CommandSpec`] (program, args, cwd, timeout)
//! - Spawns it with piped stdout/stderr
//! - Kills the child when the timeout expires

pub mod error;
pub mod runner;
pub mod stage;

// Re-export key types
pub use error::{ExecError, Result};
pub use runner::{CommandOutput, CommandRunner};
pub use stage::CommandSpec;
