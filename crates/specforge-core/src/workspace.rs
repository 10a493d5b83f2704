//! Disposable per-candidate workspaces.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};
use venv_env_manager::EnvSlot;

use crate::domain::{Artifact, ArtifactSet, Result};
use crate::protocol;

/// Temporary directory owned by exactly one candidate.
///
/// Dropping the workspace removes the directory; [`teardown`](Self::teardown)
/// does the same but logs removal failures.
#[derive(Debug)]
pub struct CandidateWorkspace {
    index: usize,
    dir: TempDir,
    env: EnvSlot,
}

impl CandidateWorkspace {
    /// Create an empty workspace named `{name}_{index}_*` under the system
    /// temp directory.
    pub fn create(name: &str, index: usize) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{name}_{index}_"))
            .tempdir()?;
        debug!(candidate = index, path = %dir.path().display(), "workspace created");
        Ok(Self {
            index,
            dir,
            env: EnvSlot::new(),
        })
    }

    /// Create a workspace holding a first-stage document.
    pub fn with_artifacts(
        name: &str,
        index: usize,
        artifacts: &[Artifact],
    ) -> Result<(Self, ArtifactSet)> {
        let workspace = Self::create(name, index)?;
        let files = protocol::materialize_set(artifacts, workspace.path())?;
        Ok((workspace, files))
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory and environment slot, borrowed together for a test run.
    pub fn split(&mut self) -> (&Path, &mut EnvSlot) {
        (self.dir.path(), &mut self.env)
    }

    /// Copy the workspace to `dest`, leaving out the isolated environment.
    pub fn preserve(&self, dest: &Path, env_dir_name: &str) -> Result<()> {
        copy_tree(self.path(), dest, env_dir_name)?;
        debug!(candidate = self.index, dest = %dest.display(), "workspace preserved");
        Ok(())
    }

    /// Remove the workspace directory.
    pub fn teardown(self) {
        let index = self.index;
        if let Err(e) = self.dir.close() {
            warn!(candidate = index, error = %e, "failed to remove workspace");
        }
    }
}

fn copy_tree(src: &Path, dest: &Path, skip: &str) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == skip {
            continue;
        }
        let target: PathBuf = dest.join(&name);
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target, skip)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
