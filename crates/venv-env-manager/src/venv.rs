//! Virtual environment creation and dependency installation
//!
//! [`VenvProvisioner`] shells out to `python -m venv` and `pip install`.
//! [`EnvSlot`] is the per-workspace handle that makes creation lazy and
//! one-shot, and skips reinstalls when the manifest has not changed.

use crate::error::EnvError;
use crate::interpreter::Interpreter;
use crate::{manifest_digest, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use specforge_exec::{CommandRunner, CommandSpec};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Provisioner configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VenvConfig {
    /// Directory name of the environment inside a workspace
    pub dir_name: String,
    /// Fail instead of falling back when creation or install fails
    pub strict: bool,
    /// Timeout for `python -m venv`
    pub create_timeout_secs: u64,
    /// Timeout for `pip install`
    pub install_timeout_secs: u64,
}

impl Default for VenvConfig {
    fn default() -> Self {
        VenvConfig {
            dir_name: "venv".to_string(),
            strict: false,
            create_timeout_secs: 60,
            install_timeout_secs: 120,
        }
    }
}

/// An isolated environment rooted inside a candidate workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolatedEnv {
    root: PathBuf,
}

impl IsolatedEnv {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        IsolatedEnv { root: root.into() }
    }

    /// Environment root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Interpreter inside the environment
    pub fn python(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("Scripts").join("python.exe")
        } else {
            self.root.join("bin").join("python")
        }
    }

    /// Package installer inside the environment
    pub fn pip(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("Scripts").join("pip.exe")
        } else {
            self.root.join("bin").join("pip")
        }
    }
}

/// Creates environments and installs manifests into them
#[async_trait]
pub trait EnvProvisioner: Send + Sync {
    /// Create a fresh environment at `root`
    async fn create(&self, root: &Path) -> Result<IsolatedEnv>;

    /// Install every package declared in `manifest` (no version pinning)
    async fn install(&self, env: &IsolatedEnv, manifest: &Path) -> Result<()>;

    /// Interpreter used when no environment is available
    fn base_interpreter(&self) -> &Interpreter;

    /// Directory name for environments inside a workspace
    fn env_dir_name(&self) -> &str {
        "venv"
    }

    /// Whether failures must propagate instead of being tolerated
    fn strict(&self) -> bool {
        false
    }
}

/// `python -m venv` + `pip` backed provisioner
pub struct VenvProvisioner {
    python: Interpreter,
    config: VenvConfig,
}

impl VenvProvisioner {
    /// Create a provisioner around a base interpreter
    pub fn new(python: Interpreter, config: VenvConfig) -> Self {
        VenvProvisioner { python, config }
    }

    /// Provisioner configuration
    pub fn config(&self) -> &VenvConfig {
        &self.config
    }
}

#[async_trait]
impl EnvProvisioner for VenvProvisioner {
    async fn create(&self, root: &Path) -> Result<IsolatedEnv> {
        info!("Creating virtual environment at {:?}", root);
        let spec = CommandSpec::new("venv_create", self.python.program.clone())
            .args(["-m", "venv"])
            .path_arg(root)
            .timeout_secs(self.config.create_timeout_secs);
        let output = CommandRunner::execute(&spec).await?;
        if !output.passed() {
            return Err(EnvError::CreateFailed {
                path: root.to_string_lossy().into_owned(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(IsolatedEnv::new(root))
    }

    async fn install(&self, env: &IsolatedEnv, manifest: &Path) -> Result<()> {
        info!("Installing requirements from {:?}", manifest);
        let spec = CommandSpec::new("pip_install", env.pip().to_string_lossy().into_owned())
            .args(["install", "--disable-pip-version-check", "--no-compile", "-r"])
            .path_arg(manifest)
            .timeout_secs(self.config.install_timeout_secs);
        let output = CommandRunner::execute(&spec).await?;
        if !output.passed() {
            return Err(EnvError::InstallFailed {
                manifest: manifest.to_string_lossy().into_owned(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn base_interpreter(&self) -> &Interpreter {
        &self.python
    }

    fn env_dir_name(&self) -> &str {
        &self.config.dir_name
    }

    fn strict(&self) -> bool {
        self.config.strict
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum SlotState {
    #[default]
    Untouched,
    Ready(IsolatedEnv),
    Unavailable,
}

/// Lazily created, reusable environment of one workspace
#[derive(Debug, Clone, Default)]
pub struct EnvSlot {
    state: SlotState,
    installed_manifest: Option<String>,
}

impl EnvSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The environment, once created
    pub fn env(&self) -> Option<&IsolatedEnv> {
        match &self.state {
            SlotState::Ready(env) => Some(env),
            _ => None,
        }
    }

    /// Whether creation was attempted (successfully or not)
    pub fn is_initialized(&self) -> bool {
        self.state != SlotState::Untouched
    }

    /// Prepare the environment for a test run and return the interpreter to use.
    ///
    /// Without a manifest nothing is created: an existing environment is
    /// reused, otherwise the base interpreter is returned. With a manifest the
    /// environment is created on first use (exactly once per slot) and the
    /// manifest installed unless its digest matches the last install.
    /// In non-strict mode creation and install failures are logged and the
    /// best available interpreter is returned.
    pub async fn prepare(
        &mut self,
        provisioner: &dyn EnvProvisioner,
        workspace: &Path,
        manifest: Option<&Path>,
    ) -> Result<String> {
        let Some(manifest) = manifest else {
            return Ok(self.interpreter(provisioner));
        };

        if self.state == SlotState::Untouched {
            let root = workspace.join(provisioner.env_dir_name());
            match provisioner.create(&root).await {
                Ok(env) => self.state = SlotState::Ready(env),
                Err(e) if provisioner.strict() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Failed to create virtual environment, using base interpreter");
                    self.state = SlotState::Unavailable;
                }
            }
        }

        if let SlotState::Ready(env) = &self.state {
            let digest = manifest_digest(manifest)?;
            if self.installed_manifest.as_deref() == Some(digest.as_str()) {
                debug!("Manifest unchanged, skipping install");
            } else {
                match provisioner.install(env, manifest).await {
                    Ok(()) => self.installed_manifest = Some(digest),
                    Err(e) if provisioner.strict() => return Err(e),
                    Err(e) => warn!(error = %e, "Failed to install requirements"),
                }
            }
        }

        Ok(self.interpreter(provisioner))
    }

    fn interpreter(&self, provisioner: &dyn EnvProvisioner) -> String {
        match &self.state {
            SlotState::Ready(env) => env.python().to_string_lossy().into_owned(),
            _ => provisioner.base_interpreter().program.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    struct CountingProvisioner {
        python: Interpreter,
        creates: AtomicU32,
        installs: AtomicU32,
        fail_create: bool,
        fail_install: bool,
        strict: bool,
    }

    impl CountingProvisioner {
        fn new() -> Self {
            CountingProvisioner {
                python: Interpreter::new("python3"),
                creates: AtomicU32::new(0),
                installs: AtomicU32::new(0),
                fail_create: false,
                fail_install: false,
                strict: false,
            }
        }
    }

    #[async_trait]
    impl EnvProvisioner for CountingProvisioner {
        async fn create(&self, root: &Path) -> Result<IsolatedEnv> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                return Err(EnvError::CreateFailed {
                    path: root.to_string_lossy().into_owned(),
                    reason: "no ensurepip".to_string(),
                });
            }
            Ok(IsolatedEnv::new(root))
        }

        async fn install(&self, _env: &IsolatedEnv, manifest: &Path) -> Result<()> {
            self.installs.fetch_add(1, Ordering::SeqCst);
            if self.fail_install {
                return Err(EnvError::InstallFailed {
                    manifest: manifest.to_string_lossy().into_owned(),
                    reason: "no matching distribution".to_string(),
                });
            }
            Ok(())
        }

        fn base_interpreter(&self) -> &Interpreter {
            &self.python
        }

        fn strict(&self) -> bool {
            self.strict
        }
    }

    #[tokio::test]
    async fn test_no_manifest_uses_base_interpreter() {
        let dir = tempdir().unwrap();
        let provisioner = CountingProvisioner::new();
        let mut slot = EnvSlot::new();

        let python = slot.prepare(&provisioner, dir.path(), None).await.unwrap();
        assert_eq!(python, "python3");
        assert_eq!(provisioner.creates.load(Ordering::SeqCst), 0);
        assert!(!slot.is_initialized());
    }

    #[tokio::test]
    async fn test_environment_created_once_and_reused() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("requirements.txt");
        std::fs::write(&manifest, "requests\n").unwrap();
        let provisioner = CountingProvisioner::new();
        let mut slot = EnvSlot::new();

        let first = slot
            .prepare(&provisioner, dir.path(), Some(&manifest))
            .await
            .unwrap();
        let second = slot
            .prepare(&provisioner, dir.path(), Some(&manifest))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert!(first.contains("venv"));
        assert_eq!(provisioner.creates.load(Ordering::SeqCst), 1);
        // Unchanged manifest is installed only once
        assert_eq!(provisioner.installs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_changed_manifest_is_reinstalled() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("requirements.txt");
        std::fs::write(&manifest, "requests\n").unwrap();
        let provisioner = CountingProvisioner::new();
        let mut slot = EnvSlot::new();

        slot.prepare(&provisioner, dir.path(), Some(&manifest))
            .await
            .unwrap();
        std::fs::write(&manifest, "requests\nnumpy\n").unwrap();
        slot.prepare(&provisioner, dir.path(), Some(&manifest))
            .await
            .unwrap();

        assert_eq!(provisioner.creates.load(Ordering::SeqCst), 1);
        assert_eq!(provisioner.installs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_strict_tolerates_create_failure() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("requirements.txt");
        std::fs::write(&manifest, "requests\n").unwrap();
        let mut provisioner = CountingProvisioner::new();
        provisioner.fail_create = true;
        let mut slot = EnvSlot::new();

        let python = slot
            .prepare(&provisioner, dir.path(), Some(&manifest))
            .await
            .unwrap();
        assert_eq!(python, "python3");
        slot.prepare(&provisioner, dir.path(), Some(&manifest))
            .await
            .unwrap();
        // Creation is not retried after a failure
        assert_eq!(provisioner.creates.load(Ordering::SeqCst), 1);
        assert_eq!(provisioner.installs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_strict_retries_failed_install_next_round() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("requirements.txt");
        std::fs::write(&manifest, "not-a-package\n").unwrap();
        let mut provisioner = CountingProvisioner::new();
        provisioner.fail_install = true;
        let mut slot = EnvSlot::new();

        slot.prepare(&provisioner, dir.path(), Some(&manifest))
            .await
            .unwrap();
        slot.prepare(&provisioner, dir.path(), Some(&manifest))
            .await
            .unwrap();
        assert_eq!(provisioner.installs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_strict_propagates_install_failure() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("requirements.txt");
        std::fs::write(&manifest, "not-a-package\n").unwrap();
        let mut provisioner = CountingProvisioner::new();
        provisioner.fail_install = true;
        provisioner.strict = true;
        let mut slot = EnvSlot::new();

        let err = slot
            .prepare(&provisioner, dir.path(), Some(&manifest))
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::InstallFailed { .. }));
    }

    #[test]
    fn test_isolated_env_paths() {
        let env = IsolatedEnv::new("/tmp/ws/venv");
        assert!(env.python().starts_with("/tmp/ws/venv"));
        assert!(env.pip().to_string_lossy().contains("pip"));
    }
}
