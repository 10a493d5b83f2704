//! Venv-Env-Manager: Isolated Dependency Environments for specforge
//!
//! This crate provides the environment layer for candidate workspaces.
//! Each candidate gets at most one virtual environment, created lazily the
//! first time its dependency manifest has to be installed and reused on every
//! repair round afterwards.
//!
//! Focus: lazy creation, unpinned manifest installs, tolerant (non-strict) failure.

pub mod error;
pub mod interpreter;
pub mod venv;

pub use error::EnvError;
pub use interpreter::{detect_python, is_python_available, Interpreter};
pub use venv::{EnvProvisioner, EnvSlot, IsolatedEnv, VenvConfig, VenvProvisioner};

use sha2::{Digest, Sha256};
use std::path::Path;

/// Result type for environment operations
pub type Result<T> = std::result::Result<T, EnvError>;

/// Generate a digest of a dependency manifest
///
/// Blank lines and surrounding whitespace are ignored so that a repair round
/// which only reformats the manifest does not trigger a reinstall.
pub fn manifest_digest(manifest: &Path) -> Result<String> {
    let content = std::fs::read_to_string(manifest)?;
    let mut hasher = Sha256::new();
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_manifest_digest_deterministic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("requirements.txt");
        std::fs::write(&path, "requests\nnumpy\n").unwrap();

        let d1 = manifest_digest(&path).unwrap();
        let d2 = manifest_digest(&path).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64); // SHA256 hex
    }

    #[test]
    fn test_manifest_digest_ignores_blank_lines() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "requests\nnumpy\n").unwrap();
        std::fs::write(&b, "\n  requests  \n\nnumpy").unwrap();

        assert_eq!(manifest_digest(&a).unwrap(), manifest_digest(&b).unwrap());
    }

    #[test]
    fn test_changing_dependency_changes_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("requirements.txt");

        std::fs::write(&path, "requests\n").unwrap();
        let d1 = manifest_digest(&path).unwrap();

        std::fs::write(&path, "requests\npandas\n").unwrap();
        let d2 = manifest_digest(&path).unwrap();

        assert_ne!(d1, d2);
    }

    #[test]
    fn test_missing_manifest_is_io_error() {
        let dir = tempdir().unwrap();
        let err = manifest_digest(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, EnvError::Io(_)));
    }
}
