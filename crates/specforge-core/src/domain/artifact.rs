//! File artifacts produced by the generation service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// What an artifact is for, assigned when a document is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Code,
    Test,
    Manifest,
}

impl Role {
    /// Info string used on the code fence.
    pub fn fence_language(&self) -> &'static str {
        match self {
            Role::Code | Role::Test => "py",
            Role::Manifest => "txt",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Code => "code",
            Role::Test => "test",
            Role::Manifest => "manifest",
        };
        write!(f, "{s}")
    }
}

/// One titled section of a parsed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub role: Role,
    /// Path relative to the target directory.
    pub filename: String,
    pub content: String,
}

impl Artifact {
    pub fn new(role: Role, filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role,
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// Files of one candidate on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub code: PathBuf,
    pub test: PathBuf,
    pub manifest: Option<PathBuf>,
}

impl ArtifactSet {
    /// Every file the static analyzer should inspect.
    pub fn sources(&self) -> Vec<PathBuf> {
        vec![self.code.clone(), self.test.clone()]
    }

    pub fn path_of(&self, role: Role) -> Option<&Path> {
        match role {
            Role::Code => Some(&self.code),
            Role::Test => Some(&self.test),
            Role::Manifest => self.manifest.as_deref(),
        }
    }
}
