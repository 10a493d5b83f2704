//! Artifact wire protocol.
//!
//! Documents exchanged with the generation service are markdown: a sequence
//! of top-level `heading, fenced code block` pairs where the heading is the
//! filename and the block is the file content. Validation is purely
//! structural and happens before anything touches the filesystem.
//!
//! Two shapes are accepted:
//! - [`Shape::FirstStage`]: `{name}.py`, optional `requirements.txt`, `{name}_test.py`
//! - [`Shape::SecondStage`]: exactly one file

use std::fs;
use std::path::{Component, Path, PathBuf};

use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag};
use tracing::debug;

use crate::domain::{Artifact, ArtifactSet, ForgeError, Role};

pub const MANIFEST_FILENAME: &str = "requirements.txt";

/// Structural validation failure. The document is discarded as a whole.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("expected {expected} sections, found {found}")]
    SectionCount { found: usize, expected: String },

    #[error("section {position} must be a {expected}")]
    SectionKind {
        position: usize,
        expected: &'static str,
    },

    #[error("section {position} must be titled `{expected}`, found `{found}`")]
    Title {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("`{filename}` has an empty body")]
    EmptyArtifact { filename: String },

    #[error("document has no {role} file")]
    MissingRole { role: Role },
}

/// Expected document shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Full generation or correction: code, optional manifest, tests.
    FirstStage { name: String },
    /// Single-file repair of `filename`.
    SecondStage { filename: String, role: Role },
}

impl Shape {
    pub fn first_stage(name: impl Into<String>) -> Self {
        Shape::FirstStage { name: name.into() }
    }

    pub fn second_stage(filename: impl Into<String>, role: Role) -> Self {
        Shape::SecondStage {
            filename: filename.into(),
            role,
        }
    }

    /// Accepted title/role sequences, one per valid section count.
    fn layouts(&self) -> Vec<Vec<(String, Role)>> {
        match self {
            Shape::FirstStage { name } => {
                let code = (format!("{name}.py"), Role::Code);
                let test = (format!("{name}_test.py"), Role::Test);
                let manifest = (MANIFEST_FILENAME.to_string(), Role::Manifest);
                vec![
                    vec![code.clone(), test.clone()],
                    vec![code, manifest, test],
                ]
            }
            Shape::SecondStage { filename, role } => vec![vec![(filename.clone(), *role)]],
        }
    }

    fn expected_counts(&self) -> String {
        self.layouts()
            .iter()
            .map(|l| (l.len() * 2).to_string())
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

#[derive(Debug)]
enum Block {
    Heading(String),
    Code(String),
    Other,
}

/// Split a document into its top-level blocks.
fn blocks(doc: &str) -> Vec<Block> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    for event in Parser::new(doc) {
        match event {
            Event::Start(tag) => {
                if depth == 0 {
                    out.push(match tag {
                        Tag::Heading { .. } => Block::Heading(String::new()),
                        Tag::CodeBlock(CodeBlockKind::Fenced(_)) => Block::Code(String::new()),
                        _ => Block::Other,
                    });
                }
                depth += 1;
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Text(text) | Event::Code(text) if depth > 0 => match out.last_mut() {
                Some(Block::Heading(buf)) | Some(Block::Code(buf)) => buf.push_str(&text),
                _ => {}
            },
            _ if depth == 0 => out.push(Block::Other),
            _ => {}
        }
    }
    out
}

/// Validate `doc` against `shape` and return its sections in order.
pub fn parse(doc: &str, shape: &Shape) -> Result<Vec<Artifact>, ProtocolViolation> {
    let blocks = blocks(doc);
    let layout = shape
        .layouts()
        .into_iter()
        .find(|l| l.len() * 2 == blocks.len())
        .ok_or_else(|| ProtocolViolation::SectionCount {
            found: blocks.len(),
            expected: shape.expected_counts(),
        })?;

    let mut artifacts = Vec::with_capacity(layout.len());
    for (i, ((expected, role), pair)) in layout.into_iter().zip(blocks.chunks(2)).enumerate() {
        let title = match &pair[0] {
            Block::Heading(title) => title.trim(),
            _ => {
                return Err(ProtocolViolation::SectionKind {
                    position: i * 2,
                    expected: "heading",
                })
            }
        };
        let body = match &pair[1] {
            Block::Code(body) => body,
            _ => {
                return Err(ProtocolViolation::SectionKind {
                    position: i * 2 + 1,
                    expected: "fenced code block",
                })
            }
        };
        if title != expected {
            return Err(ProtocolViolation::Title {
                position: i * 2,
                expected,
                found: title.to_string(),
            });
        }
        // Only the manifest may legitimately be empty ("no dependencies").
        if role != Role::Manifest && body.trim().is_empty() {
            return Err(ProtocolViolation::EmptyArtifact { filename: expected });
        }
        artifacts.push(Artifact::new(role, expected, body.clone()));
    }
    Ok(artifacts)
}

/// Render artifacts back into a document. Inverse of [`parse`].
pub fn render(artifacts: &[Artifact]) -> String {
    let mut out = String::new();
    for artifact in artifacts {
        let longest_run = artifact
            .content
            .split(|c| c != '`')
            .map(str::len)
            .max()
            .unwrap_or(0);
        let fence = "`".repeat(longest_run.max(2) + 1);
        out.push_str(&format!("# {}\n\n", artifact.filename));
        out.push_str(&fence);
        out.push_str(artifact.role.fence_language());
        out.push('\n');
        out.push_str(&artifact.content);
        if !artifact.content.is_empty() && !artifact.content.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&fence);
        out.push_str("\n\n");
    }
    out
}

fn checked_join(dir: &Path, filename: &str) -> std::io::Result<PathBuf> {
    let relative = Path::new(filename);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("artifact path escapes target directory: {filename}"),
        ));
    }
    Ok(dir.join(relative))
}

/// Write artifacts under `dir`.
///
/// Artifacts with an empty body are skipped and left out of the returned
/// list ("no file needed").
pub fn materialize(artifacts: &[Artifact], dir: &Path) -> std::io::Result<Vec<(Role, PathBuf)>> {
    let mut targets = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        if artifact.content.trim().is_empty() {
            debug!(file = %artifact.filename, "skipping empty artifact");
            continue;
        }
        targets.push((artifact, checked_join(dir, &artifact.filename)?));
    }

    let mut written = Vec::with_capacity(targets.len());
    for (artifact, path) in targets {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &artifact.content)?;
        written.push((artifact.role, path));
    }
    Ok(written)
}

/// [`materialize`] a first-stage document and collect the written files.
pub fn materialize_set(artifacts: &[Artifact], dir: &Path) -> Result<ArtifactSet, ForgeError> {
    for role in [Role::Code, Role::Test] {
        if !artifacts.iter().any(|a| a.role == role) {
            return Err(ProtocolViolation::MissingRole { role }.into());
        }
    }
    let written = materialize(artifacts, dir)?;
    let find = |role: Role| {
        written
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, path)| path.clone())
    };
    match (find(Role::Code), find(Role::Test)) {
        (Some(code), Some(test)) => Ok(ArtifactSet {
            code,
            test,
            manifest: find(Role::Manifest),
        }),
        (None, _) => Err(ProtocolViolation::MissingRole { role: Role::Code }.into()),
        (_, None) => Err(ProtocolViolation::MissingRole { role: Role::Test }.into()),
    }
}

/// Read an artifact set back from disk, filenames relative to `root`.
pub fn collect(set: &ArtifactSet, root: &Path) -> std::io::Result<Vec<Artifact>> {
    let mut out = Vec::with_capacity(3);
    for role in [Role::Code, Role::Manifest, Role::Test] {
        let Some(path) = set.path_of(role) else {
            continue;
        };
        let filename = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        out.push(Artifact::new(role, filename, fs::read_to_string(path)?));
    }
    Ok(out)
}
