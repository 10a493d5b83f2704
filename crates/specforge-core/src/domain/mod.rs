//! Domain models for specforge.
//!
//! - `CompilationUnit` / `UnitSet`: immutable input extracted from a source document
//! - `Artifact` / `ArtifactSet`: generated files, tagged with their role
//! - `ForgeError`: the error taxonomy shared by every stage

pub mod artifact;
pub mod error;
pub mod unit;

pub use artifact::{Artifact, ArtifactSet, Role};
pub use error::{ForgeError, Result};
pub use unit::{CompilationUnit, UnitKind, UnitSet};
