//! Compilation units: the immutable input of every stage.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use super::error::{ForgeError, Result};

/// Kind of a compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Function with a declared return type.
    Function,
    /// Function without a return type; excluded from generated tests.
    VoidFunction,
    /// Data type converted into a class.
    Type,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitKind::Function => "func",
            UnitKind::VoidFunction => "void func",
            UnitKind::Type => "type",
        };
        write!(f, "{s}")
    }
}

/// One function, void function or type extracted from a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationUnit {
    pub kind: UnitKind,
    pub name: String,
    /// Parameters as written, e.g. `n: int`.
    pub parameters: Vec<String>,
    /// `None` for void functions and types.
    pub return_type: Option<String>,
    /// Markdown description; for types the definition body.
    pub description: String,
    /// Example bullets, markdown markers stripped.
    pub examples: Vec<String>,
    /// File the type body was read from, relative to the source document.
    pub file_reference: Option<PathBuf>,
}

impl CompilationUnit {
    /// Function unit with a return type.
    pub fn function(
        name: impl Into<String>,
        parameters: Vec<String>,
        return_type: impl Into<String>,
    ) -> Self {
        Self {
            kind: UnitKind::Function,
            name: name.into(),
            parameters,
            return_type: Some(return_type.into()),
            description: String::new(),
            examples: Vec::new(),
            file_reference: None,
        }
    }

    /// Function unit without a return type.
    pub fn void_function(name: impl Into<String>, parameters: Vec<String>) -> Self {
        Self {
            kind: UnitKind::VoidFunction,
            return_type: None,
            ..Self::function(name, parameters, "")
        }
    }

    /// Type unit with an inline definition body.
    pub fn type_def(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: UnitKind::Type,
            name: name.into(),
            parameters: Vec::new(),
            return_type: None,
            description: body.into(),
            examples: Vec::new(),
            file_reference: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    /// Whether this unit is a callable (void or not).
    pub fn is_callable(&self) -> bool {
        matches!(self.kind, UnitKind::Function | UnitKind::VoidFunction)
    }
}

/// Ordered units of one source document.
///
/// `name` is the collection name (the source file stem) and the prefix of
/// every generated filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSet {
    pub name: String,
    pub units: Vec<CompilationUnit>,
}

impl UnitSet {
    pub fn new(name: impl Into<String>, units: Vec<CompilationUnit>) -> Self {
        Self {
            name: name.into(),
            units,
        }
    }

    /// `{name}.py`
    pub fn code_filename(&self) -> String {
        format!("{}.py", self.name)
    }

    /// `{name}_test.py`
    pub fn test_filename(&self) -> String {
        format!("{}_test.py", self.name)
    }

    pub fn of_kind(&self, kind: UnitKind) -> impl Iterator<Item = &CompilationUnit> {
        self.units.iter().filter(move |u| u.kind == kind)
    }

    pub fn void_function_names(&self) -> Vec<&str> {
        self.of_kind(UnitKind::VoidFunction)
            .map(|u| u.name.as_str())
            .collect()
    }

    /// Reject unit sets that cannot seed a test suite.
    ///
    /// The set must be non-empty with unique names, and every function must
    /// carry a description and at least one example.
    pub fn sanity_check(&self) -> Result<()> {
        if self.units.is_empty() {
            return Err(ForgeError::InvalidSpecification(format!(
                "{} declares no functions or types",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for unit in &self.units {
            if !seen.insert(unit.name.as_str()) {
                return Err(ForgeError::InvalidSpecification(format!(
                    "{} `{}` is declared more than once",
                    unit.kind, unit.name
                )));
            }
            if unit.kind != UnitKind::Function {
                continue;
            }
            if unit.description.trim().is_empty() {
                return Err(ForgeError::InvalidSpecification(format!(
                    "func `{}` has no description",
                    unit.name
                )));
            }
            if unit.examples.is_empty() {
                return Err(ForgeError::InvalidSpecification(format!(
                    "func `{}` has no usage examples",
                    unit.name
                )));
            }
        }
        Ok(())
    }
}
