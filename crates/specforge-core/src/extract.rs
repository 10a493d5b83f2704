//! Compilation unit extraction from a markdown source document.
//!
//! ```text
//! # func fibonacci(n: int): int
//!
//! Description paragraphs.
//!
//! * fibonacci(1) = 1
//! * fibonacci(3) = 2
//!
//! # type Employee employees.csv
//! ```
//!
//! `# func name(args): ret` declares a function, `# func name(args)` a void
//! function and `# type Name [file]` a type whose body follows the heading
//! or is read from `file` next to the source document. Anything before the
//! first declaration is ignored.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use pulldown_cmark::{Event, HeadingLevel, Parser, Tag};

use crate::domain::{CompilationUnit, ForgeError, Result, UnitSet};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Title(String),
    List(Vec<String>),
    Text(String),
}

/// Top-level blocks of `source`, headings of level 1 as titles.
fn blocks(source: &str) -> Vec<Block> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current: Option<(Tag<'_>, Range<usize>)> = None;
    let mut items = Vec::new();

    for (event, range) in Parser::new(source).into_offset_iter() {
        match event {
            Event::Start(tag) => {
                if depth == 0 {
                    current = Some((tag, range));
                    items.clear();
                } else if depth == 1 && matches!(tag, Tag::Item) {
                    if let Some((Tag::List(_), _)) = &current {
                        items.push(strip_marker(&source[range]));
                    }
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth > 0 {
                    continue;
                }
                let Some((tag, range)) = current.take() else {
                    continue;
                };
                let raw = source[range].trim();
                out.push(match tag {
                    Tag::Heading {
                        level: HeadingLevel::H1,
                        ..
                    } => Block::Title(raw.trim_start_matches('#').trim().to_string()),
                    Tag::List(_) => Block::List(std::mem::take(&mut items)),
                    _ => Block::Text(raw.to_string()),
                });
            }
            Event::Rule if depth == 0 => {}
            _ if depth == 0 => {
                if !range.is_empty() {
                    out.push(Block::Text(source[range].trim().to_string()));
                }
            }
            _ => {}
        }
    }
    out
}

fn strip_marker(item: &str) -> String {
    let item = item.trim_start();
    let rest = if let Some(rest) = item
        .strip_prefix("- ")
        .or_else(|| item.strip_prefix("* "))
        .or_else(|| item.strip_prefix("+ "))
    {
        rest
    } else {
        let digits = item.chars().take_while(|c| c.is_ascii_digit()).count();
        item[digits..]
            .strip_prefix(". ")
            .or_else(|| item[digits..].strip_prefix(") "))
            .unwrap_or(item)
    };
    rest.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Split a parameter list on top-level commas.
fn split_parameters(list: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in list.chars() {
        match c {
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth -= 1,
            ',' if depth == 0 => {
                out.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    out.push(current);
    out.into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse `name(args)` or `name(args): ret` after the `func` keyword.
fn parse_signature(signature: &str) -> Result<CompilationUnit> {
    let invalid = || ForgeError::InvalidSpecification(format!("malformed func heading `{signature}`"));
    let open = signature.find('(').ok_or_else(invalid)?;
    let close = matching_paren(signature, open).ok_or_else(invalid)?;
    let name = signature[..open].trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(invalid());
    }
    let parameters = split_parameters(&signature[open + 1..close]);
    let tail = signature[close + 1..].trim();
    match tail.strip_prefix(':').map(str::trim) {
        Some(ret) if !ret.is_empty() => Ok(CompilationUnit::function(name, parameters, ret)),
        Some(_) => Err(invalid()),
        None if tail.is_empty() => Ok(CompilationUnit::void_function(name, parameters)),
        None => Err(invalid()),
    }
}

#[derive(Debug)]
enum Declaration {
    Func(CompilationUnit),
    Type {
        name: String,
        file: Option<PathBuf>,
    },
}

fn declaration(title: &str) -> Result<Option<Declaration>> {
    if let Some(signature) = title.strip_prefix("func ") {
        return parse_signature(signature.trim()).map(|u| Some(Declaration::Func(u)));
    }
    if let Some(rest) = title.strip_prefix("type ") {
        let mut parts = rest.split_whitespace();
        let name = parts.next().ok_or_else(|| {
            ForgeError::InvalidSpecification(format!("malformed type heading `{title}`"))
        })?;
        return Ok(Some(Declaration::Type {
            name: name.to_string(),
            file: parts.next().map(PathBuf::from),
        }));
    }
    Ok(None)
}

/// Extract the units of `source`, a document named `name` located in `base_dir`.
pub fn extract(source: &str, name: &str, base_dir: &Path) -> Result<UnitSet> {
    let mut units = Vec::new();
    let mut open: Option<(Declaration, Vec<String>, Vec<String>)> = None;

    for block in blocks(source) {
        match block {
            Block::Title(title) => {
                if let Some(decl) = declaration(&title)? {
                    if let Some(done) = open.take() {
                        units.push(finish(done, base_dir)?);
                    }
                    open = Some((decl, Vec::new(), Vec::new()));
                    continue;
                }
                if let Some((_, description, examples)) = open.as_mut() {
                    push_text(description, examples, format!("# {title}"))?;
                }
            }
            Block::List(items) => {
                if let Some((decl, description, examples)) = open.as_mut() {
                    match decl {
                        Declaration::Func(_) if examples.is_empty() => *examples = items,
                        Declaration::Func(unit) => {
                            return Err(ForgeError::InvalidSpecification(format!(
                                "func `{}` has more than one example list",
                                unit.name
                            )))
                        }
                        Declaration::Type { .. } => description.push(
                            items
                                .iter()
                                .map(|i| format!("- {i}"))
                                .collect::<Vec<_>>()
                                .join("\n"),
                        ),
                    }
                }
            }
            Block::Text(text) => {
                if let Some((decl, description, examples)) = open.as_mut() {
                    if let Declaration::Func(unit) = decl {
                        if !examples.is_empty() {
                            return Err(ForgeError::InvalidSpecification(format!(
                                "func `{}`: description must come before the usage examples",
                                unit.name
                            )));
                        }
                    }
                    description.push(text);
                }
            }
        }
    }
    if let Some(done) = open.take() {
        units.push(finish(done, base_dir)?);
    }
    Ok(UnitSet::new(name, units))
}

fn push_text(description: &mut Vec<String>, examples: &[String], text: String) -> Result<()> {
    if !examples.is_empty() {
        return Err(ForgeError::InvalidSpecification(
            "description must come before the usage examples".to_string(),
        ));
    }
    description.push(text);
    Ok(())
}

fn finish(
    (decl, description, examples): (Declaration, Vec<String>, Vec<String>),
    base_dir: &Path,
) -> Result<CompilationUnit> {
    let description = description.join("\n\n");
    match decl {
        Declaration::Func(unit) => {
            let mut unit = unit.with_description(description);
            unit.examples = examples;
            Ok(unit)
        }
        Declaration::Type { name, file: None } => Ok(CompilationUnit::type_def(name, description)),
        Declaration::Type {
            name,
            file: Some(file),
        } => {
            let path = base_dir.join(&file);
            let body = fs::read_to_string(&path).map_err(|e| {
                ForgeError::InvalidSpecification(format!(
                    "type `{name}`: failed to read {}: {e}",
                    path.display()
                ))
            })?;
            let mut unit = CompilationUnit::type_def(name, body.trim_end());
            unit.file_reference = Some(file);
            Ok(unit)
        }
    }
}

/// Read and extract a source file; the collection name is the file stem.
pub fn extract_file(path: &Path) -> Result<UnitSet> {
    let source = fs::read_to_string(path)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| {
            ForgeError::InvalidSpecification(format!("{} has no file name", path.display()))
        })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    extract(&source, &name, base_dir)
}
