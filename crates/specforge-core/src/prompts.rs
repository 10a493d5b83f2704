//! Prompt text for the three request stages.
//!
//! Wording is tuned by hand; only the response layout each system text asks
//! for is load-bearing, since responses go through [`crate::protocol::parse`].

use crate::domain::{Artifact, UnitKind, UnitSet};
use crate::protocol::{self, MANIFEST_FILENAME};

const RESPONSE_RULES: &str = "\
Do not comment on what you changed.
Do not add explanations, notes or any text outside the requested sections.
Your response must be a markdown document where every section header is a filename \
and every section body is a single fenced code block with that file's content.
End the response with the last code block.";

/// Render the requirements of `units` as markdown.
///
/// Void functions are left out when `include_void` is false so the test
/// suite never targets them.
pub fn requirements(units: &UnitSet, include_void: bool) -> String {
    let mut out = format!("# Requirements for file `{}`\n", units.code_filename());

    for unit in units.units.iter().filter(|u| u.is_callable()) {
        if unit.kind == UnitKind::VoidFunction && !include_void {
            continue;
        }
        let inputs = unit
            .parameters
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, p))
            .collect::<Vec<_>>()
            .join("\n");
        out.push_str(&format!(
            "\n## Requirements for function `{}`\n\n### Inputs\n\n{}\n\n### Output\n\n{}\n\n### Description\n\n{}\n",
            unit.name,
            if inputs.is_empty() { "None" } else { inputs.as_str() },
            unit.return_type.as_deref().unwrap_or("None"),
            unit.description.trim(),
        ));
        if !unit.examples.is_empty() {
            out.push_str("\n### Examples of expected behavior\n\n");
            for example in &unit.examples {
                out.push_str(&format!("- {example}\n"));
            }
        }
    }

    let mut types = units.of_kind(UnitKind::Type).peekable();
    if types.peek().is_some() {
        out.push_str("\n## Convert the following types into classes\n");
        for unit in types {
            out.push_str(&format!("\n### {}\n\n{}\n", unit.name, unit.description.trim()));
        }
    }
    out
}

fn layout_example(titles: &[(&str, &str)]) -> String {
    titles
        .iter()
        .map(|(title, lang)| format!("# {title}\n\n```{lang}\n<content>\n```\n"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// System text for drafting the code file and its dependency manifest.
pub fn draft_code_system(units: &UnitSet) -> String {
    let code = units.code_filename();
    format!(
        "You are a senior software engineer writing Python 3 functions from a markdown assignment.
Put each function's description in its docstring and add type hints where feasible.
Include every standard library import the code needs and follow PEP8.
List third-party dependencies in `{MANIFEST_FILENAME}` without pinning versions.
Types are given as a heading with the class name followed by CSV rows: the first row names \
the properties, the rest are example values. Give each class __str__, __repr__ and __eq__.
{RESPONSE_RULES}
The response must look exactly like this:

{}",
        layout_example(&[(code.as_str(), "py"), (MANIFEST_FILENAME, "txt")])
    )
}

/// System text for drafting the test suite.
pub fn draft_tests_system(units: &UnitSet) -> String {
    let test = units.test_filename();
    format!(
        "You are a senior software engineer writing a unittest suite for Python 3 functions \
described in a markdown assignment.
Create one TestCase per function whose tests match the listed examples exactly.
Functions are imported from `{}`. Mock the file system when a function touches files.
Include every standard library import the tests need and follow PEP8.
{RESPONSE_RULES}
The response must look exactly like this:

{}",
        units.code_filename(),
        layout_example(&[(test.as_str(), "py")])
    )
}

/// System text for a single-file analyzer fix.
pub fn static_fix_system(filename: &str) -> String {
    format!(
        "You are a senior software engineer fixing Python 3 code flagged by a static analyzer \
(pycodestyle and pyflakes).
Fix every reported finding and change nothing else.
{RESPONSE_RULES}
The response must look exactly like this:

{}",
        layout_example(&[(filename, "py")])
    )
}

/// User prompt for a single-file analyzer fix.
pub fn static_fix_prompt(file: &Artifact, findings: &str) -> String {
    format!(
        "{}# Analyzer findings\n\n```\n{}\n```\n",
        protocol::render(std::slice::from_ref(file)),
        findings.trim_end()
    )
}

/// System text for a test-driven correction.
pub fn correction_system(units: &UnitSet) -> String {
    let void_names = units.void_function_names();
    let untested = if void_names.is_empty() {
        String::new()
    } else {
        format!(
            "Do not reference the functions {} in `{}`.\n",
            void_names.join(", "),
            units.test_filename()
        )
    };
    format!(
        "You are a senior software engineer helping a colleague whose code fails its tests.
You get the requirements, the code, its dependencies, the unit tests and the test output.
Fix the mistakes in the code and the tests with as few changes as possible. Do not add new tests.
{untested}Make sure the result passes the tests, follows PEP8 and imports everything it uses.
List third-party dependencies in `{MANIFEST_FILENAME}` without pinning versions.
{RESPONSE_RULES}
The response must look exactly like this:

{}",
        layout_example(&[
            (units.code_filename().as_str(), "py"),
            (MANIFEST_FILENAME, "txt"),
            (units.test_filename().as_str(), "py"),
        ])
    )
}

/// User prompt for a test-driven correction.
pub fn correction_prompt(units: &UnitSet, current: &[Artifact], test_output: &str) -> String {
    let mut out = requirements(units, true);
    let void_names = units.void_function_names();
    if !void_names.is_empty() {
        out.push_str("\n## Do not test the following functions\n\n");
        for name in void_names {
            out.push_str(&format!("- {name}\n"));
        }
    }
    out.push('\n');
    out.push_str(&protocol::render(current));
    out.push_str("# Test Results\n\n");
    out.push_str(test_output);
    out
}
