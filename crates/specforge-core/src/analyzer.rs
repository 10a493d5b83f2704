//! Static analyzer seam.
//!
//! [`CommandAnalyzer`] runs pylama (pycodestyle + pyflakes) and parses its
//! report. Style-only codes listed in [`IGNORED_CODES`] are dropped by the
//! repair loop: the analyzer is only there to catch compile-like errors.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use specforge_exec::{CommandRunner, CommandSpec};
use tracing::debug;

use crate::config::AnalyzerConfig;
use crate::domain::{ForgeError, Result};

/// Finding codes that never trigger a repair.
pub const IGNORED_CODES: &[&str] = &[
    // indentation and continuation lines
    "E111", "E117", "E126", "E127", "E128", "E129", "E131", "E133",
    // whitespace
    "E201", "E202", "E203", "E211", "E221", "E222", "E223", "E224", "E225", "E226", "E227",
    "E228", "E231", "E241", "E242", "E251", "E252", "E261", "E262", "E265", "E266", "E271",
    "E272", "E273", "E274", "E275",
    // blank lines
    "E301", "E302", "E303", "E304", "E305", "E306",
    // imports, line length, statements
    "E401", "E501", "E502", "E701", "E702", "E703", "E722", "E731",
    // whitespace warnings
    "W191", "W291", "W292", "W293", "W391",
    // pyflakes: reimports, late future imports, unused names
    "W0404", "W0410", "W0611", "W0612",
];

pub fn is_ignored(code: &str) -> bool {
    IGNORED_CODES.contains(&code)
}

/// One analyzer finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub filename: PathBuf,
    pub line: u32,
    pub column: u32,
    pub code: String,
    pub message: String,
}

impl Finding {
    /// Whether this finding belongs to `path`, tolerating relative reports.
    pub fn concerns(&self, path: &Path) -> bool {
        self.filename == path
            || path.ends_with(&self.filename)
            || (self.filename.file_name().is_some() && self.filename.file_name() == path.file_name())
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{} {} {}",
            self.filename.display(),
            self.line,
            self.column,
            self.code,
            self.message
        )
    }
}

/// External analyzer.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, files: &[PathBuf]) -> Result<Vec<Finding>>;
}

// path:line:col[:] [[E]] CODE message [linter]
const REPORT_LINE: &str = r"^(?P<file>.+?):(?P<line>\d+):(?P<col>\d+):?\s+(?:\[\w\]\s+)?(?P<code>[A-Z]\d{3,4})\s+(?P<msg>.*?)(?:\s+\[[\w-]+\])?\s*$";

fn pattern_error(e: &regex::Error) -> ForgeError {
    ForgeError::Analyzer(format!("invalid report pattern: {e}"))
}

fn report_line() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(REPORT_LINE))
        .as_ref()
        .map_err(pattern_error)
}

/// Parse a pylama/pycodestyle style report.
pub fn parse_report(output: &str) -> Result<Vec<Finding>> {
    let pattern = report_line()?;
    Ok(output
        .lines()
        .filter_map(|line| {
            let caps = pattern.captures(line.trim_end())?;
            Some(Finding {
                filename: PathBuf::from(&caps["file"]),
                line: caps["line"].parse().ok()?,
                column: caps["col"].parse().ok()?,
                code: caps["code"].to_string(),
                message: caps["msg"].to_string(),
            })
        })
        .collect())
}

/// Subprocess-backed analyzer.
pub struct CommandAnalyzer {
    config: AnalyzerConfig,
}

impl CommandAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Analyzer for CommandAnalyzer {
    async fn analyze(&self, files: &[PathBuf]) -> Result<Vec<Finding>> {
        let mut spec = CommandSpec::new("static_analysis", self.config.program.clone())
            .args(self.config.args.iter().cloned())
            .timeout_secs(self.config.timeout_secs);
        for file in files {
            spec = spec.path_arg(file);
        }
        if let Some(dir) = files.first().and_then(|f| f.parent()) {
            spec = spec.current_dir(dir);
        }

        let output = CommandRunner::execute(&spec)
            .await
            .map_err(|e| ForgeError::Analyzer(e.to_string()))?;
        let findings = parse_report(&output.stdout)?;
        debug!(
            findings = findings.len(),
            exit_code = output.exit_code,
            "static analysis finished"
        );
        if findings.is_empty() && !output.passed() {
            return Err(ForgeError::Analyzer(format!(
                "{} exited with {}: {}",
                self.config.program,
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pylama_report() {
        let report = "\
/tmp/ws/fib.py:3:1 [E] E302 expected 2 blank lines, found 1 [pycodestyle]
/tmp/ws/fib.py:7:12 [E] E0602 undefined name 'math' [pyflakes]
fib_test.py:1:1: W0611 'os' imported but unused [pyflakes]
this line is noise
";
        let findings = parse_report(report).unwrap();
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[1].code, "E0602");
        assert_eq!(findings[1].line, 7);
        assert_eq!(findings[1].column, 12);
        assert_eq!(findings[1].message, "undefined name 'math'");
        assert_eq!(findings[2].filename, PathBuf::from("fib_test.py"));
    }

    #[test]
    fn test_bad_report_pattern_is_analyzer_error() {
        let err = pattern_error(&Regex::new("(?P<file>").unwrap_err());
        assert!(
            matches!(err, ForgeError::Analyzer(ref msg) if msg.starts_with("invalid report pattern"))
        );
        assert!(parse_report("").unwrap().is_empty());
    }

    #[test]
    fn test_ignore_list() {
        assert!(is_ignored("E501"));
        assert!(is_ignored("W0611"));
        assert!(!is_ignored("E0602"));
        assert!(!is_ignored("E999"));
    }

    #[test]
    fn test_finding_matches_relative_paths() {
        let finding = parse_report("fib.py:1:1 [E] E0602 undefined name 'x' [pyflakes]")
            .unwrap()
            .pop()
            .unwrap();
        assert!(finding.concerns(Path::new("/tmp/ws/fib.py")));
        assert!(!finding.concerns(Path::new("/tmp/ws/fib_test.py")));
    }

    #[tokio::test]
    async fn test_command_analyzer_parses_stdout() {
        let config = AnalyzerConfig {
            program: "echo".into(),
            args: vec!["fib.py:2:5 [E] E0602 undefined name 'y' [pyflakes]".into()],
            timeout_secs: 5,
        };
        let findings = CommandAnalyzer::new(config).analyze(&[]).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code, "E0602");
    }

    #[tokio::test]
    async fn test_failing_analyzer_without_report_is_error() {
        let config = AnalyzerConfig {
            program: "false".into(),
            args: vec![],
            timeout_secs: 5,
        };
        let err = CommandAnalyzer::new(config).analyze(&[]).await.unwrap_err();
        assert!(matches!(err, ForgeError::Analyzer(_)));
    }
}
