//! Run configuration.
//!
//! Precedence: built-in defaults < TOML file < environment < CLI flags.
//! The CLI applies the last layer itself; this module owns the first three.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use venv_env_manager::VenvConfig;

use crate::domain::{ForgeError, Result};
use crate::ledger::PricingTable;

/// Outer attempt loop and promotion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Full generate-and-race cycles before giving up.
    pub attempts: u32,
    /// Candidates raced per attempt.
    pub parallel: usize,
    /// Skip repair and racing; write the first valid draft.
    pub quick: bool,
    /// Preserve failed candidate workspaces next to the output.
    pub debug: bool,
    /// Write `stats.md` to the output directory.
    pub stats: bool,
    /// Append the runtime entry-point helper to the promoted code file.
    pub include_helper: bool,
    /// Validate the unit set before the first generation call.
    pub sanity_check: bool,
    /// Where promoted files land.
    pub output_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            attempts: 1,
            parallel: 3,
            quick: false,
            debug: false,
            stats: false,
            include_helper: true,
            sanity_check: true,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Generation service connection and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub organization: Option<String>,
    /// Model used for drafting and static fixes.
    pub model: String,
    /// Model used for corrections and after a context overflow.
    pub escalated_model: String,
    /// Tries per service request.
    pub max_tries: u32,
    /// Base delay of the exponential backoff between tries.
    pub backoff_base_ms: u64,
    /// Extra requests when a response violates the artifact protocol.
    pub protocol_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            organization: None,
            model: "gpt-3.5-turbo".to_string(),
            escalated_model: "gpt-4".to_string(),
            max_tries: 3,
            backoff_base_ms: 1_000,
            protocol_retries: 3,
        }
    }
}

/// Bounds of both repair loops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepairConfig {
    pub static_depth: u32,
    pub dynamic_depth: u32,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            static_depth: 4,
            dynamic_depth: 4,
        }
    }
}

/// Test execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    pub test_timeout_secs: u64,
    /// Output substrings that mark a failed test run.
    pub failure_markers: Vec<String>,
    /// Interpreter used when no environment exists; detected when unset.
    pub python: Option<String>,
    pub venv: VenvConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            test_timeout_secs: 60,
            failure_markers: vec!["FAILED".to_string(), "Traceback".to_string()],
            python: None,
            venv: VenvConfig::default(),
        }
    }
}

/// Static analyzer invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            program: "pylama".to_string(),
            args: vec!["--linters".to_string(), "pycodestyle,pyflakes".to_string()],
            timeout_secs: 60,
        }
    }
}

/// Everything a run needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForgeConfig {
    pub orchestrator: OrchestratorConfig,
    pub generation: GenerationConfig,
    pub repair: RepairConfig,
    pub sandbox: SandboxConfig,
    pub analyzer: AnalyzerConfig,
    pub pricing: PricingTable,
}

impl ForgeConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ForgeError::Config(e.to_string()))
    }

    /// Load a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Overlay environment variables from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Overlay variables from `lookup`.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty("OPENAI_SECRET_KEY").or_else(|| non_empty("OPENAI_API_KEY")) {
            self.generation.api_key = Some(key);
        }
        if let Some(org) = non_empty("OPENAI_ORG") {
            self.generation.organization = Some(org);
        }
        if let Some(base) = non_empty("SPECFORGE_API_BASE") {
            self.generation.api_base = base;
        }
        if let Some(model) = non_empty("SPECFORGE_MODEL") {
            self.generation.model = model;
        }
        if let Some(model) = non_empty("SPECFORGE_ESCALATED_MODEL") {
            self.pricing.escalated_prefix = model.clone();
            self.generation.escalated_model = model;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ForgeConfig::default();
        assert_eq!(config.orchestrator.attempts, 1);
        assert_eq!(config.orchestrator.parallel, 3);
        assert_eq!(config.repair.static_depth, 4);
        assert_eq!(config.repair.dynamic_depth, 4);
        assert_eq!(config.generation.max_tries, 3);
        assert_eq!(config.generation.protocol_retries, 3);
        assert_eq!(config.sandbox.test_timeout_secs, 60);
        assert_eq!(config.sandbox.venv.create_timeout_secs, 60);
        assert_eq!(config.sandbox.venv.install_timeout_secs, 120);
        assert_eq!(config.generation.model, "gpt-3.5-turbo");
        assert_eq!(config.generation.escalated_model, "gpt-4");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ForgeConfig::from_toml_str(
            r#"
            [orchestrator]
            attempts = 3
            parallel = 5

            [sandbox]
            failure_markers = ["FAILED", "Error"]

            [sandbox.venv]
            strict = true
            "#,
        )
        .unwrap();
        assert_eq!(config.orchestrator.attempts, 3);
        assert_eq!(config.orchestrator.parallel, 5);
        assert!(config.orchestrator.include_helper);
        assert_eq!(config.sandbox.failure_markers, vec!["FAILED", "Error"]);
        assert!(config.sandbox.venv.strict);
        assert_eq!(config.sandbox.venv.install_timeout_secs, 120);
        assert_eq!(config.repair, RepairConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let err = ForgeConfig::from_toml_str("[orchestrator\nattempts = ").unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-fallback"),
            ("OPENAI_SECRET_KEY", "sk-primary"),
            ("OPENAI_ORG", "org-1"),
            ("SPECFORGE_MODEL", "local-small"),
            ("SPECFORGE_ESCALATED_MODEL", "local-large"),
            ("SPECFORGE_API_BASE", "  "),
        ]
        .into_iter()
        .collect();
        let mut config = ForgeConfig::default();
        config.apply_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.generation.api_key.as_deref(), Some("sk-primary"));
        assert_eq!(config.generation.organization.as_deref(), Some("org-1"));
        assert_eq!(config.generation.model, "local-small");
        assert_eq!(config.generation.escalated_model, "local-large");
        assert_eq!(config.pricing.escalated_prefix, "local-large");
        // Blank values are ignored
        assert_eq!(config.generation.api_base, "https://api.openai.com/v1");
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut config = ForgeConfig::default();
        config.generation.api_key = Some("sk-secret".into());
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("sk-secret"));
    }
}
