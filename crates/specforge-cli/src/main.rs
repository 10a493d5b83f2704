//! specforge - compile a markdown source document into tested code
//!
//! ```text
//! specforge fibonacci.md -a 2 -n 3 --stats
//! ```
//!
//! Drafts `-n` candidates per attempt, repairs them against the static
//! analyzer and their own test suite, and writes the first passing one to
//! the output directory.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};

use specforge_core::{extract_file, pretty_duration, ForgeConfig, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "specforge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Speculative, self-correcting code generation", long_about = None)]
struct Cli {
    /// Source document declaring the functions and types to generate
    source: PathBuf,

    /// Keep failed candidate workspaces and log verbosely
    #[arg(short, long)]
    debug: bool,

    /// Write the first valid draft without repairing or testing it
    #[arg(short, long = "quick-and-dirty")]
    quick_and_dirty: bool,

    /// Generate-and-race cycles before giving up
    #[arg(short, long)]
    attempts: Option<u32>,

    /// Candidates raced per attempt
    #[arg(short = 'n', long = "n-parallel-executions")]
    n_parallel_executions: Option<usize>,

    /// Write stats.md to the output directory
    #[arg(short, long)]
    stats: bool,

    /// Do not append the command-line entry point to the generated code
    #[arg(long)]
    exclude_main_helper: bool,

    /// Skip validation of the source document
    #[arg(long)]
    exclude_sanity_check: bool,

    /// Where generated files are written
    #[arg(short, long, env = "SPECFORGE_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "SPECFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Defaults < config file < environment < flags.
    fn forge_config(&self) -> Result<ForgeConfig> {
        let mut config = match &self.config {
            Some(path) => ForgeConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ForgeConfig::default(),
        };
        config.apply_env();

        let orchestrator = &mut config.orchestrator;
        if let Some(attempts) = self.attempts {
            orchestrator.attempts = attempts;
        }
        if let Some(parallel) = self.n_parallel_executions {
            orchestrator.parallel = parallel;
        }
        if let Some(dir) = &self.output_dir {
            orchestrator.output_dir = dir.clone();
        }
        orchestrator.debug |= self.debug;
        orchestrator.quick |= self.quick_and_dirty;
        orchestrator.stats |= self.stats;
        if self.exclude_main_helper {
            orchestrator.include_helper = false;
        }
        if self.exclude_sanity_check {
            orchestrator.sanity_check = false;
        }
        Ok(config)
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.forge_config()?;
    let units = extract_file(&cli.source)
        .with_context(|| format!("Failed to read {}", cli.source.display()))?;
    info!(
        name = %units.name,
        units = units.units.len(),
        attempts = config.orchestrator.attempts,
        parallel = config.orchestrator.parallel,
        "compiling"
    );

    let forge = Orchestrator::from_config(config).context("Failed to set up the pipeline")?;
    let compilation = forge.compile(&units).await?;

    let files: Vec<String> = compilation
        .files
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    info!(
        name = %units.name,
        attempt = compilation.attempt,
        files = %serde_json::to_string(&files)?,
        elapsed = %pretty_duration(compilation.stats.total_time),
        total_cost = %format!("{:.2}", compilation.stats.total_cost),
        "done"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    specforge_core::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "compilation failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("specforge.toml");
        std::fs::write(
            &path,
            "[orchestrator]\nattempts = 5\nparallel = 4\n\n[repair]\nstatic_depth = 2\n",
        )
        .unwrap();

        let cli = Cli::parse_from([
            "specforge",
            "fib.md",
            "-a",
            "2",
            "--exclude-main-helper",
            "--config",
            path.to_str().unwrap(),
        ]);
        let config = cli.forge_config().unwrap();
        assert_eq!(config.orchestrator.attempts, 2);
        assert_eq!(config.orchestrator.parallel, 4);
        assert_eq!(config.repair.static_depth, 2);
        assert!(!config.orchestrator.include_helper);
        assert!(config.orchestrator.sanity_check);
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::parse_from(["specforge", "fib.md", "-d", "-q", "-s", "-n", "5"]);
        assert!(cli.debug && cli.quick_and_dirty && cli.stats);
        assert_eq!(cli.n_parallel_executions, Some(5));
        let config = cli.forge_config().unwrap();
        assert!(config.orchestrator.quick);
        assert_eq!(config.orchestrator.parallel, 5);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["specforge", "fib.md", "--config", "/nonexistent/x.toml"]);
        assert!(cli.forge_config().is_err());
    }
}
