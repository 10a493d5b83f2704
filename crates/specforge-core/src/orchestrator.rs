//! Outer attempt loop.
//!
//! Each attempt drafts `parallel` candidate documents, races them through
//! the repair pipeline and promotes the winner into the output directory.
//! Attempt-level failures are logged and the next attempt starts from
//! scratch; only errors that are fatal to the run escape early.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tracing::{info, warn, Instrument};
use uuid::Uuid;
use venv_env_manager::{detect_python, Interpreter, VenvProvisioner};

use crate::analyzer::{Analyzer, CommandAnalyzer};
use crate::candidate::{CandidatePipeline, PipelineStages};
use crate::config::ForgeConfig;
use crate::domain::{ForgeError, Result, UnitSet};
use crate::dynamic_repair::DynamicRepairLoop;
use crate::generation::drafting::{draft_candidates, DraftDocument};
use crate::generation::openai::OpenAiService;
use crate::generation::{CompletionService, GenerationClient};
use crate::ledger::{CostLedger, RunStats};
use crate::metrics::METRICS;
use crate::obs;
use crate::protocol::{self, MANIFEST_FILENAME};
use crate::race::{Candidate, CandidateRunner, FailedArchive, Winner};
use crate::reporting;
use crate::sandbox::{SandboxExecutor, TestHarness};
use crate::static_repair::StaticRepairLoop;
use crate::workspace::CandidateWorkspace;

/// Command-line entry point appended to promoted code files.
pub const MAIN_HELPER: &str = include_str!("../assets/main_helper.py");

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct Compilation {
    /// 1-based attempt that produced the output.
    pub attempt: u32,
    /// Files written to the output directory.
    pub files: Vec<PathBuf>,
    pub stats: RunStats,
}

enum AttemptResult {
    Drafted(DraftDocument),
    Raced(Winner),
}

pub struct Orchestrator {
    config: ForgeConfig,
    service: Arc<dyn CompletionService>,
    analyzer: Arc<dyn Analyzer>,
    harness: Arc<dyn TestHarness>,
    ledger: Arc<CostLedger>,
}

impl Orchestrator {
    pub fn new(
        config: ForgeConfig,
        service: Arc<dyn CompletionService>,
        analyzer: Arc<dyn Analyzer>,
        harness: Arc<dyn TestHarness>,
    ) -> Self {
        let ledger = Arc::new(CostLedger::new(config.pricing.clone()));
        Self {
            config,
            service,
            analyzer,
            harness,
            ledger,
        }
    }

    /// Wire the production collaborators: the HTTP generation service, the
    /// configured analyzer command and a venv-backed sandbox.
    pub fn from_config(config: ForgeConfig) -> Result<Self> {
        let service = OpenAiService::new(&config.generation).map_err(ForgeError::from)?;
        let analyzer = CommandAnalyzer::new(config.analyzer.clone());
        let python = match &config.sandbox.python {
            Some(program) => Interpreter::new(program.clone()),
            None => detect_python()?,
        };
        let provisioner = VenvProvisioner::new(python, config.sandbox.venv.clone());
        let harness = SandboxExecutor::new(Arc::new(provisioner), &config.sandbox);
        Ok(Self::new(
            config,
            Arc::new(service),
            Arc::new(analyzer),
            Arc::new(harness),
        ))
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    fn output_dir(&self) -> &Path {
        &self.config.orchestrator.output_dir
    }

    /// Generate, repair and promote working code for `units`.
    pub async fn compile(&self, units: &UnitSet) -> Result<Compilation> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, &units.name);
        self.compile_inner(units).instrument(span).await
    }

    async fn compile_inner(&self, units: &UnitSet) -> Result<Compilation> {
        if self.config.orchestrator.sanity_check {
            units.sanity_check()?;
        }

        let started = Instant::now();
        let units = Arc::new(units.clone());
        let client = Arc::new(GenerationClient::new(
            Arc::clone(&self.service),
            Arc::clone(&self.ledger),
            self.config.generation.clone(),
        ));
        let attempts = self.config.orchestrator.attempts.max(1);
        let parallel = self.config.orchestrator.parallel.max(1);

        for attempt in 1..=attempts {
            obs::emit_attempt_started(attempt, attempts, parallel);
            let result = self.attempt(attempt, &client, &units, parallel).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(err) => {
                    obs::emit_attempt_failed(attempt, &err);
                    obs::emit_attempt_finished(attempt, elapsed_ms, self.ledger.total_cost(), false);
                    if err.is_fatal_to_run() {
                        self.finish(attempt, started.elapsed());
                        return Err(err);
                    }
                    continue;
                }
            };

            let promoted = match outcome {
                AttemptResult::Drafted(draft) => self.write_draft(&draft),
                AttemptResult::Raced(winner) => self.promote(&units, winner).await,
            };
            let files = match promoted {
                Ok(files) => files,
                Err(err) => {
                    obs::emit_attempt_failed(attempt, &err);
                    obs::emit_attempt_finished(attempt, elapsed_ms, self.ledger.total_cost(), false);
                    self.finish(attempt, started.elapsed());
                    return Err(err);
                }
            };
            obs::emit_attempt_finished(attempt, elapsed_ms, self.ledger.total_cost(), true);
            let stats = self.finish(attempt, started.elapsed());
            info!(
                attempt,
                elapsed = %reporting::pretty_duration(stats.total_time),
                total_cost = stats.total_cost,
                "compilation succeeded"
            );
            return Ok(Compilation {
                attempt,
                files,
                stats,
            });
        }

        let elapsed = started.elapsed();
        let stats = self.finish(attempts, elapsed);
        Err(ForgeError::AttemptsExhausted {
            name: units.name.clone(),
            attempts,
            elapsed,
            total_cost: stats.total_cost,
        })
    }

    async fn attempt(
        &self,
        attempt: u32,
        client: &Arc<GenerationClient>,
        units: &Arc<UnitSet>,
        parallel: usize,
    ) -> Result<AttemptResult> {
        let drafts = draft_candidates(client, units, parallel).await?;

        if self.config.orchestrator.quick {
            return match drafts.into_iter().next() {
                Some(draft) => Ok(AttemptResult::Drafted(draft)),
                None => Err(ForgeError::AllCandidatesFailed {
                    count: 0,
                    failures: Vec::new(),
                }),
            };
        }

        let depth = &self.config.repair;
        let stages = Arc::new(PipelineStages {
            static_repair: StaticRepairLoop::new(
                Arc::clone(client),
                Arc::clone(&self.analyzer),
                depth.static_depth,
            ),
            dynamic_repair: DynamicRepairLoop::new(
                Arc::clone(client),
                Arc::clone(&self.harness),
                Arc::clone(units),
                depth.dynamic_depth,
            ),
            harness: Arc::clone(&self.harness),
        });

        let mut candidates: Vec<Box<dyn Candidate>> = Vec::with_capacity(drafts.len());
        for (index, draft) in drafts.into_iter().enumerate() {
            let (workspace, files) =
                CandidateWorkspace::with_artifacts(&units.name, index, &draft.artifacts)?;
            candidates.push(Box::new(CandidatePipeline::new(
                index,
                attempt,
                workspace,
                files,
                Arc::clone(&stages),
            )));
        }

        let runner = if self.config.orchestrator.debug {
            CandidateRunner::preserving_failed(FailedArchive {
                output_dir: self.output_dir().to_path_buf(),
                name: units.name.clone(),
                env_dir_name: self.config.sandbox.venv.dir_name.clone(),
            })
        } else {
            CandidateRunner::new()
        };
        runner.race(candidates).await.map(AttemptResult::Raced)
    }

    /// Quick mode: write the first valid draft as-is.
    fn write_draft(&self, draft: &DraftDocument) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(self.output_dir())?;
        let written = protocol::materialize(&draft.artifacts, self.output_dir())?;
        let files: Vec<PathBuf> = written.into_iter().map(|(_, path)| path).collect();
        obs::emit_promotion(draft.choice, self.output_dir(), files.len());
        Ok(files)
    }

    /// Copy the winner's files to the output directory and drop its
    /// workspace.
    async fn promote(&self, units: &UnitSet, winner: Winner) -> Result<Vec<PathBuf>> {
        let out = self.output_dir();
        tokio::fs::create_dir_all(out).await?;

        let code = out.join(units.code_filename());
        tokio::fs::copy(&winner.files.code, &code).await?;
        if self.config.orchestrator.include_helper {
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&code)
                .await?;
            file.write_all(MAIN_HELPER.as_bytes()).await?;
            file.flush().await?;
        }

        let test = out.join(units.test_filename());
        tokio::fs::copy(&winner.files.test, &test).await?;

        let mut files = vec![code, test];
        if let Some(manifest) = &winner.files.manifest {
            let dest = out.join(MANIFEST_FILENAME);
            tokio::fs::copy(manifest, &dest).await?;
            files.push(dest);
        }

        obs::emit_promotion(winner.id, out, files.len());
        if let Some(workspace) = winner.workspace {
            workspace.teardown();
        }
        Ok(files)
    }

    /// Snapshot the ledger, write `stats.md` when enabled and flush metrics.
    fn finish(&self, attempts: u32, elapsed: Duration) -> RunStats {
        let stats = self.ledger.snapshot(attempts, elapsed);
        METRICS.flush();
        if self.config.orchestrator.stats {
            let path = self.output_dir().join("stats.md");
            if let Err(e) = std::fs::create_dir_all(self.output_dir())
                .map_err(anyhow::Error::from)
                .and_then(|_| reporting::write_stats_md(&path, &stats))
            {
                warn!(error = %format!("{e:#}"), "failed to write stats");
            }
        }
        stats
    }
}
