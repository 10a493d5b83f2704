//! Dynamic repair loop.
//!
//! Each round turns a failing test run into a correction request on the
//! escalated model, writes the corrected first-stage document over the
//! workspace and runs the tests again. An indeterminate run (timeout,
//! launch failure) gets no correction, just another test run.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use venv_env_manager::EnvSlot;

use crate::cancel::CancelToken;
use crate::domain::{ArtifactSet, ForgeError, Result, UnitSet};
use crate::generation::{GenerationClient, RequestKind};
use crate::ledger::Stage;
use crate::metrics::METRICS;
use crate::prompts;
use crate::protocol::{self, Shape};
use crate::sandbox::{observe, TestHarness, TestOutcome};

/// Files that passed their tests and the correction rounds it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repaired {
    pub files: ArtifactSet,
    pub rounds: u32,
}

pub struct DynamicRepairLoop {
    client: Arc<GenerationClient>,
    harness: Arc<dyn TestHarness>,
    units: Arc<UnitSet>,
    max_depth: u32,
}

impl DynamicRepairLoop {
    pub fn new(
        client: Arc<GenerationClient>,
        harness: Arc<dyn TestHarness>,
        units: Arc<UnitSet>,
        max_depth: u32,
    ) -> Self {
        Self {
            client,
            harness,
            units,
            max_depth,
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Repair until the tests pass, starting from an observed `outcome`.
    ///
    /// A `Passed` outcome returns immediately with zero rounds. Fails with
    /// `RepairExhausted` once `max_depth` rounds are spent without a pass.
    pub async fn repair(
        &self,
        files: ArtifactSet,
        outcome: TestOutcome,
        env: &mut EnvSlot,
        workdir: &Path,
        cancel: &CancelToken,
    ) -> Result<Repaired> {
        let mut files = files;
        let mut outcome = outcome;

        for round in 0..self.max_depth {
            if outcome.is_passed() {
                return Ok(Repaired {
                    files,
                    rounds: round,
                });
            }
            let Some(next) = self.step(round, &files, &outcome, workdir, cancel).await? else {
                continue;
            };
            files = next;
            outcome = self.retest(round, &files, env, workdir, cancel).await?;
        }

        if outcome.is_passed() {
            return Ok(Repaired {
                files,
                rounds: self.max_depth,
            });
        }
        Err(self.exhausted())
    }

    /// Spend one round on a non-passing `outcome`.
    ///
    /// Returns the files to test again: the corrected set after a failure,
    /// the same set after an indeterminate run. `None` when no valid
    /// correction came back; the round is spent without a re-run.
    pub async fn step(
        &self,
        round: u32,
        files: &ArtifactSet,
        outcome: &TestOutcome,
        workdir: &Path,
        cancel: &CancelToken,
    ) -> Result<Option<ArtifactSet>> {
        cancel.check()?;
        METRICS.inc_dynamic_repair_rounds();
        let started = Instant::now();

        let next = match outcome {
            TestOutcome::Failed { output } => {
                info!(round = round + 1, "tests failed, requesting correction");
                self.correct(files, output, workdir, cancel).await
            }
            TestOutcome::ExecutionError { reason } => {
                warn!(round = round + 1, reason = %reason, "indeterminate test run, retrying");
                Ok(Some(files.clone()))
            }
            TestOutcome::Passed { .. } => Ok(Some(files.clone())),
        };
        self.record(started);
        next
    }

    /// Run the tests again after a round.
    pub async fn retest(
        &self,
        round: u32,
        files: &ArtifactSet,
        env: &mut EnvSlot,
        workdir: &Path,
        cancel: &CancelToken,
    ) -> Result<TestOutcome> {
        let started = Instant::now();
        let observed = cancel
            .run(observe(self.harness.as_ref(), files, env, workdir))
            .await;
        self.record(started);
        let outcome = observed??;
        debug!(round = round + 1, outcome = outcome.label(), "tests re-run");
        Ok(outcome)
    }

    pub fn exhausted(&self) -> ForgeError {
        ForgeError::RepairExhausted {
            stage: Stage::DynamicRepair,
            rounds: self.max_depth,
        }
    }

    fn record(&self, started: Instant) {
        self.client
            .ledger()
            .record_time(Stage::DynamicRepair, started.elapsed());
    }

    /// Request and write a corrected document. `None` when no choice of the
    /// response was a valid document; the round is spent either way.
    async fn correct(
        &self,
        files: &ArtifactSet,
        test_output: &str,
        workdir: &Path,
        cancel: &CancelToken,
    ) -> Result<Option<ArtifactSet>> {
        let current = protocol::collect(files, workdir)?;
        let request = self
            .client
            .request(
                RequestKind::Correction,
                prompts::correction_system(&self.units),
                prompts::correction_prompt(&self.units, &current, test_output),
            )
            .with_model(self.client.config().escalated_model.clone());
        let response = cancel.run(self.client.generate(request)).await??;

        let shape = Shape::first_stage(self.units.name.clone());
        for choice in &response.choices {
            match protocol::parse(choice, &shape) {
                Ok(artifacts) => return protocol::materialize_set(&artifacts, workdir).map(Some),
                Err(violation) => {
                    METRICS.inc_protocol_violations();
                    warn!(error = %violation, "discarding invalid correction");
                }
            }
        }
        Ok(None)
    }
}
