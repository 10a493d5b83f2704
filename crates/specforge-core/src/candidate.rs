//! Candidate pipeline state machine.
//!
//! ```text
//! Generated -> StaticRepairing -> StaticRepaired -> Testing -> Promotable
//!                                                      |  ^
//!                                                      v  |
//!                                               DynamicRepairing
//! ```
//! `Failed` is reachable from every non-terminal state when a bound is
//! exhausted; `Cancelled` when the race is decided elsewhere.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, Instrument};

use crate::cancel::CancelToken;
use crate::domain::{ArtifactSet, ForgeError, Result};
use crate::dynamic_repair::DynamicRepairLoop;
use crate::obs;
use crate::race::{Candidate, CandidateOutcome, Verdict};
use crate::sandbox::{observe, TestHarness};
use crate::static_repair::StaticRepairLoop;
use crate::workspace::CandidateWorkspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    Generated,
    StaticRepairing,
    StaticRepaired,
    Testing,
    DynamicRepairing,
    Promotable,
    Failed,
    Cancelled,
}

impl CandidateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CandidateState::Promotable | CandidateState::Failed | CandidateState::Cancelled
        )
    }

    /// Whether `next` is a legal successor of this state.
    pub fn allows(&self, next: CandidateState) -> bool {
        use CandidateState::*;
        if self.is_terminal() {
            return false;
        }
        match next {
            Failed | Cancelled => true,
            StaticRepairing => *self == Generated,
            StaticRepaired => *self == StaticRepairing,
            Testing => matches!(self, StaticRepaired | DynamicRepairing),
            DynamicRepairing => *self == Testing,
            Promotable => matches!(self, Testing | DynamicRepairing),
            Generated => false,
        }
    }
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateState::Generated => "generated",
            CandidateState::StaticRepairing => "static_repairing",
            CandidateState::StaticRepaired => "static_repaired",
            CandidateState::Testing => "testing",
            CandidateState::DynamicRepairing => "dynamic_repairing",
            CandidateState::Promotable => "promotable",
            CandidateState::Failed => "failed",
            CandidateState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Collaborators shared by every candidate of an attempt.
pub struct PipelineStages {
    pub static_repair: StaticRepairLoop,
    pub dynamic_repair: DynamicRepairLoop,
    pub harness: Arc<dyn TestHarness>,
}

/// One drafted document moving through static repair, testing and
/// dynamic repair inside its own workspace.
pub struct CandidatePipeline {
    id: usize,
    attempt: u32,
    history: Vec<CandidateState>,
    workspace: CandidateWorkspace,
    files: ArtifactSet,
    stages: Arc<PipelineStages>,
}

impl CandidatePipeline {
    pub fn new(
        id: usize,
        attempt: u32,
        workspace: CandidateWorkspace,
        files: ArtifactSet,
        stages: Arc<PipelineStages>,
    ) -> Self {
        Self {
            id,
            attempt,
            history: vec![CandidateState::Generated],
            workspace,
            files,
            stages,
        }
    }

    pub fn state(&self) -> CandidateState {
        self.history
            .last()
            .copied()
            .unwrap_or(CandidateState::Generated)
    }

    /// Every state entered so far, starting with `Generated`.
    pub fn history(&self) -> &[CandidateState] {
        &self.history
    }

    async fn drive(&mut self, cancel: &CancelToken) -> Result<()> {
        let id = self.id;
        advance(id, &mut self.history, CandidateState::StaticRepairing);
        let rounds = self.stages.static_repair.repair(&self.files, cancel).await?;
        debug!(rounds, "static repair finished");
        advance(id, &mut self.history, CandidateState::StaticRepaired);

        cancel.check()?;
        advance(id, &mut self.history, CandidateState::Testing);
        let (dir, env) = self.workspace.split();
        let mut outcome = cancel
            .run(observe(self.stages.harness.as_ref(), &self.files, env, dir))
            .await??;

        let repair = &self.stages.dynamic_repair;
        for round in 0..repair.max_depth() {
            if outcome.is_passed() {
                break;
            }
            if self.history.last() != Some(&CandidateState::DynamicRepairing) {
                advance(id, &mut self.history, CandidateState::DynamicRepairing);
            }
            let Some(next) = repair.step(round, &self.files, &outcome, dir, cancel).await? else {
                continue;
            };
            self.files = next;
            advance(id, &mut self.history, CandidateState::Testing);
            outcome = repair.retest(round, &self.files, env, dir, cancel).await?;
        }

        if !outcome.is_passed() {
            return Err(repair.exhausted());
        }
        advance(id, &mut self.history, CandidateState::Promotable);
        Ok(())
    }
}

fn advance(candidate: usize, history: &mut Vec<CandidateState>, next: CandidateState) {
    let state = history.last().copied().unwrap_or(CandidateState::Generated);
    if !state.allows(next) {
        tracing::warn!(candidate, from = %state, to = %next, "unexpected candidate transition");
    }
    obs::emit_stage_transition(candidate, &state.to_string(), &next.to_string());
    history.push(next);
}

#[async_trait]
impl Candidate for CandidatePipeline {
    fn id(&self) -> usize {
        self.id
    }

    async fn run(self: Box<Self>, cancel: CancelToken) -> CandidateOutcome {
        let mut pipeline = *self;
        let span = obs::candidate_span(pipeline.attempt, pipeline.id);
        let result = pipeline.drive(&cancel).instrument(span.clone()).await;

        let verdict = match result {
            Ok(()) => Verdict::Promotable(pipeline.files.clone()),
            Err(ForgeError::Cancelled) => {
                span.in_scope(|| {
                    advance(pipeline.id, &mut pipeline.history, CandidateState::Cancelled)
                });
                Verdict::Cancelled
            }
            Err(err) => {
                span.in_scope(|| advance(pipeline.id, &mut pipeline.history, CandidateState::Failed));
                Verdict::Failed(err)
            }
        };
        CandidateOutcome {
            id: pipeline.id,
            workspace: Some(pipeline.workspace),
            verdict,
        }
    }
}
