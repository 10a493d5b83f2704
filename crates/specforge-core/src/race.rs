//! Candidate runner: first success wins.
//!
//! Every candidate runs as its own task. The first one to come back
//! promotable wins; the rest are cancelled, drained and torn down. Failed
//! candidates are removed from the race as they finish. When none is left
//! the attempt fails with `AllCandidatesFailed`.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cancel::{CancelSource, CancelToken};
use crate::domain::{ArtifactSet, ForgeError, Result};
use crate::metrics::METRICS;
use crate::workspace::CandidateWorkspace;

/// Terminal result of one candidate.
#[derive(Debug)]
pub enum Verdict {
    Promotable(ArtifactSet),
    Failed(ForgeError),
    Cancelled,
}

#[derive(Debug)]
pub struct CandidateOutcome {
    pub id: usize,
    /// Handed back so the runner decides between promotion and teardown.
    pub workspace: Option<CandidateWorkspace>,
    pub verdict: Verdict,
}

/// One speculative attempt, driven to a terminal [`Verdict`].
#[async_trait]
pub trait Candidate: Send + 'static {
    fn id(&self) -> usize;

    /// Run to completion. Must observe `cancel` at every suspension point.
    async fn run(self: Box<Self>, cancel: CancelToken) -> CandidateOutcome;
}

/// The promoted candidate of a race.
#[derive(Debug)]
pub struct Winner {
    pub id: usize,
    pub workspace: Option<CandidateWorkspace>,
    pub files: ArtifactSet,
}

/// Where failed workspaces are copied in debug mode.
#[derive(Debug, Clone)]
pub struct FailedArchive {
    pub output_dir: PathBuf,
    pub name: String,
    pub env_dir_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateRunner {
    archive: Option<FailedArchive>,
}

impl CandidateRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy every failed workspace to `{output_dir}/{name}_{id}_failed`
    /// before teardown.
    pub fn preserving_failed(archive: FailedArchive) -> Self {
        Self {
            archive: Some(archive),
        }
    }

    /// Race `candidates`, returning the first promotable one.
    pub async fn race(&self, candidates: Vec<Box<dyn Candidate>>) -> Result<Winner> {
        let count = candidates.len();
        let source = CancelSource::new();
        let mut join_set = JoinSet::new();
        for candidate in candidates {
            METRICS.inc_candidates_started();
            join_set.spawn(candidate.run(source.token()));
        }

        let mut winner: Option<Winner> = None;
        let mut failures = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    METRICS.inc_candidates_failed();
                    warn!(error = %e, "candidate task aborted");
                    failures.push(format!("candidate task aborted: {e}"));
                    continue;
                }
            };

            let CandidateOutcome {
                id,
                workspace,
                verdict,
            } = outcome;
            match verdict {
                Verdict::Promotable(files) if winner.is_none() => {
                    METRICS.inc_candidates_promoted();
                    info!(candidate = id, remaining = join_set.len(), "candidate won the race");
                    source.cancel();
                    winner = Some(Winner {
                        id,
                        workspace,
                        files,
                    });
                }
                Verdict::Promotable(_) | Verdict::Cancelled => {
                    METRICS.inc_candidates_cancelled();
                    teardown(workspace);
                }
                Verdict::Failed(err) => {
                    METRICS.inc_candidates_failed();
                    warn!(candidate = id, error = %err, "candidate failed");
                    if let Some(ws) = &workspace {
                        self.archive(id, ws);
                    }
                    teardown(workspace);
                    failures.push(format!("candidate {id}: {err}"));
                }
            }
        }

        winner.ok_or(ForgeError::AllCandidatesFailed { count, failures })
    }

    fn archive(&self, id: usize, workspace: &CandidateWorkspace) {
        let Some(archive) = &self.archive else {
            return;
        };
        let dest = archive
            .output_dir
            .join(format!("{}_{}_failed", archive.name, id));
        if let Err(e) = workspace.preserve(&dest, &archive.env_dir_name) {
            warn!(candidate = id, error = %e, "failed to preserve workspace");
        }
    }
}

fn teardown(workspace: Option<CandidateWorkspace>) {
    if let Some(ws) = workspace {
        ws.teardown();
    }
}
