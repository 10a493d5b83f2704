//! Structured lifecycle events.
//!
//! - `run_span` / `candidate_span` scoping every log line of a run or candidate
//! - emitters for attempts, stage transitions, generation calls and promotion
//!
//! Everything is emitted at `info!` unless noted; filter with `RUST_LOG`.

use std::path::Path;
use tracing::{info, warn};

use crate::ledger::Stage;

/// Span tagging every event of one candidate with its id and attempt.
///
/// Candidates live across `.await` points, so attach it with
/// `Instrument::instrument` rather than entering it.
pub fn candidate_span(attempt: u32, candidate: usize) -> tracing::Span {
    tracing::info_span!("specforge.candidate", attempt = attempt, candidate = candidate)
}

/// Span tagging every event of one compilation run.
pub fn run_span(run_id: &str, name: &str) -> tracing::Span {
    tracing::info_span!("specforge.run", run_id = %run_id, unit_set = %name)
}

pub fn emit_attempt_started(attempt: u32, of: u32, candidates: usize) {
    info!(event = "attempt.started", attempt, of, candidates);
}

pub fn emit_attempt_failed(attempt: u32, error: &dyn std::fmt::Display) {
    warn!(event = "attempt.failed", attempt, error = %error);
}

pub fn emit_attempt_finished(attempt: u32, elapsed_ms: u64, total_cost: f64, success: bool) {
    info!(
        event = "attempt.finished",
        attempt,
        elapsed_ms,
        total_cost,
        success,
    );
}

/// Candidate state machine transition.
pub fn emit_stage_transition(candidate: usize, from: &str, to: &str) {
    info!(event = "candidate.transition", candidate, from = %from, to = %to);
}

/// One generation-service call, with throughput.
pub fn emit_generation_call(stage: Stage, model: &str, elapsed_ms: u64, total_tokens: u64) {
    let ms_per_token = if total_tokens == 0 {
        0.0
    } else {
        elapsed_ms as f64 / total_tokens as f64
    };
    info!(
        event = "generation.call",
        stage = %stage,
        model = %model,
        elapsed_ms,
        total_tokens,
        ms_per_token,
    );
}

pub fn emit_promotion(candidate: usize, output_dir: &Path, files: usize) {
    info!(
        event = "candidate.promoted",
        candidate,
        output_dir = %output_dir.display(),
        files,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_and_emitters_do_not_panic() {
        let _run = run_span("run-1", "fib").entered();
        let _candidate = candidate_span(1, 0).entered();
        emit_generation_call(Stage::Generation, "gpt-3.5-turbo", 120, 0);
        emit_stage_transition(0, "generated", "static_repairing");
    }
}
