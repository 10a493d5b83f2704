//! Lifecycle events and counters under an installed subscriber.
//!
//! Counters are process-global, so everything that reads them lives in a
//! single test of its own binary.

use std::path::Path;
use std::time::Duration;

use specforge_core::fakes::{Script, ScriptedCandidate};
use specforge_core::{obs, Candidate, CandidateRunner, Stage, METRICS};
use tracing::{Instrument, Level};

#[tokio::test]
async fn race_counters_and_emitters() {
    specforge_core::init_tracing(true, Level::DEBUG);
    METRICS.reset();

    let span = obs::run_span("run-obs", "fib");
    async {
        obs::emit_attempt_started(1, 2, 3);
        obs::emit_generation_call(Stage::Generation, "gpt-3.5-turbo", 1_200, 0);
        obs::emit_stage_transition(0, "generated", "static_repairing");

        let (winner, _) = ScriptedCandidate::new(0, Script::PassAfter(Duration::from_millis(5)));
        let (loser, _) = ScriptedCandidate::new(1, Script::FailAfter(Duration::from_millis(1)));
        let (slow, _) = ScriptedCandidate::new(2, Script::PassAfter(Duration::from_secs(30)));
        let candidates: Vec<Box<dyn Candidate>> =
            vec![Box::new(winner), Box::new(loser), Box::new(slow)];
        let result = CandidateRunner::new().race(candidates).await.unwrap();

        obs::emit_promotion(result.id, Path::new("."), 2);
        obs::emit_attempt_finished(1, 42, 0.01, true);
    }
    .instrument(span)
    .await;

    assert_eq!(METRICS.candidates_started(), 3);
    assert_eq!(METRICS.candidates_promoted(), 1);
    assert_eq!(METRICS.candidates_failed(), 1);
    assert_eq!(METRICS.candidates_cancelled(), 1);
    METRICS.flush();
}
