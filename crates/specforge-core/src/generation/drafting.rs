//! First-stage drafting of candidate documents.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::{GenerationClient, RequestKind};
use crate::domain::{Artifact, ForgeError, Result, UnitSet};
use crate::ledger::Stage;
use crate::metrics::METRICS;
use crate::prompts;
use crate::protocol::{self, Shape};

/// One valid first-stage document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftDocument {
    /// Index of the service choice it was built from.
    pub choice: usize,
    pub artifacts: Vec<Artifact>,
}

/// Pair choice `i` of the code response with choice `i` of the test
/// response and keep the pairs that form a valid first-stage document.
pub fn pair_choices(name: &str, code: &[String], tests: &[String]) -> Vec<DraftDocument> {
    let shape = Shape::first_stage(name);
    code.iter()
        .zip(tests)
        .enumerate()
        .filter_map(|(choice, (code_doc, test_doc))| {
            let doc = format!("{code_doc}\n\n{test_doc}");
            match protocol::parse(&doc, &shape) {
                Ok(artifacts) => Some(DraftDocument { choice, artifacts }),
                Err(violation) => {
                    METRICS.inc_protocol_violations();
                    debug!(choice, error = %violation, document = %doc, "discarding invalid draft");
                    None
                }
            }
        })
        .collect()
}

/// Draft up to `n` candidate documents for `units`.
///
/// Code and tests are requested concurrently, `n` completions each. When no
/// pair forms a valid document the whole drafting round is repeated, up to
/// `protocol_retries` extra times.
pub async fn draft_candidates(
    client: &GenerationClient,
    units: &UnitSet,
    n: usize,
) -> Result<Vec<DraftDocument>> {
    let retries = client.config().protocol_retries;

    for round in 0..=retries {
        let code_request = client
            .request(
                RequestKind::DraftCode,
                prompts::draft_code_system(units),
                prompts::requirements(units, true),
            )
            .with_n(n);
        let test_request = client
            .request(
                RequestKind::DraftTests,
                prompts::draft_tests_system(units),
                prompts::requirements(units, false),
            )
            .with_n(n);

        let started = Instant::now();
        let responses = futures::future::try_join(
            client.generate(code_request),
            client.generate(test_request),
        )
        .await;
        client
            .ledger()
            .record_time(Stage::Generation, started.elapsed());
        let (code, tests) = responses?;

        let drafts = pair_choices(&units.name, &code.choices, &tests.choices);
        if !drafts.is_empty() {
            info!(valid = drafts.len(), requested = n, "drafted candidates");
            return Ok(drafts);
        }
        warn!(round, retries, "no drafted document matched the artifact protocol");
    }

    Err(ForgeError::GenerationExhausted {
        tries: retries + 1,
        last_error: "no drafted document matched the artifact protocol".to_string(),
    })
}
