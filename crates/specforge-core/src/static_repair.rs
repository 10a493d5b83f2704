//! Static repair loop.
//!
//! Analyze, fix every flagged file concurrently with a second-stage request,
//! analyze again. A fixed finding may expose a different one, so the loop
//! only stops on a clean report or after `max_depth` fix rounds.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::analyzer::{is_ignored, Analyzer, Finding};
use crate::cancel::CancelToken;
use crate::domain::{Artifact, ArtifactSet, ForgeError, Result, Role};
use crate::generation::{GenerationClient, RequestKind};
use crate::ledger::Stage;
use crate::metrics::METRICS;
use crate::prompts;
use crate::protocol::{self, Shape};

pub struct StaticRepairLoop {
    client: Arc<GenerationClient>,
    analyzer: Arc<dyn Analyzer>,
    max_depth: u32,
}

impl StaticRepairLoop {
    pub fn new(client: Arc<GenerationClient>, analyzer: Arc<dyn Analyzer>, max_depth: u32) -> Self {
        Self {
            client,
            analyzer,
            max_depth,
        }
    }

    /// Repair `files` in place. Returns the number of fix rounds spent.
    ///
    /// Fails with `RepairExhausted` when findings remain after `max_depth`
    /// rounds; a clean first analysis returns `Ok(0)` without any request.
    pub async fn repair(&self, files: &ArtifactSet, cancel: &CancelToken) -> Result<u32> {
        for round in 0..=self.max_depth {
            let started = Instant::now();
            let findings = self.findings(files, cancel).await?;
            if findings.is_empty() {
                self.client
                    .ledger()
                    .record_time(Stage::StaticRepair, started.elapsed());
                debug!(round, "static analysis clean");
                return Ok(round);
            }
            if round == self.max_depth {
                self.client
                    .ledger()
                    .record_time(Stage::StaticRepair, started.elapsed());
                warn!(
                    remaining = findings.len(),
                    rounds = self.max_depth,
                    "static repair budget spent"
                );
                break;
            }

            METRICS.inc_static_repair_rounds();
            info!(round = round + 1, findings = findings.len(), "static repair round");
            let fixes = per_file(files, &findings)
                .into_iter()
                .map(|(role, path, report)| self.fix_file(role, path, report, cancel));
            let outcome = try_join_all(fixes).await;
            self.client
                .ledger()
                .record_time(Stage::StaticRepair, started.elapsed());
            outcome?;
        }

        Err(ForgeError::RepairExhausted {
            stage: Stage::StaticRepair,
            rounds: self.max_depth,
        })
    }

    async fn findings(&self, files: &ArtifactSet, cancel: &CancelToken) -> Result<Vec<Finding>> {
        let sources = files.sources();
        let findings = cancel.run(self.analyzer.analyze(&sources)).await??;
        Ok(findings
            .into_iter()
            .filter(|f| !is_ignored(&f.code))
            .collect())
    }

    /// Ask for a corrected version of one file and write it back.
    async fn fix_file(
        &self,
        role: Role,
        path: PathBuf,
        report: String,
        cancel: &CancelToken,
    ) -> Result<()> {
        let filename = file_name(&path)?;
        let content = tokio::fs::read_to_string(&path).await?;
        let current = Artifact::new(role, filename.clone(), content);
        let request = self.client.request(
            RequestKind::StaticFix,
            prompts::static_fix_system(&filename),
            prompts::static_fix_prompt(&current, &report),
        );
        let shape = Shape::second_stage(filename.clone(), role);
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let retries = self.client.config().protocol_retries;
        let mut last_violation = None;
        for _ in 0..=retries {
            let response = cancel.run(self.client.generate(request.clone())).await??;
            for choice in &response.choices {
                match protocol::parse(choice, &shape) {
                    Ok(artifacts) => {
                        protocol::materialize(&artifacts, dir)?;
                        debug!(file = %filename, "applied static fix");
                        return Ok(());
                    }
                    Err(violation) => {
                        METRICS.inc_protocol_violations();
                        debug!(file = %filename, error = %violation, "discarding invalid fix");
                        last_violation = Some(violation);
                    }
                }
            }
        }

        Err(match last_violation {
            Some(violation) => violation.into(),
            None => ForgeError::GenerationExhausted {
                tries: retries + 1,
                last_error: format!("no fix returned for {filename}"),
            },
        })
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            ForgeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a file path: {}", path.display()),
            ))
        })
}

/// Group findings by the source file they concern, rendered as a report.
fn per_file(files: &ArtifactSet, findings: &[Finding]) -> Vec<(Role, PathBuf, String)> {
    let mut out = Vec::new();
    for role in [Role::Code, Role::Test] {
        let Some(path) = files.path_of(role) else {
            continue;
        };
        let report = findings
            .iter()
            .filter(|f| f.concerns(path))
            .map(|f| f.to_string())
            .collect::<Vec<_>>();
        if !report.is_empty() {
            out.push((role, path.to_path_buf(), report.join("\n")));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::fakes::{completion, single_file_doc, ScriptedAnalyzer, ScriptedService};
    use crate::ledger::CostLedger;
    use tempfile::tempdir;

    fn finding(file: &str, code: &str) -> Finding {
        Finding {
            filename: PathBuf::from(file),
            line: 1,
            column: 1,
            code: code.to_string(),
            message: "flagged".to_string(),
        }
    }

    fn setup(dir: &Path) -> ArtifactSet {
        std::fs::write(dir.join("fib.py"), "def fib(n):\n    return x\n").unwrap();
        std::fs::write(dir.join("fib_test.py"), "import fib\n").unwrap();
        ArtifactSet {
            code: dir.join("fib.py"),
            test: dir.join("fib_test.py"),
            manifest: None,
        }
    }

    fn repair_loop(
        service: Arc<ScriptedService>,
        analyzer: Arc<ScriptedAnalyzer>,
        depth: u32,
    ) -> StaticRepairLoop {
        let config = GenerationConfig {
            backoff_base_ms: 0,
            ..GenerationConfig::default()
        };
        let client = GenerationClient::new(service, Arc::new(CostLedger::default()), config);
        StaticRepairLoop::new(Arc::new(client), analyzer, depth)
    }

    #[tokio::test]
    async fn test_clean_report_needs_no_requests() {
        let dir = tempdir().unwrap();
        let files = setup(dir.path());
        let service = Arc::new(ScriptedService::new());
        let analyzer = Arc::new(ScriptedAnalyzer::clean());

        let rounds = repair_loop(service.clone(), analyzer, 4)
            .repair(&files, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(rounds, 0);
        assert_eq!(service.calls(RequestKind::StaticFix), 0);
    }

    #[tokio::test]
    async fn test_ignored_codes_do_not_trigger_repair() {
        let dir = tempdir().unwrap();
        let files = setup(dir.path());
        let service = Arc::new(ScriptedService::new());
        let analyzer = Arc::new(ScriptedAnalyzer::new(vec![vec![
            finding("fib.py", "E501"),
            finding("fib_test.py", "W0611"),
        ]]));

        let rounds = repair_loop(service.clone(), analyzer, 4)
            .repair(&files, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(rounds, 0);
        assert_eq!(service.calls(RequestKind::StaticFix), 0);
    }

    #[tokio::test]
    async fn test_only_flagged_files_are_rewritten() {
        let dir = tempdir().unwrap();
        let files = setup(dir.path());
        let service = Arc::new(ScriptedService::new());
        service.push(
            RequestKind::StaticFix,
            Ok(completion(
                vec![&single_file_doc("fib.py", "def fib(n):\n    return n\n")],
                "gpt-3.5-turbo",
            )),
        );
        let analyzer = Arc::new(ScriptedAnalyzer::new(vec![
            vec![finding("fib.py", "E0602")],
            vec![],
        ]));

        let rounds = repair_loop(service.clone(), analyzer.clone(), 4)
            .repair(&files, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(rounds, 1);
        assert_eq!(service.calls(RequestKind::StaticFix), 1);
        assert_eq!(analyzer.calls(), 2);
        assert_eq!(
            std::fs::read_to_string(&files.code).unwrap(),
            "def fib(n):\n    return n\n"
        );
        assert_eq!(std::fs::read_to_string(&files.test).unwrap(), "import fib\n");
    }

    #[tokio::test]
    async fn test_exhaustion_after_max_depth_rounds() {
        let dir = tempdir().unwrap();
        let files = setup(dir.path());
        let service = Arc::new(ScriptedService::new());
        let analyzer = Arc::new(ScriptedAnalyzer::always(vec![finding("fib.py", "E0602")]));

        let err = repair_loop(service.clone(), analyzer.clone(), 2)
            .repair(&files, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ForgeError::RepairExhausted {
                stage: Stage::StaticRepair,
                rounds: 2
            }
        ));
        assert_eq!(service.calls(RequestKind::StaticFix), 2);
        assert_eq!(analyzer.calls(), 3);
    }

    #[tokio::test]
    async fn test_invalid_fix_documents_fail_the_candidate() {
        let dir = tempdir().unwrap();
        let files = setup(dir.path());
        let service = Arc::new(ScriptedService::new());
        for _ in 0..4 {
            service.push(
                RequestKind::StaticFix,
                Ok(completion(vec!["I fixed it for you!"], "gpt-3.5-turbo")),
            );
        }
        let analyzer = Arc::new(ScriptedAnalyzer::always(vec![finding("fib.py", "E0602")]));

        let err = repair_loop(service.clone(), analyzer, 4)
            .repair(&files, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::ProtocolViolation(_)));
        assert_eq!(service.calls(RequestKind::StaticFix), 4);
    }

    #[tokio::test]
    async fn test_each_flagged_file_gets_its_own_fix() {
        let dir = tempdir().unwrap();
        let files = setup(dir.path());
        let service = Arc::new(ScriptedService::new().with_fallback(
            RequestKind::StaticFix,
            |request| {
                let filename = request
                    .prompt
                    .lines()
                    .next()
                    .and_then(|line| line.strip_prefix("# "))
                    .unwrap_or_default();
                let fixed = single_file_doc(filename, &format!("fixed = {filename:?}\n"));
                Ok(completion(vec![fixed.as_str()], &request.model))
            },
        ));
        let analyzer = Arc::new(ScriptedAnalyzer::new(vec![vec![
            finding("fib.py", "E0602"),
            finding("fib_test.py", "E0602"),
        ]]));

        let rounds = repair_loop(service.clone(), analyzer.clone(), 4)
            .repair(&files, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(rounds, 1);
        assert_eq!(service.calls(RequestKind::StaticFix), 2);
        assert_eq!(analyzer.calls(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("fib.py")).unwrap(),
            "fixed = \"fib.py\"\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("fib_test.py")).unwrap(),
            "fixed = \"fib_test.py\"\n"
        );
    }
}
