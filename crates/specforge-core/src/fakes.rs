//! Deterministic collaborators for tests.
//!
//! Every external seam of the engine (generation service, analyzer, test
//! harness, candidate) has a scripted stand-in here. Scripts are consumed
//! in order; once a script runs dry the fallback answers.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use venv_env_manager::EnvSlot;

use crate::analyzer::{Analyzer, Finding};
use crate::cancel::CancelToken;
use crate::domain::{ArtifactSet, ForgeError, Result};
use crate::generation::{
    CompletionRequest, CompletionResponse, CompletionService, RequestKind, ServiceError, Usage,
};
use crate::ledger::Stage;
use crate::race::{Candidate, CandidateOutcome, Verdict};
use crate::sandbox::{TestHarness, TestOutcome};

/// A response with `choices` and a small fixed usage.
pub fn completion(choices: Vec<&str>, model: &str) -> CompletionResponse {
    CompletionResponse {
        choices: choices.into_iter().map(str::to_string).collect(),
        usage: Usage {
            model: model.to_string(),
            prompt_tokens: 200,
            completion_tokens: 100,
        },
    }
}

/// `# {filename}` followed by a fenced block.
pub fn single_file_doc(filename: &str, content: &str) -> String {
    let lang = if filename.ends_with(".txt") { "txt" } else { "py" };
    format!("# {filename}\n\n```{lang}\n{content}```\n")
}

/// Drafted code response: code file and optional manifest.
pub fn code_doc(name: &str, code: &str, manifest: Option<&str>) -> String {
    let mut doc = single_file_doc(&format!("{name}.py"), code);
    if let Some(manifest) = manifest {
        doc.push('\n');
        doc.push_str(&single_file_doc("requirements.txt", manifest));
    }
    doc
}

/// Drafted test response.
pub fn test_doc(name: &str, tests: &str) -> String {
    single_file_doc(&format!("{name}_test.py"), tests)
}

/// Full first-stage document with a stock test file.
pub fn first_stage_doc(name: &str, code: &str, manifest: Option<&str>) -> String {
    format!(
        "{}\n{}",
        code_doc(name, code, manifest),
        test_doc(name, &format!("import unittest\nimport {name}\n"))
    )
}

type ServiceResult = std::result::Result<CompletionResponse, ServiceError>;
type Fallback = Box<dyn Fn(&CompletionRequest) -> ServiceResult + Send + Sync>;

/// Scripted generation service.
pub struct ScriptedService {
    scripts: Mutex<HashMap<RequestKind, VecDeque<ServiceResult>>>,
    fallbacks: HashMap<RequestKind, Fallback>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedService {
    /// Static fixes echo the file back unchanged; every other kind must be
    /// scripted.
    pub fn new() -> Self {
        let mut fallbacks: HashMap<RequestKind, Fallback> = HashMap::new();
        fallbacks.insert(
            RequestKind::StaticFix,
            Box::new(|request: &CompletionRequest| -> ServiceResult {
                let echoed = request
                    .prompt
                    .split("# Analyzer findings")
                    .next()
                    .unwrap_or_default();
                Ok(completion(vec![echoed], &request.model))
            }),
        );
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallbacks,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Valid drafts and corrections for the unit set `name`, `n` choices
    /// per drafting request.
    pub fn for_unit_set(name: &str) -> Self {
        let code = code_doc(name, "def answer():\n    return 42\n", None);
        let tests = test_doc(name, &format!("import unittest\nimport {name}\n"));
        let corrected = first_stage_doc(name, "def answer():\n    return 42\n", None);
        Self::new()
            .with_fallback(RequestKind::DraftCode, move |r| {
                Ok(completion(vec![code.as_str(); r.n], &r.model))
            })
            .with_fallback(RequestKind::DraftTests, move |r| {
                Ok(completion(vec![tests.as_str(); r.n], &r.model))
            })
            .with_fallback(RequestKind::Correction, move |r| {
                Ok(completion(vec![corrected.as_str()], &r.model))
            })
    }

    pub fn with_fallback(
        mut self,
        kind: RequestKind,
        fallback: impl Fn(&CompletionRequest) -> ServiceResult + Send + Sync + 'static,
    ) -> Self {
        self.fallbacks.insert(kind, Box::new(fallback));
        self
    }

    /// Queue the next answer for `kind`.
    pub fn push(&self, kind: RequestKind, response: ServiceResult) {
        lock(&self.scripts)
            .entry(kind)
            .or_default()
            .push_back(response);
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn calls(&self, kind: RequestKind) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    /// Calls billed to `stage`.
    pub fn stage_calls(&self, stage: Stage) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.kind.stage() == stage)
            .count()
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    async fn complete(&self, request: &CompletionRequest) -> ServiceResult {
        lock(&self.requests).push(request.clone());
        let scripted = lock(&self.scripts)
            .get_mut(&request.kind)
            .and_then(VecDeque::pop_front);
        if let Some(response) = scripted {
            return response;
        }
        match self.fallbacks.get(&request.kind) {
            Some(fallback) => fallback(request),
            None => Err(ServiceError::Transient(format!(
                "no scripted response for {:?}",
                request.kind
            ))),
        }
    }
}

/// Scripted static analyzer.
pub struct ScriptedAnalyzer {
    script: Mutex<VecDeque<Vec<Finding>>>,
    fallback: Vec<Finding>,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    /// Reports each entry of `rounds` in turn, then nothing.
    pub fn new(rounds: Vec<Vec<Finding>>) -> Self {
        Self {
            script: Mutex::new(rounds.into()),
            fallback: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn clean() -> Self {
        Self::new(Vec::new())
    }

    /// Reports `findings` on every call.
    pub fn always(findings: Vec<Finding>) -> Self {
        Self {
            fallback: findings,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(&self, _files: &[PathBuf]) -> Result<Vec<Finding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Scripted test harness.
pub struct ScriptedHarness {
    script: Mutex<VecDeque<Result<TestOutcome>>>,
    fallback: Option<TestOutcome>,
    calls: AtomicUsize,
}

impl ScriptedHarness {
    /// Answers each entry of `runs` in turn, then `ExecutionError`.
    pub fn new(runs: Vec<Result<TestOutcome>>) -> Self {
        Self {
            script: Mutex::new(runs.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(outcome: TestOutcome) -> Self {
        Self {
            fallback: Some(outcome),
            ..Self::new(Vec::new())
        }
    }

    pub fn passing() -> Self {
        Self::always(TestOutcome::Passed {
            output: "Ran 1 test in 0.001s\n\nOK\n".to_string(),
        })
    }

    /// Answers each entry of `runs` in turn, then `then` forever.
    pub fn then(runs: Vec<Result<TestOutcome>>, then: TestOutcome) -> Self {
        Self {
            fallback: Some(then),
            ..Self::new(runs)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestHarness for ScriptedHarness {
    async fn run(
        &self,
        _files: &ArtifactSet,
        _env: &mut EnvSlot,
        _workdir: &Path,
    ) -> Result<TestOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(run) = lock(&self.script).pop_front() {
            return run;
        }
        Ok(self
            .fallback
            .clone()
            .unwrap_or_else(|| TestOutcome::ExecutionError {
                reason: "no scripted test run".to_string(),
            }))
    }
}

/// Behaviour of a [`ScriptedCandidate`].
#[derive(Debug, Clone, Copy)]
pub enum Script {
    PassAfter(Duration),
    FailAfter(Duration),
}

/// Observes a [`ScriptedCandidate`] after it was moved into a race.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    cancelled: Arc<AtomicBool>,
}

impl Probe {
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Candidate that sleeps, then passes or fails, without a workspace.
pub struct ScriptedCandidate {
    id: usize,
    script: Script,
    probe: Probe,
}

impl ScriptedCandidate {
    pub fn new(id: usize, script: Script) -> (Self, Probe) {
        let probe = Probe::default();
        (
            Self {
                id,
                script,
                probe: probe.clone(),
            },
            probe,
        )
    }
}

#[async_trait]
impl Candidate for ScriptedCandidate {
    fn id(&self) -> usize {
        self.id
    }

    async fn run(self: Box<Self>, cancel: CancelToken) -> CandidateOutcome {
        let delay = match self.script {
            Script::PassAfter(d) | Script::FailAfter(d) => d,
        };
        let verdict = match cancel.run(tokio::time::sleep(delay)).await {
            Err(_) => {
                self.probe.cancelled.store(true, Ordering::SeqCst);
                Verdict::Cancelled
            }
            Ok(()) => match self.script {
                Script::PassAfter(_) => Verdict::Promotable(ArtifactSet {
                    code: PathBuf::from("fib.py"),
                    test: PathBuf::from("fib_test.py"),
                    manifest: None,
                }),
                Script::FailAfter(_) => Verdict::Failed(ForgeError::RepairExhausted {
                    stage: Stage::StaticRepair,
                    rounds: 4,
                }),
            },
        };
        CandidateOutcome {
            id: self.id,
            workspace: None,
            verdict,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
