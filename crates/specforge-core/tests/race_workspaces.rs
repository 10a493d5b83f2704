//! Candidate races over real workspaces: teardown, preservation of failed
//! candidates and workspace hand-over to the winner.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use specforge_core::fakes::first_stage_doc;
use specforge_core::protocol::{self, Shape};
use specforge_core::{
    ArtifactSet, CancelToken, Candidate, CandidateOutcome, CandidateRunner, CandidateWorkspace,
    FailedArchive, ForgeError, Stage, Verdict,
};
use tempfile::tempdir;

struct WorkspaceCandidate {
    workspace: CandidateWorkspace,
    files: ArtifactSet,
    passes: bool,
    delay: Duration,
}

impl WorkspaceCandidate {
    fn new(index: usize, passes: bool, delay_ms: u64) -> (Self, PathBuf) {
        let doc = first_stage_doc("fib", "def fib(n):\n    return n\n", None);
        let artifacts = protocol::parse(&doc, &Shape::first_stage("fib")).unwrap();
        let (workspace, files) = CandidateWorkspace::with_artifacts("fib", index, &artifacts).unwrap();
        std::fs::create_dir_all(workspace.path().join("venv").join("bin")).unwrap();
        let path = workspace.path().to_path_buf();
        (
            Self {
                workspace,
                files,
                passes,
                delay: Duration::from_millis(delay_ms),
            },
            path,
        )
    }
}

#[async_trait]
impl Candidate for WorkspaceCandidate {
    fn id(&self) -> usize {
        self.workspace.index()
    }

    async fn run(self: Box<Self>, cancel: CancelToken) -> CandidateOutcome {
        let id = self.workspace.index();
        let verdict = match cancel.run(tokio::time::sleep(self.delay)).await {
            Err(_) => Verdict::Cancelled,
            Ok(()) if self.passes => Verdict::Promotable(self.files.clone()),
            Ok(()) => Verdict::Failed(ForgeError::RepairExhausted {
                stage: Stage::DynamicRepair,
                rounds: 4,
            }),
        };
        CandidateOutcome {
            id,
            workspace: Some(self.workspace),
            verdict,
        }
    }
}

#[tokio::test]
async fn losers_are_torn_down_and_winner_keeps_its_workspace() {
    let (failing, failing_dir) = WorkspaceCandidate::new(0, false, 1);
    let (winner, winner_dir) = WorkspaceCandidate::new(1, true, 20);
    let (slow, slow_dir) = WorkspaceCandidate::new(2, true, 30_000);

    let candidates: Vec<Box<dyn Candidate>> =
        vec![Box::new(failing), Box::new(winner), Box::new(slow)];
    let result = CandidateRunner::new().race(candidates).await.unwrap();

    assert_eq!(result.id, 1);
    assert!(!failing_dir.exists());
    assert!(!slow_dir.exists());
    assert!(winner_dir.exists());
    assert_eq!(result.files.code, winner_dir.join("fib.py"));

    result.workspace.unwrap().teardown();
    assert!(!winner_dir.exists());
}

#[tokio::test]
async fn failed_workspaces_are_preserved_in_debug_mode() {
    let out = tempdir().unwrap();
    let runner = CandidateRunner::preserving_failed(FailedArchive {
        output_dir: out.path().to_path_buf(),
        name: "fib".to_string(),
        env_dir_name: "venv".to_string(),
    });
    let (a, _) = WorkspaceCandidate::new(0, false, 1);
    let (b, _) = WorkspaceCandidate::new(1, false, 5);

    let candidates: Vec<Box<dyn Candidate>> = vec![Box::new(a), Box::new(b)];
    let err = runner.race(candidates).await.unwrap_err();
    assert!(matches!(err, ForgeError::AllCandidatesFailed { count: 2, .. }));

    for id in 0..2 {
        let preserved = out.path().join(format!("fib_{id}_failed"));
        assert!(preserved.join("fib.py").exists());
        assert!(preserved.join("fib_test.py").exists());
        assert!(!preserved.join("venv").exists());
    }
}
