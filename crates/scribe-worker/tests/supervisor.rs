//! Integration tests for the evaluation supervisor.
//!
//! These drive the real `scribe-worker` binary built alongside the tests.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use scribe_core::events::{EvalEvent, NotebookEvent};
use scribe_core::{Cell, Notebook};
use scribe_server::{
    Command, EvalRequest, SessionState, Supervisor, SupervisorConfig, TERMINATED_MESSAGE,
};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Supervisor wired to the worker binary and a temporary project directory.
struct TestSupervisor {
    supervisor: Supervisor,
    _project: TempDir,
}

impl TestSupervisor {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(configure: impl FnOnce(&mut SupervisorConfig)) -> Self {
        let project = TempDir::new().expect("Failed to create project directory");
        let mut config = SupervisorConfig {
            worker_path: Some(PathBuf::from(env!("CARGO_BIN_EXE_scribe-worker"))),
            project_dir: project.path().to_path_buf(),
            grace_period: Duration::from_secs(5),
            ..SupervisorConfig::default()
        };
        configure(&mut config);
        Self {
            supervisor: Supervisor::new(config),
            _project: project,
        }
    }

    /// Pull until `notebook-eval-completed` arrives.
    async fn collect(&self, notebook_id: &str) -> Vec<NotebookEvent> {
        let deadline = Instant::now() + Duration::from_secs(20);
        let mut events = Vec::new();
        loop {
            events.extend(self.supervisor.pull_messages(notebook_id).await);
            if events.iter().any(|e| e.event.is_terminal()) {
                return events;
            }
            assert!(
                Instant::now() < deadline,
                "no terminal event, got {:?}",
                events
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn names(events: &[NotebookEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event.name()).collect()
}

fn error_messages(events: &[NotebookEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.event {
            EvalEvent::ReceiveError { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Evaluation
// =============================================================================

#[tokio::test]
async fn test_two_cells_share_locals() {
    let harness = TestSupervisor::new();
    let notebook = Notebook::new(vec![
        Cell::code("c1", "let x = 1;"),
        Cell::code("c2", "display(x)"),
    ]);
    harness
        .supervisor
        .start(EvalRequest::eval("nb", notebook))
        .await
        .unwrap();

    let events = harness.collect("nb").await;
    assert!(events.iter().all(|e| e.notebook_id == "nb"));
    assert_eq!(
        names(&events),
        vec![
            "cell-eval-started",
            "cell-eval-started",
            "receive-display",
            "cell-eval-completed",
            "cell-eval-completed",
            "notebook-eval-completed",
        ]
    );
    match &events[2].event {
        EvalEvent::ReceiveDisplay { cell_id, values } => {
            assert_eq!(cell_id.as_str(), "c2");
            assert_eq!(values, &vec![serde_json::json!(1)]);
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(harness.supervisor.status().await.count, 0);
    assert_eq!(
        harness.supervisor.state("nb").await,
        Some(SessionState::Completed)
    );
}

#[tokio::test]
async fn test_finished_session_removed_after_grace_period() {
    let harness = TestSupervisor::with_config(|config| {
        config.grace_period = Duration::from_millis(100);
    });
    harness
        .supervisor
        .start(EvalRequest::eval(
            "nb",
            Notebook::new(vec![Cell::code("c1", "display(1)")]),
        ))
        .await
        .unwrap();
    harness.collect("nb").await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.supervisor.state("nb").await, None);
    assert!(harness.supervisor.pull_messages("nb").await.is_empty());
}

// =============================================================================
// Failure Modes
// =============================================================================

#[tokio::test]
async fn test_worker_death() {
    let harness = TestSupervisor::new();
    harness
        .supervisor
        .start(EvalRequest::test("nb", Command::TestDeath))
        .await
        .unwrap();

    let events = harness.collect("nb").await;
    assert_eq!(names(&events), vec!["receive-error", "notebook-eval-completed"]);
    assert_eq!(error_messages(&events), vec![TERMINATED_MESSAGE]);
    assert!(harness.supervisor.status().await.notebooks.is_empty());
    assert_eq!(harness.supervisor.state("nb").await, Some(SessionState::Crashed));
}

#[tokio::test]
async fn test_worker_exception() {
    let harness = TestSupervisor::new();
    harness
        .supervisor
        .start(EvalRequest::test("nb", Command::TestException))
        .await
        .unwrap();

    let events = harness.collect("nb").await;
    assert_eq!(error_messages(&events), vec![TERMINATED_MESSAGE]);
    assert!(events.last().unwrap().event.is_terminal());
}

#[tokio::test]
async fn test_timeout_kills_worker() {
    let harness = TestSupervisor::with_config(|config| {
        config.timeout = Some(Duration::from_millis(100));
    });
    let start = Instant::now();
    harness
        .supervisor
        .start(EvalRequest::eval(
            "nb",
            Notebook::new(vec![Cell::code("spin", "while (true) { }")]),
        ))
        .await
        .unwrap();
    let pid = harness.supervisor.worker_pid("nb").await.expect("worker pid");

    let events = harness.collect("nb").await;
    assert!(start.elapsed() < Duration::from_secs(3));
    let error = events
        .iter()
        .find_map(|e| match &e.event {
            EvalEvent::ReceiveError {
                cell_id, message, ..
            } => Some((cell_id.clone(), message.clone())),
            _ => None,
        })
        .expect("error event");
    assert_eq!(error.0.as_ref().map(|c| c.as_str()), Some("spin"));
    assert_eq!(error.1, TERMINATED_MESSAGE);
    assert_eq!(
        harness.supervisor.state("nb").await,
        Some(SessionState::TimedOut)
    );

    if cfg!(target_os = "linux") {
        let proc_dir = PathBuf::from(format!("/proc/{}", pid));
        let deadline = Instant::now() + Duration::from_secs(5);
        while proc_dir.exists() {
            assert!(Instant::now() < deadline, "worker {} still alive", pid);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// =============================================================================
// Stop and Replace
// =============================================================================

#[tokio::test]
async fn test_stop_is_idempotent() {
    let harness = TestSupervisor::new();
    harness
        .supervisor
        .start(EvalRequest::test("nb", Command::TestLong))
        .await
        .unwrap();
    assert_eq!(harness.supervisor.status().await.notebooks, vec!["nb"]);

    harness.supervisor.stop("nb").await;
    harness.supervisor.stop("nb").await;

    let events = harness.collect("nb").await;
    assert_eq!(names(&events), vec!["receive-error", "notebook-eval-completed"]);
    assert_eq!(harness.supervisor.status().await.count, 0);
    assert_eq!(harness.supervisor.state("nb").await, Some(SessionState::Stopped));

    harness.supervisor.stop("nb").await;
    assert!(harness.supervisor.pull_messages("nb").await.is_empty());
}

#[tokio::test]
async fn test_restart_replaces_running_worker() {
    let harness = TestSupervisor::new();
    harness
        .supervisor
        .start(EvalRequest::test("nb", Command::TestLong))
        .await
        .unwrap();
    harness
        .supervisor
        .start(EvalRequest::eval(
            "nb",
            Notebook::new(vec![Cell::code("c1", "display(\"fresh\")")]),
        ))
        .await
        .unwrap();

    let events = harness.collect("nb").await;
    assert!(error_messages(&events).is_empty(), "{:?}", events);
    assert_eq!(events.iter().filter(|e| e.event.is_terminal()).count(), 1);
    assert_eq!(
        harness.supervisor.state("nb").await,
        Some(SessionState::Completed)
    );
}

#[tokio::test]
async fn test_replacing_finished_session_discards_its_events() {
    let harness = TestSupervisor::new();
    harness
        .supervisor
        .start(EvalRequest::eval(
            "nb",
            Notebook::new(vec![Cell::code("c1", "display(\"old\")")]),
        ))
        .await
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(20);
    while harness.supervisor.state("nb").await != Some(SessionState::Completed) {
        assert!(Instant::now() < deadline, "first run never completed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    harness
        .supervisor
        .start(EvalRequest::eval(
            "nb",
            Notebook::new(vec![Cell::code("c2", "display(\"new\")")]),
        ))
        .await
        .unwrap();

    let events = harness.collect("nb").await;
    assert_eq!(
        names(&events),
        vec![
            "cell-eval-started",
            "receive-display",
            "cell-eval-completed",
            "notebook-eval-completed",
        ]
    );
    assert!(
        events
            .iter()
            .filter_map(|e| e.event.cell_id())
            .all(|cell| cell.as_str() == "c2"),
        "{:?}",
        events
    );
}
