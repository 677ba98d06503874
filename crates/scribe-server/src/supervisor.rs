//! Evaluation supervisor.
//!
//! Owns one worker process per notebook evaluation. Each session is driven by
//! its own task that forwards worker events into the session's outbound
//! queue, which callers drain with [`Supervisor::pull_messages`].
//!
//! A session ends in one of four ways: the worker reports completion, the
//! worker exits early, the timeout fires, or the caller stops it. Every way
//! except the first synthesizes an error event followed by
//! `notebook-eval-completed`, so a caller polling for the terminal event
//! always sees one.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rustc_hash::FxHashMap;
use scribe_core::events::{ErrorSource, EvalEvent, NotebookEvent};
use scribe_core::ipc::{WorkerMessage, WorkerRequest};
use scribe_core::CellId;
use tokio::sync::{Mutex, oneshot};

use crate::error::ServerResult;
use crate::protocol::{Command, EvalRequest, StatusResponse};
use crate::worker::{WorkerProcess, find_worker_binary};

/// Message reported for crashes, timeouts and stops.
pub const TERMINATED_MESSAGE: &str = "evaluation terminated unexpectedly";

/// Environment variable overriding the default project directory.
pub const PROJECT_DIR_ENV: &str = "SCRIBE_PROJECT_DIR";

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Worker binary; discovered when unset.
    pub worker_path: Option<PathBuf>,
    /// Wall-clock limit for a whole evaluation.
    pub timeout: Option<Duration>,
    /// How long a finished session stays pullable.
    pub grace_period: Duration,
    /// Directory project modules live in.
    pub project_dir: PathBuf,
    /// Output cap passed to workers.
    pub max_outputs: u64,
    /// Worker-side deadline, enforced inside the interpreter.
    pub worker_deadline: Option<Duration>,
    /// Worker drain loop poll interval.
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            worker_path: None,
            timeout: None,
            grace_period: Duration::from_secs(5),
            project_dir: default_project_dir(),
            max_outputs: 1000,
            worker_deadline: None,
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// `SCRIBE_PROJECT_DIR`, else the user data directory, else `./.scribe`.
pub fn default_project_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(PROJECT_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|dir| dir.join("scribe").join("project"))
        .unwrap_or_else(|| PathBuf::from(".scribe"))
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    /// The worker reported completion.
    Completed,
    /// The worker exited before completing.
    Crashed,
    TimedOut,
    Stopped,
}

/// Why a driver task is told to kill its worker.
#[derive(Debug, Clone, Copy)]
enum Termination {
    /// Stopped by the caller; events were already synthesized.
    Stop,
    /// Superseded by a new evaluation of the same notebook.
    Replaced,
}

struct Session {
    generation: u64,
    state: SessionState,
    queue: Vec<NotebookEvent>,
    /// Last cell that reported `cell-eval-started`.
    last_started: Option<CellId>,
    /// Requested cell, else the first code cell.
    fallback_cell: Option<CellId>,
    terminal_seen: bool,
    pid: Option<u32>,
    kill: Option<oneshot::Sender<Termination>>,
}

impl Session {
    fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    fn push(&mut self, notebook_id: &str, event: EvalEvent) {
        if let EvalEvent::CellEvalStarted { cell_id } = &event {
            self.last_started = Some(cell_id.clone());
        }
        if event.is_terminal() {
            self.terminal_seen = true;
        }
        self.queue.push(NotebookEvent::new(notebook_id, event));
    }

    /// End the session, appending the synthetic error/completed pair.
    fn terminate(&mut self, notebook_id: &str, state: SessionState) {
        self.state = state;
        self.kill = None;
        if self.terminal_seen {
            return;
        }
        let cell_id = self.last_started.clone().or_else(|| self.fallback_cell.clone());
        self.push(
            notebook_id,
            EvalEvent::error(cell_id, TERMINATED_MESSAGE, ErrorSource::CodeEvaluation),
        );
        self.push(notebook_id, EvalEvent::NotebookEvalCompleted);
    }
}

struct Inner {
    config: SupervisorConfig,
    sessions: Mutex<FxHashMap<String, Session>>,
    generation: AtomicU64,
}

/// Supervises evaluation workers; clones share the same sessions.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sessions: Mutex::new(FxHashMap::default()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Start an evaluation, replacing any session of the same notebook.
    ///
    /// The worker is spawned before the old session is touched, so a failed
    /// spawn leaves it as it was. A replaced worker is killed without
    /// synthesizing events and its unpulled events are discarded; the new
    /// queue holds only the new run.
    pub async fn start(&self, request: EvalRequest) -> ServerResult<()> {
        let worker_path = match &self.inner.config.worker_path {
            Some(path) => path.clone(),
            None => find_worker_binary()?,
        };
        let notebook_id = request.notebook_id.clone();
        let fallback_cell = request
            .cell_id
            .clone()
            .or_else(|| request.notebook.code_cells().next().map(|c| c.id.clone()));
        let worker_request = self.worker_request(request)?;
        let worker = WorkerProcess::spawn(&worker_path, &worker_request).await?;

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (kill_tx, kill_rx) = oneshot::channel();
        let session = Session {
            generation,
            state: SessionState::Running,
            queue: Vec::new(),
            last_started: None,
            fallback_cell,
            terminal_seen: false,
            pid: worker.pid(),
            kill: Some(kill_tx),
        };

        let mut sessions = self.inner.sessions.lock().await;
        if let Some(mut old) = sessions.insert(notebook_id.clone(), session) {
            if let Some(kill) = old.kill.take() {
                tracing::info!("Replacing running evaluation of {}", notebook_id);
                let _ = kill.send(Termination::Replaced);
            }
            if !old.queue.is_empty() {
                tracing::debug!(
                    "Discarding {} unpulled events of {}",
                    old.queue.len(),
                    notebook_id
                );
            }
        }
        drop(sessions);

        tracing::info!("Started evaluation of {} (pid {:?})", notebook_id, worker.pid());
        tokio::spawn(drive(
            self.inner.clone(),
            notebook_id,
            generation,
            worker,
            kill_rx,
        ));
        Ok(())
    }

    /// Stop a running evaluation. Stopping a finished or unknown notebook is
    /// a no-op.
    pub async fn stop(&self, notebook_id: &str) {
        let mut sessions = self.inner.sessions.lock().await;
        let Some(session) = sessions.get_mut(notebook_id) else {
            return;
        };
        if !session.is_running() {
            return;
        }
        if let Some(kill) = session.kill.take() {
            let _ = kill.send(Termination::Stop);
        }
        session.terminate(notebook_id, SessionState::Stopped);
        let generation = session.generation;
        drop(sessions);

        tracing::info!("Stopped evaluation of {}", notebook_id);
        schedule_removal(self.inner.clone(), notebook_id.to_string(), generation);
    }

    /// Take every queued event. Unknown notebooks have none.
    pub async fn pull_messages(&self, notebook_id: &str) -> Vec<NotebookEvent> {
        let mut sessions = self.inner.sessions.lock().await;
        sessions
            .get_mut(notebook_id)
            .map(|session| std::mem::take(&mut session.queue))
            .unwrap_or_default()
    }

    /// Notebooks with a running evaluation.
    pub async fn status(&self) -> StatusResponse {
        let sessions = self.inner.sessions.lock().await;
        StatusResponse::new(
            sessions
                .iter()
                .filter(|(_, session)| session.is_running())
                .map(|(id, _)| id.clone())
                .collect(),
        )
    }

    /// State of a notebook's session, while it is still tracked.
    pub async fn state(&self, notebook_id: &str) -> Option<SessionState> {
        let sessions = self.inner.sessions.lock().await;
        sessions.get(notebook_id).map(|session| session.state)
    }

    /// Process ID of a notebook's worker.
    pub async fn worker_pid(&self, notebook_id: &str) -> Option<u32> {
        let sessions = self.inner.sessions.lock().await;
        sessions.get(notebook_id).and_then(|session| session.pid)
    }

    /// Kill every running worker without synthesizing events.
    pub async fn shutdown(&self) {
        let mut sessions = self.inner.sessions.lock().await;
        for (notebook_id, mut session) in sessions.drain() {
            if let Some(kill) = session.kill.take() {
                tracing::debug!("Killing worker for {}", notebook_id);
                let _ = kill.send(Termination::Replaced);
            }
        }
    }

    fn worker_request(&self, request: EvalRequest) -> ServerResult<WorkerRequest> {
        let config = &self.inner.config;
        Ok(match request.command {
            Command::EvalNotebook => WorkerRequest::Evaluate {
                notebook_id: request.notebook_id,
                notebook_json: serde_json::to_string(&request.notebook)?,
                cell_id: request.cell_id.map(|id| id.to_string()),
                single_cell: request.single_cell,
                project_dir: config.project_dir.to_string_lossy().into_owned(),
                max_outputs: config.max_outputs,
                deadline_ms: config.worker_deadline.map(|d| d.as_millis() as u64),
                poll_interval_ms: config.poll_interval.as_millis() as u64,
            },
            Command::TestDeath => WorkerRequest::TestDeath,
            Command::TestException => WorkerRequest::TestException,
            Command::TestLong => WorkerRequest::TestLong,
        })
    }
}

/// Forward worker messages into the session until the worker finishes or is
/// told to stop.
async fn drive(
    inner: Arc<Inner>,
    notebook_id: String,
    generation: u64,
    mut worker: WorkerProcess,
    mut kill_rx: oneshot::Receiver<Termination>,
) {
    let timeout = inner.config.timeout;
    let timer = async move {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(timer);

    loop {
        tokio::select! {
            message = worker.recv() => {
                let payload_json = match message {
                    Ok(Some(WorkerMessage::Event { payload_json })) => payload_json,
                    Ok(Some(WorkerMessage::Completed)) => {
                        finish(&inner, &notebook_id, generation, SessionState::Completed).await;
                        // The worker exits on its own right after this frame.
                        if tokio::time::timeout(Duration::from_secs(1), worker.wait())
                            .await
                            .is_err()
                        {
                            worker.kill().await;
                        }
                        return;
                    }
                    other => {
                        if let Err(e) = other {
                            tracing::warn!("Worker stream for {} failed: {}", notebook_id, e);
                        }
                        let status = worker.wait().await;
                        tracing::warn!("Worker for {} exited early ({:?})", notebook_id, status);
                        finish(&inner, &notebook_id, generation, SessionState::Crashed).await;
                        return;
                    }
                };
                record(&inner, &notebook_id, generation, &payload_json).await;
            }
            signal = &mut kill_rx => {
                if let Ok(Termination::Replaced) | Err(_) = signal {
                    tracing::debug!("Worker for {} superseded", notebook_id);
                }
                worker.kill().await;
                return;
            }
            _ = &mut timer => {
                tracing::warn!("Evaluation of {} timed out", notebook_id);
                finish(&inner, &notebook_id, generation, SessionState::TimedOut).await;
                worker.kill().await;
                return;
            }
        }
    }
}

/// Queue one worker event if its session is still current.
async fn record(inner: &Inner, notebook_id: &str, generation: u64, payload_json: &str) {
    let event = match serde_json::from_str::<NotebookEvent>(payload_json) {
        Ok(event) => event.event,
        Err(e) => {
            tracing::warn!("Dropping malformed worker event: {}", e);
            return;
        }
    };
    let mut sessions = inner.sessions.lock().await;
    match sessions.get_mut(notebook_id) {
        Some(session) if session.generation == generation && session.is_running() => {
            session.push(notebook_id, event);
        }
        _ => {}
    }
}

/// Move a still-running session into a terminal state.
async fn finish(inner: &Arc<Inner>, notebook_id: &str, generation: u64, state: SessionState) {
    let mut sessions = inner.sessions.lock().await;
    let Some(session) = sessions.get_mut(notebook_id) else {
        return;
    };
    if session.generation != generation || !session.is_running() {
        return;
    }
    if state == SessionState::Completed {
        session.state = state;
        session.kill = None;
    } else {
        session.terminate(notebook_id, state);
    }
    drop(sessions);
    schedule_removal(inner.clone(), notebook_id.to_string(), generation);
}

/// Remove a finished session once its grace period has passed.
fn schedule_removal(inner: Arc<Inner>, notebook_id: String, generation: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(inner.config.grace_period).await;
        let mut sessions = inner.sessions.lock().await;
        if sessions
            .get(&notebook_id)
            .is_some_and(|session| session.generation == generation && !session.is_running())
        {
            sessions.remove(&notebook_id);
            tracing::debug!("Removed session {}", notebook_id);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;

    fn session() -> Session {
        Session {
            generation: 1,
            state: SessionState::Running,
            queue: Vec::new(),
            last_started: None,
            fallback_cell: Some(CellId::from("first")),
            terminal_seen: false,
            pid: None,
            kill: None,
        }
    }

    fn last_error_cell(session: &Session) -> Option<String> {
        session.queue.iter().rev().find_map(|event| match &event.event {
            EvalEvent::ReceiveError { cell_id, .. } => cell_id.as_ref().map(|c| c.to_string()),
            _ => None,
        })
    }

    #[test]
    fn test_terminate_attributes_to_last_started_cell() {
        let mut session = session();
        session.push("nb", EvalEvent::CellEvalStarted { cell_id: CellId::from("a") });
        session.push("nb", EvalEvent::CellEvalStarted { cell_id: CellId::from("b") });
        session.terminate("nb", SessionState::Crashed);

        assert_eq!(session.state, SessionState::Crashed);
        assert_eq!(last_error_cell(&session).as_deref(), Some("b"));
        assert!(session.queue.last().unwrap().event.is_terminal());
    }

    #[test]
    fn test_terminate_falls_back_to_requested_cell() {
        let mut session = session();
        session.terminate("nb", SessionState::TimedOut);
        assert_eq!(last_error_cell(&session).as_deref(), Some("first"));
        assert_eq!(session.queue.len(), 2);
        match &session.queue[0].event {
            EvalEvent::ReceiveError { message, source, .. } => {
                assert_eq!(message, TERMINATED_MESSAGE);
                assert_eq!(*source, ErrorSource::CodeEvaluation);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_terminate_after_terminal_event_adds_nothing() {
        let mut session = session();
        session.push("nb", EvalEvent::NotebookEvalCompleted);
        session.terminate("nb", SessionState::Crashed);
        assert_eq!(session.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_notebook_is_empty() {
        let supervisor = Supervisor::new(SupervisorConfig::default());
        assert!(supervisor.pull_messages("missing").await.is_empty());
        supervisor.stop("missing").await;
        supervisor.stop("missing").await;
        assert_eq!(supervisor.status().await, StatusResponse::default());
        assert_eq!(supervisor.state("missing").await, None);
    }

    #[tokio::test]
    async fn test_missing_worker_binary_is_an_error() {
        let supervisor = Supervisor::new(SupervisorConfig {
            worker_path: Some(PathBuf::from("/nonexistent/scribe-worker")),
            ..SupervisorConfig::default()
        });
        let err = supervisor
            .start(EvalRequest::test("nb", Command::TestLong))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::WorkerSpawn(_)));
        assert_eq!(supervisor.status().await.count, 0);
    }

    #[tokio::test]
    async fn test_failed_spawn_keeps_existing_session() {
        let supervisor = Supervisor::new(SupervisorConfig {
            worker_path: Some(PathBuf::from("/nonexistent/scribe-worker")),
            ..SupervisorConfig::default()
        });
        let (kill_tx, mut kill_rx) = oneshot::channel();
        let mut existing = session();
        existing.kill = Some(kill_tx);
        existing.push("nb", EvalEvent::CellEvalStarted { cell_id: CellId::from("a") });
        supervisor
            .inner
            .sessions
            .lock()
            .await
            .insert("nb".to_string(), existing);

        let err = supervisor
            .start(EvalRequest::test("nb", Command::TestLong))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::WorkerSpawn(_)));

        assert!(matches!(
            kill_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        assert_eq!(supervisor.state("nb").await, Some(SessionState::Running));
        assert_eq!(supervisor.status().await.notebooks, vec!["nb"]);
        let events = supervisor.pull_messages("nb").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.name(), "cell-eval-started");
    }
}
