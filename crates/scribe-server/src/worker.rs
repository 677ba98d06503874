//! Worker process management.
//!
//! Provides [`WorkerProcess`] for spawning one isolated evaluation worker and
//! reading its message stream.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use scribe_core::ipc::{WorkerMessage, WorkerRequest, read_message_async, write_message};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use crate::error::{ServerError, ServerResult};

/// Environment variable overriding worker discovery.
pub const WORKER_PATH_ENV: &str = "SCRIBE_WORKER_PATH";

const WORKER_NAME: &str = if cfg!(windows) {
    "scribe-worker.exe"
} else {
    "scribe-worker"
};

/// Find the scribe-worker binary.
///
/// Looks in the following order:
/// 1. `SCRIBE_WORKER_PATH` environment variable
/// 2. Same directory as the current executable
/// 3. System PATH
/// 4. `target/debug` or `target/release` of this workspace
pub fn find_worker_binary() -> ServerResult<PathBuf> {
    if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Some(path) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_NAME)))
        .filter(|path| path.exists())
    {
        return Ok(path);
    }

    if let Ok(path) = which::which(WORKER_NAME) {
        return Ok(path);
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    for profile in ["debug", "release"] {
        let path = manifest_dir
            .join("..")
            .join("..")
            .join("target")
            .join(profile)
            .join(WORKER_NAME);
        if path.exists() {
            return Ok(path.canonicalize().unwrap_or(path));
        }
    }

    Err(ServerError::WorkerNotFound(format!(
        "could not find {}. Set {} or ensure it's in PATH.",
        WORKER_NAME, WORKER_PATH_ENV
    )))
}

/// A running worker process.
///
/// The worker receives exactly one request on stdin, which is closed right
/// after. Dropping the handle kills the process.
pub struct WorkerProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
    pid: Option<u32>,
}

impl WorkerProcess {
    /// Spawn a worker and hand it `request`.
    pub async fn spawn(worker_path: &Path, request: &WorkerRequest) -> ServerResult<Self> {
        let mut child = Command::new(worker_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // worker logs and cell print output
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ServerError::WorkerSpawn(format!("'{}': {}", worker_path.display(), e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ServerError::WorkerSpawn("failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServerError::WorkerSpawn("failed to get worker stdout".to_string()))?;

        let mut frame = Vec::new();
        write_message(&mut frame, request)?;
        stdin.write_all(&frame).await?;
        stdin.shutdown().await?;

        let pid = child.id();
        tracing::debug!("Spawned worker {:?}", pid);
        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            pid,
        })
    }

    /// Process ID of the worker.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next message, or `None` once the worker closed stdout.
    pub async fn recv(&mut self) -> ServerResult<Option<WorkerMessage>> {
        Ok(read_message_async(&mut self.stdout).await?)
    }

    /// Kill the worker and reap it.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            // InvalidInput means the process already exited
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill worker: {}", e);
            }
        }
    }

    /// Wait for the worker to exit on its own.
    pub async fn wait(&mut self) -> Option<ExitStatus> {
        self.child.wait().await.ok()
    }
}
