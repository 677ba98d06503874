//! Error types for scribe-core.

use thiserror::Error;

/// Result type for scribe-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in scribe-core.
///
/// Failures raised by user code are not represented here; those are
/// [`ScriptError`](crate::script::ScriptError) values that the runtime turns
/// into `receive-error` events.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to parse a notebook document.
    #[error("notebook error: {0}")]
    Notebook(String),

    /// Cell not found.
    #[error("cell not found: {0}")]
    CellNotFound(String),

    /// The notebook selection contained no code cells.
    #[error("notebook has no code cells to evaluate")]
    NoCodeCells,

    /// Project preparation failed.
    #[error("project setup failed: {0}")]
    ProjectSetup(String),

    /// A module referenced by a cell could not be made available.
    #[error("module install failed: {0}")]
    ModuleInstall(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IPC communication error with worker process.
    #[error("IPC error: {0}")]
    Ipc(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
