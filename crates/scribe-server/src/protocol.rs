//! HTTP protocol messages for the Scribe server.
//!
//! Evaluation events themselves are [`NotebookEvent`]s from scribe-core;
//! this module only defines the request and response envelopes.

use serde::{Deserialize, Serialize};

use scribe_core::{CellId, Notebook};

pub use scribe_core::NotebookEvent;

/// What a client asks the supervisor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    /// Evaluate the notebook.
    EvalNotebook,
    /// Worker exits immediately.
    TestDeath,
    /// Worker panics.
    TestException,
    /// Worker never finishes.
    TestLong,
}

/// Start an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalRequest {
    pub command: Command,
    /// Notebook the evaluation belongs to.
    pub notebook_id: String,
    /// Notebook document. Ignored by the test commands.
    #[serde(default)]
    pub notebook: Notebook,
    /// Target cell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<CellId>,
    /// Evaluate only the target cell.
    #[serde(default)]
    pub single_cell: bool,
}

impl EvalRequest {
    /// Evaluate a whole notebook.
    pub fn eval(notebook_id: impl Into<String>, notebook: Notebook) -> Self {
        Self {
            command: Command::EvalNotebook,
            notebook_id: notebook_id.into(),
            notebook,
            cell_id: None,
            single_cell: false,
        }
    }

    /// One of the worker test commands.
    pub fn test(notebook_id: impl Into<String>, command: Command) -> Self {
        Self {
            command,
            ..Self::eval(notebook_id, Notebook::default())
        }
    }
}

/// Stop an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub notebook_id: String,
}

/// Generic acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

/// Notebooks with a running evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub count: usize,
    pub notebooks: Vec<String>,
}

impl StatusResponse {
    pub fn new(mut notebooks: Vec<String>) -> Self {
        notebooks.sort();
        Self {
            count: notebooks.len(),
            notebooks,
        }
    }
}
