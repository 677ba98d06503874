//! Evaluation events streamed to the caller.

use serde::{Deserialize, Serialize};

use crate::codegen::CellLocation;
use crate::notebook::CellId;

/// Where an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorSource {
    /// A module a cell imports could not be made available.
    ModuleInstall,
    /// The program could not be set up; no cell ran.
    CodeSetup,
    /// Raised while running cells, including crashes and timeouts.
    CodeEvaluation,
    /// Diagnostics of the compile step.
    Compiler,
}

/// One event of a notebook evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "name",
    content = "args",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum EvalEvent {
    CellEvalStarted {
        cell_id: CellId,
    },
    CellEvalCompleted {
        cell_id: CellId,
        /// Latest captured top-level bindings of the cell
        #[serde(default)]
        locals: serde_json::Value,
    },
    ReceiveDisplay {
        cell_id: CellId,
        values: Vec<serde_json::Value>,
    },
    ReceiveError {
        cell_id: Option<CellId>,
        message: String,
        source: ErrorSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<CellLocation>,
    },
    OutputCapped {
        cell_id: CellId,
    },
    NotebookEvalCompleted,
}

impl EvalEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            EvalEvent::CellEvalStarted { .. } => "cell-eval-started",
            EvalEvent::CellEvalCompleted { .. } => "cell-eval-completed",
            EvalEvent::ReceiveDisplay { .. } => "receive-display",
            EvalEvent::ReceiveError { .. } => "receive-error",
            EvalEvent::OutputCapped { .. } => "output-capped",
            EvalEvent::NotebookEvalCompleted => "notebook-eval-completed",
        }
    }

    pub fn cell_id(&self) -> Option<&CellId> {
        match self {
            EvalEvent::CellEvalStarted { cell_id }
            | EvalEvent::CellEvalCompleted { cell_id, .. }
            | EvalEvent::ReceiveDisplay { cell_id, .. }
            | EvalEvent::OutputCapped { cell_id } => Some(cell_id),
            EvalEvent::ReceiveError { cell_id, .. } => cell_id.as_ref(),
            EvalEvent::NotebookEvalCompleted => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EvalEvent::NotebookEvalCompleted)
    }

    pub fn error(cell_id: Option<CellId>, message: impl Into<String>, source: ErrorSource) -> Self {
        EvalEvent::ReceiveError {
            cell_id,
            message: message.into(),
            source,
            location: None,
        }
    }
}

/// An event as delivered to callers: `{ name, args, notebookId }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookEvent {
    pub notebook_id: String,
    #[serde(flatten)]
    pub event: EvalEvent,
}

impl NotebookEvent {
    pub fn new(notebook_id: impl Into<String>, event: EvalEvent) -> Self {
        Self {
            notebook_id: notebook_id.into(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_wire_shape() {
        let event = NotebookEvent::new(
            "nb",
            EvalEvent::ReceiveDisplay {
                cell_id: CellId::from("c1"),
                values: vec![json!(1)],
            },
        );
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"name": "receive-display", "args": {"cellId": "c1", "values": [1]}, "notebookId": "nb"})
        );
    }

    #[test]
    fn test_terminal_event_has_no_args() {
        let value = serde_json::to_value(EvalEvent::NotebookEvalCompleted).unwrap();
        assert_eq!(value, json!({"name": "notebook-eval-completed"}));
        let back: EvalEvent = serde_json::from_value(value).unwrap();
        assert!(back.is_terminal());
    }

    #[test]
    fn test_error_event_round_trip() {
        let event = EvalEvent::error(Some(CellId::from("c")), "boom", ErrorSource::CodeEvaluation);
        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains("\"source\":\"code-evaluation\""));
        let back: EvalEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }
}
