//! Integration tests for protocol message serialization.
//!
//! Checks the JSON shapes callers send and receive.

use scribe_core::events::{ErrorSource, EvalEvent, NotebookEvent};
use scribe_core::{Cell, CellId, Notebook};
use scribe_server::protocol::*;

#[test]
fn test_eval_request_from_json() {
    let json = r#"{
        "command": "eval-notebook",
        "notebookId": "nb-1",
        "notebook": { "cells": [ { "id": "c1", "text": "display(1)" } ] },
        "cellId": "c1",
        "singleCell": true
    }"#;
    let request: EvalRequest = serde_json::from_str(json).unwrap();
    assert_eq!(request.command, Command::EvalNotebook);
    assert_eq!(request.notebook_id, "nb-1");
    assert_eq!(request.notebook, Notebook::new(vec![Cell::code("c1", "display(1)")]));
    assert_eq!(request.cell_id, Some(CellId::from("c1")));
    assert!(request.single_cell);
}

#[test]
fn test_test_commands_need_no_notebook() {
    for (name, command) in [
        ("test-death", Command::TestDeath),
        ("test-exception", Command::TestException),
        ("test-long", Command::TestLong),
    ] {
        let json = format!(r#"{{ "command": "{}", "notebookId": "nb" }}"#, name);
        let request: EvalRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.command, command);
        assert!(request.notebook.cells.is_empty());
        assert!(!request.single_cell);
    }
}

#[test]
fn test_eval_request_omits_missing_cell() {
    let request = EvalRequest::test("nb", Command::TestDeath);
    let json = serde_json::to_value(&request).unwrap();
    assert_eq!(json["command"], "test-death");
    assert_eq!(json["notebookId"], "nb");
    assert!(json.get("cellId").is_none());
}

#[test]
fn test_stop_request_and_status() {
    let stop: StopRequest = serde_json::from_str(r#"{ "notebookId": "nb" }"#).unwrap();
    assert_eq!(stop.notebook_id, "nb");

    let status = StatusResponse::new(vec!["b".to_string(), "a".to_string()]);
    assert_eq!(
        serde_json::to_value(&status).unwrap(),
        serde_json::json!({ "count": 2, "notebooks": ["a", "b"] })
    );
}

#[test]
fn test_notebook_event_shape() {
    let event = NotebookEvent::new(
        "nb",
        EvalEvent::error(
            Some(CellId::from("c1")),
            "evaluation terminated unexpectedly",
            ErrorSource::CodeEvaluation,
        ),
    );
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["notebookId"], "nb");
    assert_eq!(json["name"], "receive-error");
    assert_eq!(json["args"]["cellId"], "c1");
    assert_eq!(json["args"]["message"], "evaluation terminated unexpectedly");

    let back: NotebookEvent = serde_json::from_value(json).unwrap();
    assert_eq!(back, event);
}
