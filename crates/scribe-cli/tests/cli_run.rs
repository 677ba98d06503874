//! Integration tests for `scribe run`.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_notebook(dir: &TempDir, cells: serde_json::Value) -> PathBuf {
    let path = dir.path().join("demo.json");
    fs::write(&path, serde_json::json!({ "cells": cells }).to_string()).unwrap();
    path
}

fn scribe() -> Command {
    Command::cargo_bin("scribe").unwrap()
}

#[test]
fn test_run_prints_json_events() {
    let dir = TempDir::new().unwrap();
    let notebook = write_notebook(
        &dir,
        serde_json::json!([
            { "id": "a", "text": "let x = 20" },
            { "id": "b", "text": "display(x + 1)" }
        ]),
    );

    let output = scribe()
        .args(["run", "--json"])
        .arg(&notebook)
        .output()
        .unwrap();
    assert!(output.status.success());

    let events: Vec<serde_json::Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let names: Vec<&str> = events.iter().map(|e| e["name"].as_str().unwrap()).collect();
    assert_eq!(names.first(), Some(&"cell-eval-started"));
    assert_eq!(names.last(), Some(&"notebook-eval-completed"));
    assert!(events.iter().all(|e| e["notebookId"] == "demo"));

    let display = events
        .iter()
        .find(|e| e["name"] == "receive-display")
        .unwrap();
    assert_eq!(display["args"]["cellId"], "b");
    assert_eq!(display["args"]["values"], serde_json::json!([21]));
}

#[test]
fn test_run_pretty_output() {
    let dir = TempDir::new().unwrap();
    let notebook = write_notebook(
        &dir,
        serde_json::json!([{ "id": "greet", "text": "display(\"hello\")" }]),
    );

    scribe()
        .arg("run")
        .arg(&notebook)
        .assert()
        .success()
        .stdout(predicate::str::contains("greet"))
        .stdout(predicate::str::contains("hello"))
        .stdout(predicate::str::contains("Completed"));
}

#[test]
fn test_run_failure_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let notebook = write_notebook(
        &dir,
        serde_json::json!([{ "id": "bad", "text": "missing()" }]),
    );

    scribe()
        .arg("run")
        .arg(&notebook)
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing is not defined"));
}

#[test]
fn test_run_missing_notebook() {
    scribe()
        .args(["run", "/nonexistent/notebook.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Notebook not found"));
}
