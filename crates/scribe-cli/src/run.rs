//! Run command implementation for Scribe CLI.
//!
//! Evaluates a notebook headlessly in this process and prints its events.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use scribe_core::events::{EvalEvent, NotebookEvent};
use scribe_core::{
    CellId, Driver, EvalOptions, EvaluationRequest, EventSink, Notebook, Outcome, with_eval_stack,
};

use crate::colors;

/// Options of `scribe run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cell: Option<String>,
    pub single_cell: bool,
    pub project_dir: Option<PathBuf>,
    pub deadline_ms: Option<u64>,
    pub max_outputs: Option<usize>,
    /// Print raw event JSON, one per line.
    pub json: bool,
}

/// Prints events as they arrive.
struct TerminalSink {
    notebook_id: String,
    json: bool,
}

impl EventSink for TerminalSink {
    fn emit(&mut self, event: EvalEvent) {
        if self.json {
            let event = NotebookEvent::new(self.notebook_id.clone(), event);
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!("Failed to encode event: {}", e),
            }
            return;
        }

        match event {
            EvalEvent::CellEvalStarted { cell_id } => {
                println!("{}▶ {}{}", colors::CYAN, cell_id, colors::RESET);
            }
            EvalEvent::ReceiveDisplay { values, .. } => {
                let text: Vec<String> = values.iter().map(render_value).collect();
                println!("  {}", text.join(" "));
            }
            EvalEvent::ReceiveError {
                cell_id, message, ..
            } => {
                let cell = cell_id.map(|c| format!("[{}] ", c)).unwrap_or_default();
                for (i, line) in message.lines().enumerate() {
                    let prefix = if i == 0 { cell.as_str() } else { "  " };
                    eprintln!("{}{}{}{}", colors::RED, prefix, line, colors::RESET);
                }
            }
            EvalEvent::OutputCapped { cell_id } => {
                println!(
                    "{}  output of {} capped{}",
                    colors::YELLOW,
                    cell_id,
                    colors::RESET
                );
            }
            EvalEvent::CellEvalCompleted { cell_id, .. } => {
                println!("{}✓ {}{}", colors::DIM, cell_id, colors::RESET);
            }
            EvalEvent::NotebookEvalCompleted => {}
        }
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Execute a notebook.
pub fn execute(notebook_path: &str, options: RunOptions) -> anyhow::Result<()> {
    let start = Instant::now();
    let path = Path::new(notebook_path);
    if !path.exists() {
        anyhow::bail!("Notebook not found: {}", notebook_path);
    }
    let notebook = Notebook::from_path(path)?;

    let project_dir = match options.project_dir {
        Some(dir) => dir,
        None => path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let defaults = EvalOptions::default();
    let request = EvaluationRequest {
        notebook,
        cell_id: options.cell.as_deref().map(CellId::from),
        single_cell: options.single_cell,
        options: EvalOptions {
            project_dir,
            deadline: options.deadline_ms.map(Duration::from_millis),
            max_outputs: options.max_outputs.unwrap_or(defaults.max_outputs),
            ..defaults
        },
    };

    let notebook_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "notebook".to_string());
    let sink = TerminalSink {
        notebook_id,
        json: options.json,
    };

    let outcome = with_eval_stack(move || Driver::default().run(request, sink))?;
    if !options.json {
        let (color, label) = match outcome {
            Outcome::Completed => (colors::GREEN, "Completed"),
            Outcome::Failed => (colors::RED, "Failed"),
            Outcome::TimedOut => (colors::RED, "Timed out"),
        };
        println!(
            "\n{}{}{}{} in {:.2}s",
            colors::BOLD,
            color,
            label,
            colors::RESET,
            start.elapsed().as_secs_f64()
        );
    }

    match outcome {
        Outcome::Completed => Ok(()),
        Outcome::Failed => anyhow::bail!("Evaluation failed"),
        Outcome::TimedOut => anyhow::bail!("Evaluation exceeded its time limit"),
    }
}
