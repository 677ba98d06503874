//! Scribe worker process.
//!
//! Reads one [`WorkerRequest`] frame from stdin, evaluates it and streams
//! [`WorkerMessage`] frames back on stdout. stdout carries nothing but
//! frames, so logs and cell `print` output go to stderr.

use std::io::{self, BufReader, BufWriter, Stdout};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use scribe_core::events::{ErrorSource, EvalEvent, NotebookEvent};
use scribe_core::ipc::{WorkerMessage, WorkerRequest, read_message, write_message};
use scribe_core::{
    CellId, Driver, EvalOptions, EvaluationRequest, EventSink, Notebook, with_eval_stack,
};

/// Streams events to the supervisor as `Event` frames.
struct FrameSink {
    notebook_id: String,
    out: BufWriter<Stdout>,
    broken: bool,
}

impl FrameSink {
    fn new(notebook_id: String) -> Self {
        Self {
            notebook_id,
            out: BufWriter::new(io::stdout()),
            broken: false,
        }
    }

    fn send(&mut self, message: &WorkerMessage) {
        if self.broken {
            return;
        }
        if let Err(e) = write_message(&mut self.out, message) {
            // The supervisor is gone; keep evaluating but stop writing.
            tracing::warn!("Lost connection to supervisor: {}", e);
            self.broken = true;
        }
    }
}

impl EventSink for FrameSink {
    fn emit(&mut self, event: EvalEvent) {
        let terminal = event.is_terminal();
        let event = NotebookEvent::new(self.notebook_id.clone(), event);
        match serde_json::to_string(&event) {
            Ok(payload_json) => self.send(&WorkerMessage::Event { payload_json }),
            Err(e) => tracing::error!("Failed to encode event: {}", e),
        }
        if terminal {
            self.send(&WorkerMessage::Completed);
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut stdin = BufReader::new(io::stdin());
    let request: WorkerRequest =
        read_message(&mut stdin).context("Failed to read request from supervisor")?;

    match request {
        WorkerRequest::Evaluate {
            notebook_id,
            notebook_json,
            cell_id,
            single_cell,
            project_dir,
            max_outputs,
            deadline_ms,
            poll_interval_ms,
        } => {
            tracing::debug!("Evaluating notebook {}", notebook_id);
            let mut sink = FrameSink::new(notebook_id);

            let notebook: Notebook = match serde_json::from_str(&notebook_json) {
                Ok(notebook) => notebook,
                Err(e) => {
                    sink.emit(EvalEvent::error(
                        None,
                        format!("Invalid notebook document: {}", e),
                        ErrorSource::CodeSetup,
                    ));
                    sink.emit(EvalEvent::NotebookEvalCompleted);
                    return Ok(());
                }
            };

            let options = EvalOptions {
                max_outputs: max_outputs as usize,
                poll_interval: Duration::from_millis(poll_interval_ms),
                deadline: deadline_ms.map(Duration::from_millis),
                project_dir: PathBuf::from(project_dir),
                ..EvalOptions::default()
            };
            let request = EvaluationRequest {
                notebook,
                cell_id: cell_id.map(CellId::new),
                single_cell,
                options,
            };

            let outcome = with_eval_stack(move || Driver::default().run(request, sink))
                .context("Failed to start evaluation thread")?;
            tracing::debug!("Evaluation finished: {:?}", outcome);
        }

        WorkerRequest::TestDeath => {
            tracing::warn!("Exiting on request");
            std::process::exit(3);
        }

        WorkerRequest::TestException => {
            panic!("worker exception requested by supervisor");
        }

        WorkerRequest::TestLong => loop {
            std::thread::sleep(Duration::from_secs(1));
        },
    }

    Ok(())
}
