//! Output capture with a cap on emitted events.

use std::io::Write;

use super::EventSink;
use crate::events::EvalEvent;

/// Routes events to the sink and counts display/error output against the
/// cap. Lifecycle events are never capped.
pub struct Console {
    sink: Box<dyn EventSink>,
    max_outputs: usize,
    emitted: usize,
    capped: bool,
    echo: bool,
}

impl Console {
    pub fn new(sink: Box<dyn EventSink>, max_outputs: usize, echo: bool) -> Self {
        Self {
            sink,
            max_outputs,
            emitted: 0,
            capped: false,
            echo,
        }
    }

    /// Emit a lifecycle event.
    pub fn event(&mut self, event: EvalEvent) {
        self.sink.emit(event);
    }

    /// Emit a display or error event unless the cap was reached. The first
    /// suppressed event raises a single `output-capped`.
    pub fn output(&mut self, event: EvalEvent) -> bool {
        if self.emitted < self.max_outputs {
            self.emitted += 1;
            self.sink.emit(event);
            return true;
        }
        if !self.capped {
            self.capped = true;
            if let Some(cell_id) = event.cell_id().cloned() {
                tracing::debug!(cell = %cell_id, "output cap of {} reached", self.max_outputs);
                self.sink.emit(EvalEvent::OutputCapped { cell_id });
            }
        }
        false
    }

    /// Pass a script write through to the process.
    ///
    /// Writes to either stream land on stderr: stdout of the worker carries
    /// IPC frames.
    pub fn write(&mut self, text: &str) {
        if self.echo {
            let _ = std::io::stderr().lock().write_all(text.as_bytes());
        }
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn is_capped(&self) -> bool {
        self.capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notebook::CellId;
    use crate::runtime::CollectingSink;

    fn display(n: i64) -> EvalEvent {
        EvalEvent::ReceiveDisplay {
            cell_id: CellId::from("c"),
            values: vec![n.into()],
        }
    }

    #[test]
    fn test_cap_emits_single_marker() {
        let sink = CollectingSink::default();
        let mut console = Console::new(Box::new(sink.clone()), 2, false);
        assert!(console.output(display(1)));
        assert!(console.output(display(2)));
        assert!(!console.output(display(3)));
        assert!(!console.output(display(4)));
        console.event(EvalEvent::NotebookEvalCompleted);

        let names: Vec<_> = sink.events().iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec![
                "receive-display",
                "receive-display",
                "output-capped",
                "notebook-eval-completed"
            ]
        );
        assert!(console.is_capped());
        assert_eq!(console.emitted(), 2);
    }
}
