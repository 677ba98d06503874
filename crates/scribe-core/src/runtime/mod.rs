//! Evaluation runtime.
//!
//! Runs a [`GeneratedUnit`] inside one interpreter. The instrumentation
//! hooks the generated program calls (`beginCell`, `captureLocals`,
//! `endOfCells`, `display`, `require`) are passed to its entry function as
//! arguments; nothing is installed globally except the output builtins.
//!
//! Phases: `Setup -> Executing -> Draining -> Finished`. Uncaught errors jump
//! straight to `Finished`.

pub mod console;

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::codegen::generator::ENTRY_FUNCTION;
use crate::codegen::GeneratedUnit;
use crate::events::{ErrorSource, EvalEvent};
use crate::notebook::{Cell, CellId};
use crate::script::builtins::builtin_module;
use crate::script::environment::{self, Scope};
use crate::script::error::TIME_LIMIT_MESSAGE;
use crate::script::{
    AsyncId, Interpreter, ObjectMap, ResourceKind, ScriptError, Value, parse_program,
};
use crate::setup::module_path;
use crate::tracker::{AsyncCompletionTracker, TrackerHook};
use crate::translate::{ErrorTranslator, RawError};

pub use console::Console;

/// Receives the events of an evaluation as they happen.
pub trait EventSink {
    fn emit(&mut self, event: EvalEvent);
}

/// Sink that keeps every event; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink(Rc<RefCell<Vec<EvalEvent>>>);

impl CollectingSink {
    pub fn events(&self) -> Vec<EvalEvent> {
        self.0.borrow().clone()
    }

    pub fn take(&self) -> Vec<EvalEvent> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

impl EventSink for CollectingSink {
    fn emit(&mut self, event: EvalEvent) {
        self.0.borrow_mut().push(event);
    }
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Display/error events emitted before output is capped
    pub max_outputs: usize,

    /// Upper bound on the sleep between drain ticks
    pub poll_interval: Duration,

    /// Wall-clock budget for the whole evaluation
    pub deadline: Option<Duration>,

    /// Continuations run per drain tick before completion is rechecked
    pub task_budget: usize,

    /// Directory `require` resolves project modules in
    pub project_dir: PathBuf,

    /// Pass `print`/`eprint` output through to the process
    pub echo_output: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            max_outputs: 1000,
            poll_interval: Duration::from_millis(1),
            deadline: None,
            task_budget: 256,
            project_dir: PathBuf::from("."),
            echo_output: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Executing,
    Draining,
    Finished,
}

/// How an evaluation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every started cell completed.
    Completed,
    /// Setup failed or an uncaught error was reported.
    Failed,
    /// The deadline passed.
    TimedOut,
}

struct CellState {
    /// Locals getter registered by `captureLocals`
    getter: Option<Value>,
    /// Locals as of the last capture
    locals: serde_json::Value,
    completed: bool,
}

impl Default for CellState {
    fn default() -> Self {
        Self {
            getter: None,
            locals: serde_json::Value::Object(Default::default()),
            completed: false,
        }
    }
}

/// State the instrumentation hooks share with the drain loop.
struct Shared {
    cells: Vec<Cell>,
    states: Vec<CellState>,
    console: Console,
    phase: Phase,
    /// Number of cells that reached `beginCell`
    started: usize,
    modules: FxHashMap<String, Value>,
    require: Option<Value>,
}

impl Shared {
    /// Cell for writes made in `context`; the first cell when the context
    /// belongs to no cell.
    fn attribute(&self, tracker: &AsyncCompletionTracker, context: AsyncId) -> Option<CellId> {
        let index = tracker.cell_for_context(context).unwrap_or(0);
        self.cells.get(index).map(|cell| cell.id.clone())
    }
}

type SharedRef = Rc<RefCell<Shared>>;
type TrackerRef = Rc<RefCell<AsyncCompletionTracker>>;

/// One evaluation of a generated unit.
pub struct Evaluation {
    unit: GeneratedUnit,
    options: EvalOptions,
}

impl Evaluation {
    pub fn new(unit: GeneratedUnit, options: EvalOptions) -> Self {
        Self { unit, options }
    }

    /// Run to completion, streaming events into `sink`. The last event is
    /// always `notebook-eval-completed`.
    pub fn run(self, sink: impl EventSink + 'static) -> Outcome {
        let started_at = Instant::now();
        let cell_count = self.unit.cells.len();
        let tracker: TrackerRef = Rc::new(RefCell::new(AsyncCompletionTracker::new(cell_count)));
        let shared: SharedRef = Rc::new(RefCell::new(Shared {
            cells: self.unit.cells.clone(),
            states: (0..cell_count).map(|_| CellState::default()).collect(),
            console: Console::new(
                Box::new(sink),
                self.options.max_outputs,
                self.options.echo_output,
            ),
            phase: Phase::Setup,
            started: 0,
            modules: FxHashMap::default(),
            require: None,
        }));

        let mut interp = Interpreter::new();
        interp.add_hook(Box::new(TrackerHook(tracker.clone())));
        let deadline = self.options.deadline.map(|budget| started_at + budget);
        interp.set_deadline(deadline);
        install_output(&mut interp, &shared, &tracker);

        let mut run = Run {
            unit: &self.unit,
            options: &self.options,
            shared,
            tracker,
            interp,
            deadline,
        };
        let outcome = run.execute();
        run.finish();
        debug!(
            "evaluation finished with {:?} after {:?}",
            outcome,
            started_at.elapsed()
        );
        outcome
    }
}

struct Run<'a> {
    unit: &'a GeneratedUnit,
    options: &'a EvalOptions,
    shared: SharedRef,
    tracker: TrackerRef,
    interp: Interpreter,
    deadline: Option<Instant>,
}

impl Run<'_> {
    fn execute(&mut self) -> Outcome {
        let entry = match self.setup() {
            Ok(entry) => entry,
            Err(message) => {
                let first = self.unit.cells.first().map(|cell| cell.id.clone());
                self.shared.borrow_mut().console.event(EvalEvent::error(
                    first,
                    message,
                    ErrorSource::CodeSetup,
                ));
                return Outcome::Failed;
            }
        };

        self.shared.borrow_mut().phase = Phase::Executing;
        let args = vec![
            self.require_fn(),
            Value::str(&self.unit.file),
            Value::str(self.options.project_dir.to_string_lossy()),
            self.display_fn(),
            self.begin_cell_fn(),
            self.end_of_cells_fn(),
            self.capture_locals_fn(),
        ];
        if let Err(err) = self.interp.invoke(&entry, args) {
            return self.fail(err);
        }

        let started = {
            let mut shared = self.shared.borrow_mut();
            if shared.phase != Phase::Draining {
                warn!("program returned before reaching the end of its cells");
                shared.phase = Phase::Draining;
            }
            shared.started
        };
        if started < self.unit.cells.len() {
            warn!(
                "{} of {} cells never started",
                self.unit.cells.len() - started,
                self.unit.cells.len()
            );
        }
        let mut tracker = self.tracker.borrow_mut();
        for index in 0..started {
            tracker.mark_returned(index);
        }
        drop(tracker);

        self.drain()
    }

    /// Compile the unit into an invocable entry function.
    fn setup(&mut self) -> Result<Value, String> {
        let code = self
            .unit
            .code
            .as_deref()
            .ok_or_else(|| "notebook did not compile".to_string())?;
        let program = parse_program(code).map_err(|e| e.to_string())?;
        let env = self
            .interp
            .run_program(&program, &self.unit.file)
            .map_err(|e| e.message)?;
        environment::lookup(&env, ENTRY_FUNCTION)
            .filter(Value::is_callable)
            .ok_or_else(|| "generated program has no entry function".to_string())
    }

    fn drain(&mut self) -> Outcome {
        loop {
            if let Err(err) = self.emit_completions() {
                return self.fail(err);
            }
            if self.all_completed() {
                return Outcome::Completed;
            }
            if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                self.report_time_limit(None);
                return Outcome::TimedOut;
            }
            if self.interp.scheduler().is_empty() {
                warn!("cells still pending with nothing scheduled");
                return Outcome::Completed;
            }
            match self.interp.run_ready(self.options.task_budget) {
                Err(err) => return self.fail(err),
                Ok(0) => self.idle(),
                Ok(_) => {}
            }
        }
    }

    /// Sleep until the next timer is due, at most one poll interval.
    fn idle(&self) {
        let now = Instant::now();
        let mut wait = self.options.poll_interval;
        if let Some(due) = self.interp.scheduler().next_due() {
            wait = wait.min(due.saturating_duration_since(now));
        }
        if let Some(deadline) = self.deadline {
            wait = wait.min(deadline.saturating_duration_since(now));
        }
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }

    /// Emit `cell-eval-completed` for newly drained cells, in index order,
    /// after re-running their locals capture.
    fn emit_completions(&mut self) -> Result<(), ScriptError> {
        let started = self.shared.borrow().started;
        for index in 0..started {
            let (getter, captured) = {
                let shared = self.shared.borrow();
                let state = &shared.states[index];
                if state.completed || !self.tracker.borrow().has_cell_completed(index) {
                    continue;
                }
                (state.getter.clone(), state.locals.clone())
            };
            let locals = match getter {
                Some(getter) => self.interp.invoke(&getter, Vec::new())?.to_json(),
                None => captured,
            };

            let mut guard = self.shared.borrow_mut();
            let shared = &mut *guard;
            let state = &mut shared.states[index];
            state.completed = true;
            state.locals = locals.clone();
            let cell_id = shared.cells[index].id.clone();
            debug!(cell = %cell_id, "cell completed");
            shared
                .console
                .event(EvalEvent::CellEvalCompleted { cell_id, locals });
        }
        Ok(())
    }

    fn all_completed(&self) -> bool {
        let shared = self.shared.borrow();
        shared.states[..shared.started].iter().all(|s| s.completed)
    }

    /// Report an uncaught error and stop.
    fn fail(&mut self, err: ScriptError) -> Outcome {
        if err.interrupted {
            self.report_time_limit(Some(err.context));
            return Outcome::TimedOut;
        }
        let fallback = {
            let shared = self.shared.borrow();
            shared.attribute(&self.tracker.borrow(), err.context)
        };
        let translated = ErrorTranslator::new(&self.unit.source_map, &self.unit.file)
            .translate(&RawError::from(&err), fallback.as_ref());
        debug!("uncaught error: {}", err);
        self.shared
            .borrow_mut()
            .console
            .event(translated.into_event(ErrorSource::CodeEvaluation));
        Outcome::Failed
    }

    fn report_time_limit(&mut self, context: Option<AsyncId>) {
        let mut shared = self.shared.borrow_mut();
        let index = context
            .and_then(|context| self.tracker.borrow().cell_for_context(context))
            .or_else(|| shared.started.checked_sub(1))
            .unwrap_or(0);
        let cell_id = shared.cells.get(index).map(|cell| cell.id.clone());
        warn!("evaluation exceeded its deadline");
        shared.console.event(EvalEvent::error(
            cell_id,
            TIME_LIMIT_MESSAGE,
            ErrorSource::CodeEvaluation,
        ));
    }

    fn finish(&mut self) {
        let mut shared = self.shared.borrow_mut();
        shared.phase = Phase::Finished;
        // Getters and module exports reference the interpreter's scopes.
        shared.states.clear();
        shared.modules.clear();
        shared.require = None;
        shared.console.event(EvalEvent::NotebookEvalCompleted);
    }

    // === Instrumentation hooks ===

    fn display_fn(&self) -> Value {
        let shared = self.shared.clone();
        let tracker = self.tracker.clone();
        Value::native("display", move |interp, args| {
            let values = args.iter().map(Value::to_json).collect();
            let mut shared = shared.borrow_mut();
            if let Some(cell_id) = shared.attribute(&tracker.borrow(), interp.current_context()) {
                shared
                    .console
                    .output(EvalEvent::ReceiveDisplay { cell_id, values });
            }
            Ok(Value::Null)
        })
    }

    fn begin_cell_fn(&self) -> Value {
        let shared = self.shared.clone();
        let tracker = self.tracker.clone();
        Value::native("beginCell", move |interp, args| {
            let index = cell_index(&args, "beginCell")?;
            let body = args.get(2).cloned().unwrap_or_default();
            let cell_id = shared
                .borrow()
                .cells
                .get(index)
                .map(|cell| cell.id.clone())
                .ok_or_else(|| ScriptError::range_error(format!("no cell at index {}", index)))?;

            // Entering a cell means every earlier body has run to its end.
            for earlier in 0..index {
                tracker.borrow_mut().mark_returned(earlier);
            }
            let context = interp.create_resource(ResourceKind::CellScope);
            tracker.borrow_mut().track_cell(context, index);
            {
                let mut shared = shared.borrow_mut();
                shared.started = shared.started.max(index + 1);
                debug!(cell = %cell_id, "cell started");
                shared.console.event(EvalEvent::CellEvalStarted { cell_id });
            }

            let previous = interp.enter_context(context);
            let result = interp.invoke_scaffold(&body, Vec::new());
            interp.restore_context(previous);
            interp.destroy_resource(context);
            result
        })
    }

    fn capture_locals_fn(&self) -> Value {
        let shared = self.shared.clone();
        Value::native("captureLocals", move |interp, args| {
            let index = cell_index(&args, "captureLocals")?;
            let getter = args.get(2).cloned().unwrap_or_default();
            let locals = interp.invoke(&getter, Vec::new())?.to_json();
            if let Some(state) = shared.borrow_mut().states.get_mut(index) {
                state.getter = Some(getter);
                state.locals = locals;
            }
            Ok(Value::Null)
        })
    }

    fn end_of_cells_fn(&self) -> Value {
        let shared = self.shared.clone();
        let tracker = self.tracker.clone();
        Value::native("endOfCells", move |_, _| {
            let started = {
                let mut shared = shared.borrow_mut();
                shared.phase = Phase::Draining;
                shared.started
            };
            let mut tracker = tracker.borrow_mut();
            for index in 0..started {
                tracker.mark_returned(index);
            }
            Ok(Value::Null)
        })
    }

    fn require_fn(&self) -> Value {
        let state = self.shared.clone();
        let project_dir = self.options.project_dir.clone();
        let require = Value::native("require", move |interp, args| {
            let Some(Value::Str(name)) = args.first() else {
                return Err(ScriptError::type_error("require: module name must be a string"));
            };
            let name = name.to_string();
            if let Some(exports) = state.borrow().modules.get(&name) {
                return Ok(exports.clone());
            }
            if let Some(exports) = builtin_module(&name) {
                state.borrow_mut().modules.insert(name, exports.clone());
                return Ok(exports);
            }

            let not_found = || ScriptError::error(format!("Cannot find module '{}'", name));
            let path = module_path(&project_dir, &name).ok_or_else(not_found)?;
            let source = fs::read_to_string(&path).map_err(|_| not_found())?;
            let program = parse_program(&source).map_err(|e| {
                ScriptError::new(
                    "SyntaxError",
                    format!("{} in module '{}' ({})", e.message, name, e.pos),
                )
            })?;

            // Registered before running so cyclic imports see partial exports.
            let exports = Value::object(ObjectMap::new());
            let require = {
                let mut state = state.borrow_mut();
                state.modules.insert(name.clone(), exports.clone());
                state.require.clone().unwrap_or_default()
            };
            let env = Scope::child(interp.globals());
            {
                let mut scope = env.borrow_mut();
                scope.declare("exports".into(), exports.clone(), true);
                scope.declare("require".into(), require, true);
            }
            debug!("loading module {} from {}", name, path.display());
            interp.run_program_in(&program, &path.to_string_lossy(), &env)?;
            Ok(exports)
        });
        self.shared.borrow_mut().require = Some(require.clone());
        require
    }
}

/// `print` and `eprint`: passed through to the process and turned into
/// display/error events for the attributed cell.
fn install_output(interp: &mut Interpreter, shared: &SharedRef, tracker: &TrackerRef) {
    let (out_shared, out_tracker) = (shared.clone(), tracker.clone());
    interp.define_global(
        "print",
        Value::native("print", move |interp, args| {
            let text = join_args(&args);
            let mut shared = out_shared.borrow_mut();
            shared.console.write(&format!("{}\n", text));
            if let Some(cell_id) =
                shared.attribute(&out_tracker.borrow(), interp.current_context())
            {
                shared.console.output(EvalEvent::ReceiveDisplay {
                    cell_id,
                    values: vec![serde_json::Value::String(text)],
                });
            }
            Ok(Value::Null)
        }),
    );

    let (err_shared, err_tracker) = (shared.clone(), tracker.clone());
    interp.define_global(
        "eprint",
        Value::native("eprint", move |interp, args| {
            let text = join_args(&args);
            let mut shared = err_shared.borrow_mut();
            shared.console.write(&format!("{}\n", text));
            let cell_id = shared.attribute(&err_tracker.borrow(), interp.current_context());
            shared
                .console
                .output(EvalEvent::error(cell_id, text, ErrorSource::CodeEvaluation));
            Ok(Value::Null)
        }),
    );
}

fn join_args(args: &[Value]) -> String {
    args.iter()
        .map(|arg| arg.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn cell_index(args: &[Value], function: &str) -> Result<usize, ScriptError> {
    match args.first() {
        Some(Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
        _ => Err(ScriptError::type_error(format!(
            "{}: cell index must be a non-negative integer",
            function
        ))),
    }
}
