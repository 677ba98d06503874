//! Worker-side evaluation driver.
//!
//! Wires the collaborators around the runtime: project preparation, cell
//! selection, module installation, generation with per-cell compile error
//! isolation, and finally the [`Evaluation`] itself.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::codegen::{CodeGenerator, GeneratedUnit};
use crate::compile::{Compiler, ScriptCompiler};
use crate::error::Error;
use crate::events::{ErrorSource, EvalEvent};
use crate::notebook::{Cell, CellId, Notebook};
use crate::runtime::{EvalOptions, Evaluation, EventSink, Outcome};
use crate::setup::{DirectoryPreparer, ModuleInstaller, ProjectModuleInstaller, ProjectPreparer};
use crate::translate::ErrorTranslator;

/// Stack size of the thread evaluations run on. Generated programs nest one
/// closure per cell and both the parser and the interpreter recurse on that
/// nesting.
pub const EVAL_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Run `f` on a thread with [`EVAL_STACK_SIZE`] bytes of stack and return its
/// result. A panic on that thread is resumed on the caller's.
pub fn with_eval_stack<T, F>(f: F) -> std::io::Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("scribe-eval".to_string())
            .stack_size(EVAL_STACK_SIZE)
            .spawn_scoped(scope, f)?;
        Ok(handle
            .join()
            .unwrap_or_else(|payload| std::panic::resume_unwind(payload)))
    })
}

/// What to evaluate and how.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub notebook: Notebook,
    /// Target cell; with `single_cell` only it runs, otherwise every code
    /// cell up to it
    pub cell_id: Option<CellId>,
    pub single_cell: bool,
    pub options: EvalOptions,
}

impl EvaluationRequest {
    pub fn new(notebook: Notebook) -> Self {
        Self {
            notebook,
            cell_id: None,
            single_cell: false,
            options: EvalOptions::default(),
        }
    }
}

/// Runs evaluation requests with a set of collaborators.
pub struct Driver {
    preparer: Box<dyn ProjectPreparer>,
    installer: Box<dyn ModuleInstaller>,
    compiler: Box<dyn Compiler>,
}

impl Default for Driver {
    fn default() -> Self {
        Self {
            preparer: Box::new(DirectoryPreparer),
            installer: Box::new(ProjectModuleInstaller::from_env()),
            compiler: Box::new(ScriptCompiler),
        }
    }
}

impl Driver {
    pub fn with_preparer(mut self, preparer: impl ProjectPreparer + 'static) -> Self {
        self.preparer = Box::new(preparer);
        self
    }

    pub fn with_installer(mut self, installer: impl ModuleInstaller + 'static) -> Self {
        self.installer = Box::new(installer);
        self
    }

    pub fn with_compiler(mut self, compiler: impl Compiler + 'static) -> Self {
        self.compiler = Box::new(compiler);
        self
    }

    /// Evaluate a request. `notebook-eval-completed` is always the last
    /// event emitted.
    ///
    /// Large notebooks need more stack than a default thread has; call this
    /// from inside [`with_eval_stack`].
    pub fn run(&self, request: EvaluationRequest, mut sink: impl EventSink + 'static) -> Outcome {
        let project_dir = request.options.project_dir.clone();
        let first_code_cell = request.notebook.code_cells().next().map(|c| c.id.clone());

        if let Err(e) = self.preparer.prepare(&project_dir) {
            warn!("Project preparation failed: {}", e);
            sink.emit(EvalEvent::error(first_code_cell, e.to_string(), ErrorSource::CodeSetup));
            sink.emit(EvalEvent::NotebookEvalCompleted);
            return Outcome::Failed;
        }

        let cells = match request
            .notebook
            .select(request.cell_id.as_ref(), request.single_cell)
        {
            Ok(cells) => cells,
            Err(e) => {
                sink.emit(EvalEvent::error(None, e.to_string(), ErrorSource::CodeSetup));
                sink.emit(EvalEvent::NotebookEvalCompleted);
                return Outcome::Failed;
            }
        };
        if cells.is_empty() {
            warn!("{}", Error::NoCodeCells);
            sink.emit(EvalEvent::NotebookEvalCompleted);
            return Outcome::Completed;
        }

        let mut excluded = HashSet::new();
        for cell in &cells {
            if let Err(e) = self.installer.ensure(&cell.text, &project_dir) {
                info!("Module install failed for cell {}: {}", cell.id, e);
                sink.emit(EvalEvent::error(
                    Some(cell.id.clone()),
                    e.to_string(),
                    ErrorSource::ModuleInstall,
                ));
                excluded.insert(cell.id.clone());
            }
        }
        let cells: Vec<Cell> = cells
            .into_iter()
            .filter(|cell| !excluded.contains(&cell.id))
            .collect();

        let Some(unit) = self.compile(cells, &mut sink) else {
            sink.emit(EvalEvent::NotebookEvalCompleted);
            return Outcome::Failed;
        };

        debug!(
            "Running {} cells from {} ({} mapped lines)",
            unit.cells.len(),
            unit.file,
            unit.source_map.len()
        );
        Evaluation::new(unit, request.options).run(sink)
    }

    /// Generate and compile, dropping cells that do not compile on their own.
    fn compile(&self, cells: Vec<Cell>, sink: &mut impl EventSink) -> Option<GeneratedUnit> {
        if cells.is_empty() {
            return None;
        }
        let generator = CodeGenerator::new();
        let unit = generator.generate(&cells, self.compiler.as_ref());
        if unit.is_compiled() {
            return Some(unit);
        }

        debug!("Notebook failed to compile, isolating failing cells");
        let mut remaining = Vec::with_capacity(cells.len());
        for cell in cells {
            let isolated = generator.generate(std::slice::from_ref(&cell), self.compiler.as_ref());
            if isolated.is_compiled() {
                remaining.push(cell);
                continue;
            }
            let translator = ErrorTranslator::new(&isolated.source_map, &isolated.file);
            for diagnostic in &isolated.diagnostics {
                let error = translator.translate_diagnostic(diagnostic, Some(&cell.id));
                sink.emit(error.into_event(ErrorSource::Compiler));
            }
        }
        if remaining.is_empty() {
            return None;
        }

        let unit = generator.generate(&remaining, self.compiler.as_ref());
        if unit.is_compiled() {
            return Some(unit);
        }

        // The cells only fail together; blame the first one.
        let first = remaining[0].id.clone();
        let translator = ErrorTranslator::new(&unit.source_map, &unit.file);
        for diagnostic in &unit.diagnostics {
            let error = translator.translate_diagnostic(diagnostic, Some(&first));
            sink.emit(error.into_event(ErrorSource::Compiler));
        }
        None
    }
}
