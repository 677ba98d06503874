//! Evaluation engine for Scribe notebooks.
//!
//! This crate provides:
//! - The cell script language (lexer, parser, interpreter, async scheduler)
//! - Code generation from cells to one instrumented program, with source maps
//! - Async completion tracking per cell
//! - The evaluation runtime and the worker-side driver
//! - Error translation back to cell coordinates
//! - The IPC protocol spoken between supervisor and worker

pub mod codegen;
pub mod compile;
pub mod driver;
pub mod error;
pub mod events;
pub mod ipc;
pub mod notebook;
pub mod runtime;
pub mod script;
pub mod setup;
pub mod tracker;
pub mod translate;

pub use codegen::{CellLocation, CodeGenerator, GeneratedUnit, Mapping};
pub use compile::{CompileDiagnostic, Compiler, ScriptCompiler};
pub use driver::{Driver, EVAL_STACK_SIZE, EvaluationRequest, with_eval_stack};
pub use error::{Error, Result};
pub use events::{ErrorSource, EvalEvent, NotebookEvent};
pub use notebook::{Cell, CellId, CellScope, CellType, Notebook};
pub use runtime::{CollectingSink, EvalOptions, Evaluation, EventSink, Outcome};
pub use tracker::AsyncCompletionTracker;
pub use translate::{ErrorTranslator, TranslatedError};
