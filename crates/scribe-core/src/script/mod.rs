//! Cell script: the small dynamically typed language notebook cells are
//! written in.
//!
//! Source text is tokenized with `logos`, parsed into an [`ast::Program`],
//! and executed by the tree-walking [`Interpreter`]. Deferred work (timers,
//! microtasks) lives in the interpreter's [`Scheduler`] and is observable
//! through [`AsyncHook`]s.

pub mod ast;
pub mod builtins;
pub mod environment;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod scheduler;
pub mod value;

pub use ast::{Pos, Program};
pub use environment::{Env, Scope};
pub use error::{ScriptError, StackFrame};
pub use interpreter::{Interpreter, NATIVE_FILE};
pub use parser::{ParseError, parse_program};
pub use scheduler::{AsyncHook, AsyncId, ROOT_CONTEXT, ResourceKind, Scheduler};
pub use value::{ObjectMap, Value};
