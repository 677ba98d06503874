//! Errors raised while running cell script.

use std::fmt;
use std::rc::Rc;

use super::ast::Pos;
use super::scheduler::AsyncId;
use super::value::{ObjectMap, Value};

/// Message used when an evaluation runs past its deadline.
pub const TIME_LIMIT_MESSAGE: &str = "evaluation exceeded its time limit";

/// One frame of a script stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: Rc<str>,
    pub file: Rc<str>,
    pub pos: Pos,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {} ({}:{})", self.function, self.file, self.pos)
    }
}

/// An exception in flight.
///
/// `stack` is empty until the interpreter attaches the location where the
/// error surfaced; the first frame is the innermost one.
#[derive(Debug, Clone)]
pub struct ScriptError {
    /// Human-readable message, e.g. `ReferenceError: x is not defined`.
    pub message: String,
    /// The value a `catch` clause binds.
    pub value: Value,
    pub stack: Vec<StackFrame>,
    /// Async context that was current when the error was raised.
    pub context: AsyncId,
    /// Raised by the interpreter itself to abort execution; `catch` does not
    /// intercept it.
    pub interrupted: bool,
}

impl ScriptError {
    /// An error object of the given kind (`TypeError`, `ReferenceError`, ...).
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let value = error_object(kind, &message);
        Self {
            message: format!("{}: {}", kind, message),
            value,
            stack: Vec::new(),
            context: 0,
            interrupted: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::new("ReferenceError", message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new("RangeError", message)
    }

    /// Wrap a value raised with `throw`.
    pub fn thrown(value: Value) -> Self {
        let message = match (value.get_field("name"), value.get_field("message")) {
            (name, Some(message)) => {
                let name = name.map(|n| n.to_string()).unwrap_or_else(|| "Error".to_string());
                format!("{}: {}", name, message)
            }
            _ => value.to_string(),
        };
        Self {
            message,
            value,
            stack: Vec::new(),
            context: 0,
            interrupted: false,
        }
    }

    /// Execution ran past its deadline.
    pub fn time_limit() -> Self {
        Self {
            interrupted: true,
            ..Self::error(TIME_LIMIT_MESSAGE)
        }
    }

    /// Innermost frame, i.e. where the error was raised.
    pub fn origin(&self) -> Option<&StackFrame> {
        self.stack.first()
    }

    pub(crate) fn is_attached(&self) -> bool {
        !self.stack.is_empty()
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for frame in &self.stack {
            write!(f, "\n    {}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

/// `{ name, message }` object used for runtime errors.
pub fn error_object(kind: &str, message: &str) -> Value {
    let mut fields = ObjectMap::new();
    fields.insert("name".into(), Value::str(kind));
    fields.insert("message".into(), Value::str(message));
    Value::object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thrown_error_object_message() {
        let err = ScriptError::thrown(error_object("Error", "boom"));
        assert_eq!(err.message, "Error: boom");
    }

    #[test]
    fn test_thrown_plain_value_message() {
        let err = ScriptError::thrown(Value::str("oops"));
        assert_eq!(err.message, "oops");
        let err = ScriptError::thrown(Value::Number(3.0));
        assert_eq!(err.message, "3");
    }

    #[test]
    fn test_kind_prefix() {
        let err = ScriptError::reference_error("x is not defined");
        assert_eq!(err.message, "ReferenceError: x is not defined");
        assert_eq!(err.value.get_field("name").unwrap().to_string(), "ReferenceError");
    }
}
