//! Error/source-map translation.
//!
//! Raw errors carry positions in the compiled program. Users only ever see
//! cell ids and cell-relative lines; frames the user did not write are
//! removed.

use crate::codegen::generator::ENTRY_FUNCTION;
use crate::codegen::{CellLocation, Mapping};
use crate::compile::CompileDiagnostic;
use crate::events::{ErrorSource, EvalEvent};
use crate::notebook::CellId;
use crate::script::{ScriptError, StackFrame};

/// A location in some file of the running program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// An error as produced by the runtime, before translation.
#[derive(Debug, Clone, Default)]
pub struct RawError {
    pub message: String,
    pub stack: Vec<StackFrame>,
    pub location: Option<RawLocation>,
}

impl RawError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

impl From<&ScriptError> for RawError {
    fn from(err: &ScriptError) -> Self {
        Self {
            message: err.message.clone(),
            stack: err.stack.clone(),
            location: err.origin().map(|frame| RawLocation {
                file: frame.file.to_string(),
                line: frame.pos.line,
                column: frame.pos.col,
            }),
        }
    }
}

/// A cell-attributed, user-facing error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedError {
    pub cell_id: Option<CellId>,
    pub message: String,
    pub location: Option<CellLocation>,
}

impl TranslatedError {
    pub fn into_event(self, source: ErrorSource) -> EvalEvent {
        EvalEvent::ReceiveError {
            cell_id: self.cell_id,
            message: self.message,
            source,
            location: self.location,
        }
    }
}

/// Translates errors of one generated unit.
pub struct ErrorTranslator<'a> {
    mapping: &'a Mapping,
    file: &'a str,
}

impl<'a> ErrorTranslator<'a> {
    pub fn new(mapping: &'a Mapping, file: &'a str) -> Self {
        Self { mapping, file }
    }

    /// Translate a raw error. `fallback` is used when the error location does
    /// not resolve to a cell.
    pub fn translate(&self, raw: &RawError, fallback: Option<&CellId>) -> TranslatedError {
        let location = raw
            .location
            .as_ref()
            .filter(|loc| loc.file == self.file)
            .and_then(|loc| self.mapping.resolve(loc.line, loc.column));
        let cell_id = location
            .as_ref()
            .map(|loc| loc.cell_id.clone())
            .or_else(|| fallback.cloned());

        let mut message = self.scrub(&raw.message);
        for frame in raw.stack.iter().filter_map(|frame| self.frame(frame)) {
            message.push_str("\n    ");
            message.push_str(&frame);
        }

        TranslatedError {
            cell_id,
            message,
            location,
        }
    }

    pub fn translate_diagnostic(
        &self,
        diagnostic: &CompileDiagnostic,
        fallback: Option<&CellId>,
    ) -> TranslatedError {
        let cell_id = diagnostic
            .location
            .as_ref()
            .map(|loc| loc.cell_id.clone())
            .or_else(|| fallback.cloned());
        let mut message = self.scrub(&diagnostic.message);
        if let Some(loc) = &diagnostic.location {
            message = format!("{} ({}:{})", message, loc.line, loc.column);
        }
        TranslatedError {
            cell_id,
            message,
            location: diagnostic.location.clone(),
        }
    }

    /// Rewrite one frame, or `None` when it is not user code.
    fn frame(&self, frame: &StackFrame) -> Option<String> {
        if &*frame.file != self.file {
            return None;
        }
        let loc = self.mapping.resolve(frame.pos.line, frame.pos.col)?;
        Some(format!(
            "at {} ({}:{}:{})",
            frame.function, loc.cell_id, loc.line, loc.column
        ))
    }

    /// Remove generated-file artifacts from free text.
    fn scrub(&self, text: &str) -> String {
        let text = if self.file.is_empty() {
            text.to_string()
        } else {
            text.replace(self.file, "<notebook>")
        };
        text.replace(ENTRY_FUNCTION, "<notebook>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Pos;

    fn mapping() -> Mapping {
        let mut mapping = Mapping::new();
        mapping.insert_block(3, 0, &CellId::from("a"), 1, 2);
        mapping.insert_block(7, 1, &CellId::from("b"), 1, 3);
        mapping
    }

    fn frame(function: &str, file: &str, line: u32, col: u32) -> StackFrame {
        StackFrame {
            function: function.into(),
            file: file.into(),
            pos: Pos::new(line, col),
        }
    }

    #[test]
    fn test_location_resolves_to_cell() {
        let mapping = mapping();
        let translator = ErrorTranslator::new(&mapping, "gen.sc");
        let raw = RawError {
            message: "TypeError: bad".into(),
            stack: vec![
                frame("helper", "gen.sc", 8, 5),
                frame("<anonymous>", "gen.sc", 9, 1),
                frame("beginCell", "native", 0, 0),
                frame("__scribe_entry", "gen.sc", 6, 1),
            ],
            location: Some(RawLocation {
                file: "gen.sc".into(),
                line: 8,
                column: 5,
            }),
        };
        let out = translator.translate(&raw, Some(&CellId::from("a")));
        assert_eq!(out.cell_id, Some(CellId::from("b")));
        assert_eq!(out.location.unwrap().line, 2);
        assert_eq!(
            out.message,
            "TypeError: bad\n    at helper (b:2:5)\n    at <anonymous> (b:3:1)"
        );
    }

    #[test]
    fn test_scaffolding_location_falls_back() {
        let mapping = mapping();
        let translator = ErrorTranslator::new(&mapping, "gen.sc");
        let raw = RawError {
            message: "Error: in gen.sc".into(),
            stack: vec![frame("__scribe_entry", "gen.sc", 5, 1)],
            location: Some(RawLocation {
                file: "gen.sc".into(),
                line: 5,
                column: 1,
            }),
        };
        let out = translator.translate(&raw, Some(&CellId::from("a")));
        assert_eq!(out.cell_id, Some(CellId::from("a")));
        assert!(out.location.is_none());
        assert_eq!(out.message, "Error: in <notebook>");
    }

    #[test]
    fn test_other_files_are_not_resolved() {
        let mapping = mapping();
        let translator = ErrorTranslator::new(&mapping, "gen.sc");
        let raw = RawError {
            message: "Error: in module".into(),
            stack: vec![frame("util", "/p/modules/util.sc", 3, 1)],
            location: Some(RawLocation {
                file: "/p/modules/util.sc".into(),
                line: 3,
                column: 1,
            }),
        };
        let out = translator.translate(&raw, None);
        assert_eq!(out.cell_id, None);
        assert_eq!(out.message, "Error: in module");
    }
}
