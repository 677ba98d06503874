//! Compiler collaborator.
//!
//! The code generator hands its output to a [`Compiler`], which may rewrite
//! syntax line by line and report diagnostics. [`ScriptCompiler`] is the
//! default implementation for cell script.

use serde::{Deserialize, Serialize};

use crate::codegen::CellLocation;
use crate::codegen::imports::parse_import_line;
use crate::script::parse_program;

/// Output line -> input line table of a line-for-line translation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap {
    /// `lines[n]` is the input line of output line `n + 1`
    lines: Vec<u32>,
}

impl LineMap {
    pub fn from_lines(lines: Vec<u32>) -> Self {
        Self { lines }
    }

    pub fn identity(line_count: u32) -> Self {
        Self {
            lines: (1..=line_count).collect(),
        }
    }

    pub fn push(&mut self, input_line: u32) {
        self.lines.push(input_line);
    }

    /// Input line for an output line.
    pub fn original(&self, output_line: u32) -> Option<u32> {
        let index = output_line.checked_sub(1)?;
        self.lines.get(index as usize).copied()
    }

    /// `(output_line, input_line)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.lines
            .iter()
            .enumerate()
            .map(|(i, input)| (i as u32 + 1, *input))
    }
}

/// A compile-time problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileDiagnostic {
    pub message: String,

    /// Line in the compiler input (1-indexed)
    pub line: Option<u32>,

    /// Column (1-indexed)
    pub column: Option<u32>,

    /// Cell location, filled in by the code generator
    pub location: Option<CellLocation>,
}

impl CompileDiagnostic {
    pub fn new(message: impl Into<String>, line: Option<u32>, column: Option<u32>) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            location: None,
        }
    }
}

/// Result of a compiler run.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    /// Compiled text, absent when compilation failed
    pub code: Option<String>,

    /// Diagnostics in input coordinates
    pub diagnostics: Vec<CompileDiagnostic>,

    /// Output -> input lines, when the output is not line-identical
    pub line_map: Option<LineMap>,
}

/// Turns generated text into runnable text.
pub trait Compiler {
    fn compile(&self, source: &str, file: &str) -> CompileOutput;
}

/// Compiler for cell script.
///
/// Lowers import lines to `require` calls, drops blank and comment-only
/// lines, and checks the result parses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptCompiler;

impl Compiler for ScriptCompiler {
    fn compile(&self, source: &str, file: &str) -> CompileOutput {
        let mut code = String::with_capacity(source.len());
        let mut line_map = LineMap::default();

        for (index, line) in source.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            match parse_import_line(line) {
                Some(import) => code.push_str(&import.lowered()),
                None => code.push_str(line),
            }
            code.push('\n');
            line_map.push(index as u32 + 1);
        }

        match parse_program(&code) {
            Ok(_) => CompileOutput {
                code: Some(code),
                diagnostics: Vec::new(),
                line_map: Some(line_map),
            },
            Err(err) => {
                let line = line_map.original(err.pos.line);
                tracing::debug!("{}: {}", file, err);
                let message = format!("SyntaxError: {}", err.message);
                CompileOutput {
                    code: None,
                    diagnostics: vec![CompileDiagnostic::new(
                        message,
                        line,
                        line.map(|_| err.pos.col),
                    )],
                    line_map: Some(line_map),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowers_imports_and_drops_blank_lines() {
        let source = "import m from \"math\"\n\n// note\nlet x = m.PI\n";
        let out = ScriptCompiler.compile(source, "gen.sc");
        assert_eq!(
            out.code.as_deref(),
            Some("const m = require(\"math\");\nlet x = m.PI\n")
        );
        let line_map = out.line_map.unwrap();
        assert_eq!(line_map.original(1), Some(1));
        assert_eq!(line_map.original(2), Some(4));
        assert_eq!(line_map.original(3), None);
    }

    #[test]
    fn test_syntax_error_reports_input_line() {
        let source = "let a = 1\n\nlet = 2\n";
        let out = ScriptCompiler.compile(source, "gen.sc");
        assert!(out.code.is_none());
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].line, Some(3));
        assert!(out.diagnostics[0].message.starts_with("SyntaxError"));
    }
}
