//! Notebook cells -> one instrumented program.

use uuid::Uuid;

use super::imports::{escape_str, parse_import_line};
use super::mapping::{MappedLine, Mapping};
use crate::compile::{CompileDiagnostic, Compiler};
use crate::notebook::{Cell, CellId, CellScope};
use crate::script::lexer::{Token, tokenize};

/// Name of the function the generated program defines.
pub const ENTRY_FUNCTION: &str = "__scribe_entry";

/// Parameters of the entry function, in order.
pub const ENTRY_PARAMS: [&str; 7] = [
    "require",
    "__filename",
    "__dirname",
    "display",
    "beginCell",
    "endOfCells",
    "captureLocals",
];

/// Generator output before compilation.
#[derive(Debug, Clone)]
pub struct GeneratedSource {
    pub text: String,
    pub mapping: Mapping,
    /// Code cells, in the order their indices refer to
    pub cells: Vec<Cell>,
}

/// A compiled notebook ready to run.
#[derive(Debug, Clone)]
pub struct GeneratedUnit {
    /// Compiled program; `None` when compilation failed
    pub code: Option<String>,

    /// Compiled line -> cell line mapping
    pub source_map: Mapping,

    pub diagnostics: Vec<CompileDiagnostic>,

    /// Code cells, indexed like the `beginCell` calls
    pub cells: Vec<Cell>,

    /// File name the program runs under
    pub file: String,
}

impl GeneratedUnit {
    pub fn is_compiled(&self) -> bool {
        self.code.is_some()
    }

    pub fn cell_index(&self, id: &CellId) -> Option<usize> {
        self.cells.iter().position(|cell| &cell.id == id)
    }
}

#[derive(Default)]
struct Emitter {
    text: String,
    lines: u32,
}

impl Emitter {
    /// Append a line, returning its 1-indexed number.
    fn line(&mut self, text: &str) -> u32 {
        self.text.push_str(text);
        self.text.push('\n');
        self.lines += 1;
        self.lines
    }
}

/// Builds the instrumented program for a list of cells.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    file: String,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGenerator {
    /// Generator with a unique file name.
    pub fn new() -> Self {
        Self::with_file(format!("scribe-{}.sc", Uuid::new_v4().simple()))
    }

    pub fn with_file(file: impl Into<String>) -> Self {
        Self { file: file.into() }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Generate the program text and its mapping. Markdown cells are skipped.
    pub fn generate_source(&self, cells: &[Cell]) -> GeneratedSource {
        let cells: Vec<Cell> = cells.iter().filter(|c| c.is_code()).cloned().collect();
        let mut out = Emitter::default();
        let mut mapping = Mapping::new();

        out.line(&format!("fn {}({}) {{", ENTRY_FUNCTION, ENTRY_PARAMS.join(", ")));

        for (index, cell) in cells.iter().enumerate() {
            for (n, line) in cell.text.lines().enumerate() {
                if parse_import_line(line).is_some() {
                    let generated = out.line(line.trim());
                    mapping.insert(generated, origin(index, &cell.id, n));
                }
            }
        }

        for (index, cell) in cells.iter().enumerate() {
            let id = escape_str(cell.id.as_str());
            let local = cell.scope == CellScope::Local;
            out.line(&format!("beginCell({}, \"{}\", fn() {{", index, id));
            if local {
                out.line("(fn() {");
            }
            for (n, line) in cell.text.lines().enumerate() {
                if parse_import_line(line).is_some() {
                    out.line("");
                } else {
                    let generated = out.line(line);
                    mapping.insert(generated, origin(index, &cell.id, n));
                }
            }
            if local {
                out.line("})();");
            } else {
                let fields: Vec<String> = top_level_names(&cell.text)
                    .iter()
                    .map(|name| format!("{}: {}", name, name))
                    .collect();
                out.line(&format!(
                    "captureLocals({}, \"{}\", fn() {{ return {{ {} }}; }});",
                    index,
                    id,
                    fields.join(", ")
                ));
            }
        }

        out.line("endOfCells();");
        for _ in &cells {
            out.line("});");
        }
        out.line("}");

        GeneratedSource {
            text: out.text,
            mapping,
            cells,
        }
    }

    /// Generate and compile. Compiler diagnostics come back with cell
    /// locations where their line maps to a cell.
    pub fn generate(&self, cells: &[Cell], compiler: &dyn Compiler) -> GeneratedUnit {
        let source = self.generate_source(cells);
        let output = compiler.compile(&source.text, &self.file);

        let source_map = match &output.line_map {
            Some(line_map) => source.mapping.compose(line_map),
            None => source.mapping.clone(),
        };
        let diagnostics = output
            .diagnostics
            .into_iter()
            .map(|mut diagnostic| {
                diagnostic.location = diagnostic
                    .line
                    .and_then(|line| source.mapping.resolve(line, diagnostic.column.unwrap_or(1)));
                diagnostic
            })
            .collect();

        GeneratedUnit {
            code: output.code,
            source_map,
            diagnostics,
            cells: source.cells,
            file: self.file.clone(),
        }
    }
}

fn origin(cell_index: usize, cell_id: &CellId, zero_based_line: usize) -> MappedLine {
    MappedLine {
        cell_index,
        cell_id: cell_id.clone(),
        line: zero_based_line as u32 + 1,
    }
}

/// Names declared by top-level `let`, `const` and `fn` statements, in
/// declaration order without duplicates.
pub fn top_level_names(text: &str) -> Vec<String> {
    let Ok(tokens) = tokenize(text) else {
        return Vec::new();
    };
    let mut names: Vec<String> = Vec::new();
    let mut depth = 0usize;
    let mut tokens = tokens.into_iter().map(|s| s.token).peekable();
    while let Some(token) = tokens.next() {
        match token {
            Token::LBrace | Token::LParen | Token::LBracket => depth += 1,
            Token::RBrace | Token::RParen | Token::RBracket => depth = depth.saturating_sub(1),
            Token::Let | Token::Const | Token::Fn if depth == 0 => {
                if let Some(Token::Ident(name)) = tokens.peek() {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
            }
            _ => {}
        }
    }
    names
}
