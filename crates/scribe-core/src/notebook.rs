//! Notebook and cell model consumed by the evaluation engine.
//!
//! Cells are owned by the caller; the engine only ever reads them.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Caller-assigned, stable identifier of a cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Kind of cell. Only code cells take part in evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    #[default]
    Code,
    Markdown,
}

/// Visibility of the names a cell declares.
///
/// `Local` cells are wrapped in their own scope so their declarations do not
/// leak into later cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellScope {
    #[default]
    Global,
    Local,
}

/// A single notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    #[serde(rename = "type", default)]
    pub cell_type: CellType,
    #[serde(default)]
    pub scope: CellScope,
    #[serde(default)]
    pub text: String,
}

impl Cell {
    /// Create a global code cell.
    pub fn code(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: CellId::new(id),
            cell_type: CellType::Code,
            scope: CellScope::Global,
            text: text.into(),
        }
    }

    /// Create a locally scoped code cell.
    pub fn local(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            scope: CellScope::Local,
            ..Self::code(id, text)
        }
    }

    /// Create a markdown cell.
    pub fn markdown(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            cell_type: CellType::Markdown,
            ..Self::code(id, text)
        }
    }

    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }
}

/// An ordered list of cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl Notebook {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    /// Load a notebook from a JSON document on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        serde_json::from_str(&source)
            .map_err(|e| Error::Notebook(format!("{}: {}", path.display(), e)))
    }

    /// Code cells in notebook order.
    pub fn code_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(|c| c.is_code())
    }

    /// Select the code cells an evaluation request covers.
    ///
    /// With `single_cell`, only `cell_id` is evaluated. With `cell_id` alone,
    /// every code cell up to and including it is evaluated.
    pub fn select(&self, cell_id: Option<&CellId>, single_cell: bool) -> Result<Vec<Cell>> {
        let code: Vec<Cell> = self.code_cells().cloned().collect();
        let Some(target) = cell_id else {
            return Ok(code);
        };

        let position = code
            .iter()
            .position(|c| &c.id == target)
            .ok_or_else(|| Error::CellNotFound(target.to_string()))?;

        if single_cell {
            Ok(vec![code[position].clone()])
        } else {
            Ok(code[..=position].to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Notebook {
        Notebook::new(vec![
            Cell::code("a", "let x = 1"),
            Cell::markdown("m", "# heading"),
            Cell::code("b", "display(x)"),
            Cell::code("c", "display(2)"),
        ])
    }

    #[test]
    fn test_select_filters_markdown() {
        let cells = sample().select(None, false).unwrap();
        let ids: Vec<_> = cells.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_select_up_to_cell() {
        let cells = sample().select(Some(&CellId::new("b")), false).unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[1].id.as_str(), "b");
    }

    #[test]
    fn test_select_single_cell() {
        let cells = sample().select(Some(&CellId::new("c")), true).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].id.as_str(), "c");
    }

    #[test]
    fn test_select_unknown_cell() {
        let err = sample().select(Some(&CellId::new("zzz")), true).unwrap_err();
        assert!(matches!(err, Error::CellNotFound(_)));
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{"cells":[{"id":"a","text":"let x = 1"},{"id":"b","type":"markdown","text":"hi"},{"id":"c","scope":"local"}]}"#;
        let notebook: Notebook = serde_json::from_str(json).unwrap();
        assert_eq!(notebook.cells[0].cell_type, CellType::Code);
        assert_eq!(notebook.cells[1].cell_type, CellType::Markdown);
        assert_eq!(notebook.cells[2].scope, CellScope::Local);
        assert!(notebook.cells[2].text.is_empty());
    }
}
