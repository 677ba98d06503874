//! Line mapping from generated code back to cell coordinates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compile::LineMap;
use crate::notebook::CellId;

/// A location inside a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellLocation {
    /// Cell the location belongs to
    pub cell_id: CellId,

    /// Line number relative to the cell text (1-indexed)
    pub line: u32,

    /// Column number (1-indexed)
    pub column: u32,
}

/// Origin of one generated line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedLine {
    /// Position of the cell in the evaluated cell list
    pub cell_index: usize,

    /// Cell the line came from
    pub cell_id: CellId,

    /// Line number in the cell text (1-indexed)
    pub line: u32,
}

/// Generated line -> cell line table.
///
/// Scaffolding lines have no entry and resolve to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    lines: BTreeMap<u32, MappedLine>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a single generated line.
    pub fn insert(&mut self, generated_line: u32, origin: MappedLine) {
        self.lines.insert(generated_line, origin);
    }

    /// Map `count` consecutive generated lines starting at `generated_start`
    /// to consecutive lines of a cell starting at `first_line`.
    pub fn insert_block(
        &mut self,
        generated_start: u32,
        cell_index: usize,
        cell_id: &CellId,
        first_line: u32,
        count: u32,
    ) {
        for offset in 0..count {
            self.insert(
                generated_start + offset,
                MappedLine {
                    cell_index,
                    cell_id: cell_id.clone(),
                    line: first_line + offset,
                },
            );
        }
    }

    pub fn lookup(&self, generated_line: u32) -> Option<&MappedLine> {
        self.lines.get(&generated_line)
    }

    /// Resolve a generated location to a cell location.
    pub fn resolve(&self, generated_line: u32, column: u32) -> Option<CellLocation> {
        self.lookup(generated_line).map(|origin| CellLocation {
            cell_id: origin.cell_id.clone(),
            line: origin.line,
            column,
        })
    }

    /// Express this mapping in the coordinates of a downstream compilation
    /// step whose output lines come from our lines via `downstream`.
    pub fn compose(&self, downstream: &LineMap) -> Mapping {
        let mut composed = Mapping::new();
        for (output_line, input_line) in downstream.iter() {
            if let Some(origin) = self.lookup(input_line) {
                composed.insert(output_line, origin.clone());
            }
        }
        composed
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &MappedLine)> {
        self.lines.iter().map(|(line, origin)| (*line, origin))
    }

    /// Generated lines belonging to a cell, ascending.
    pub fn lines_for_cell(&self, cell_index: usize) -> Vec<u32> {
        self.iter()
            .filter(|(_, origin)| origin.cell_index == cell_index)
            .map(|(line, _)| line)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_maps_consecutive_lines() {
        let mut mapping = Mapping::new();
        mapping.insert_block(5, 0, &CellId::from("a"), 1, 3);
        assert_eq!(mapping.resolve(7, 4).unwrap().line, 3);
        assert!(mapping.resolve(4, 1).is_none());
        assert!(mapping.resolve(8, 1).is_none());
    }

    #[test]
    fn test_compose_skips_dropped_and_scaffolding_lines() {
        let mut mapping = Mapping::new();
        mapping.insert_block(2, 0, &CellId::from("a"), 1, 2);
        mapping.insert_block(5, 1, &CellId::from("b"), 1, 1);
        // Output keeps input lines 1, 3 and 5; line 2 and 4 were dropped.
        let downstream = LineMap::from_lines(vec![1, 3, 5]);
        let composed = mapping.compose(&downstream);
        assert!(composed.lookup(1).is_none());
        assert_eq!(composed.lookup(2).unwrap().line, 2);
        assert_eq!(composed.lookup(3).unwrap().cell_id.as_str(), "b");
        assert_eq!(composed.len(), 2);
    }
}
