//! Async completion tracking.
//!
//! Every continuation created while a cell's instrumented body (or any
//! continuation descending from it) is the current context is attributed to
//! that cell. A cell has completed once its body returned and no attributed
//! continuation is left.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::script::{AsyncHook, AsyncId, ResourceKind};

#[derive(Debug, Default)]
pub struct AsyncCompletionTracker {
    /// Top-level context of each cell body.
    cell_contexts: FxHashMap<AsyncId, usize>,
    /// Live continuations and the cell they are attributed to, if any.
    continuations: FxHashMap<AsyncId, Option<usize>>,
    /// Live attributed continuations per cell.
    pending: Vec<usize>,
    returned: Vec<bool>,
}

impl AsyncCompletionTracker {
    pub fn new(cell_count: usize) -> Self {
        Self {
            pending: vec![0; cell_count],
            returned: vec![false; cell_count],
            ..Self::default()
        }
    }

    pub fn cell_count(&self) -> usize {
        self.pending.len()
    }

    /// Register the context a cell body runs in.
    pub fn track_cell(&mut self, context: AsyncId, cell_index: usize) {
        self.ensure_cell(cell_index);
        self.cell_contexts.insert(context, cell_index);
    }

    /// Record that the synchronous body of `cell_index` has returned.
    pub fn mark_returned(&mut self, cell_index: usize) {
        self.ensure_cell(cell_index);
        self.returned[cell_index] = true;
    }

    /// Cell a context is attributed to, walking through continuations to the
    /// cell body that created them.
    pub fn cell_for_context(&self, context: AsyncId) -> Option<usize> {
        if let Some(&cell) = self.cell_contexts.get(&context) {
            return Some(cell);
        }
        self.continuations.get(&context).copied().flatten()
    }

    pub fn has_cell_completed(&self, cell_index: usize) -> bool {
        self.returned.get(cell_index).copied().unwrap_or(false) && self.pending[cell_index] == 0
    }

    /// Number of live continuations attributed to a cell.
    pub fn pending(&self, cell_index: usize) -> usize {
        self.pending.get(cell_index).copied().unwrap_or(0)
    }

    /// Called for every new async resource.
    ///
    /// Cell scopes are registered through [`track_cell`](Self::track_cell)
    /// instead, so a cell started from inside another cell's context is not
    /// counted as that cell's work.
    pub fn on_init(&mut self, id: AsyncId, kind: ResourceKind, trigger: AsyncId) {
        if kind == ResourceKind::CellScope {
            return;
        }
        let cell = self.cell_for_context(trigger);
        if let Some(cell) = cell {
            self.pending[cell] += 1;
        }
        self.continuations.insert(id, cell);
    }

    pub fn on_destroy(&mut self, id: AsyncId) {
        if let Some(Some(cell)) = self.continuations.remove(&id) {
            self.pending[cell] = self.pending[cell].saturating_sub(1);
        }
    }

    fn ensure_cell(&mut self, cell_index: usize) {
        if cell_index >= self.pending.len() {
            self.pending.resize(cell_index + 1, 0);
            self.returned.resize(cell_index + 1, false);
        }
    }
}

/// Shared handle that feeds interpreter hook callbacks into a tracker.
#[derive(Debug, Clone, Default)]
pub struct TrackerHook(pub Rc<RefCell<AsyncCompletionTracker>>);

impl AsyncHook for TrackerHook {
    fn init(&mut self, id: AsyncId, kind: ResourceKind, trigger: AsyncId) {
        self.0.borrow_mut().on_init(id, kind, trigger);
    }

    fn destroy(&mut self, id: AsyncId) {
        self.0.borrow_mut().on_destroy(id);
    }
}
