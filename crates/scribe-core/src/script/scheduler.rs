//! Asynchronous continuations: timers and microtasks.
//!
//! Every continuation is an async resource with its own [`AsyncId`] and the
//! id of the context that created it. Registered [`AsyncHook`]s observe
//! resource creation and destruction, which is what completion tracking is
//! built on.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use super::value::Value;

/// Identifier of an async execution context.
pub type AsyncId = u64;

/// Context of code that runs outside any async resource (program setup,
/// the runtime itself).
pub const ROOT_CONTEXT: AsyncId = 1;

/// Kind of async resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Timeout,
    Microtask,
    /// Top-level context of an instrumented cell body.
    CellScope,
}

/// Observer of async resource lifetimes.
pub trait AsyncHook {
    /// A resource was created while `trigger` was the current context.
    fn init(&mut self, id: AsyncId, kind: ResourceKind, trigger: AsyncId);

    /// A resource finished (ran to completion or was cancelled).
    fn destroy(&mut self, id: AsyncId);
}

/// Deferred call.
pub struct Task {
    pub callback: Value,
    pub args: Vec<Value>,
}

/// Pending continuations, ordered the way they must run.
#[derive(Default)]
pub struct Scheduler {
    microtasks: VecDeque<AsyncId>,
    timers: BinaryHeap<Reverse<(Instant, u64, AsyncId)>>,
    tasks: FxHashMap<AsyncId, Task>,
    sequence: u64,
}

impl Scheduler {
    pub fn push_microtask(&mut self, id: AsyncId, task: Task) {
        self.tasks.insert(id, task);
        self.microtasks.push_back(id);
    }

    pub fn push_timer(&mut self, id: AsyncId, delay: Duration, task: Task) {
        self.tasks.insert(id, task);
        self.sequence += 1;
        self.timers
            .push(Reverse((Instant::now() + delay, self.sequence, id)));
    }

    /// Drop a pending continuation. Returns false if it already ran.
    pub fn cancel(&mut self, id: AsyncId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    /// Next continuation that may run at `now`: microtasks first, then due
    /// timers in deadline order.
    pub fn pop_ready(&mut self, now: Instant) -> Option<(AsyncId, Task)> {
        while let Some(id) = self.microtasks.pop_front() {
            if let Some(task) = self.tasks.remove(&id) {
                return Some((id, task));
            }
        }
        while let Some(Reverse((due, _, id))) = self.timers.peek().copied() {
            if !self.tasks.contains_key(&id) {
                self.timers.pop();
                continue;
            }
            if due > now {
                return None;
            }
            self.timers.pop();
            if let Some(task) = self.tasks.remove(&id) {
                return Some((id, task));
            }
        }
        None
    }

    pub fn has_ready_microtasks(&self) -> bool {
        self.microtasks.iter().any(|id| self.tasks.contains_key(id))
    }

    /// Deadline of the earliest live timer.
    pub fn next_due(&self) -> Option<Instant> {
        self.timers
            .iter()
            .filter(|Reverse((_, _, id))| self.tasks.contains_key(id))
            .map(|Reverse((due, _, _))| *due)
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}
