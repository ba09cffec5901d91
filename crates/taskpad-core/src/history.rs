use std::collections::VecDeque;

use tracing::debug;

use crate::task::Task;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Bounded undo/redo over whole-collection snapshots.
#[derive(Debug, Clone)]
pub struct History {
    undo: VecDeque<Vec<Task>>,
    redo: Vec<Vec<Task>>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Capture the state before a command. Clears redo.
    pub fn record(&mut self, before: Vec<Task>) {
        self.undo.push_back(before);
        while self.undo.len() > self.limit {
            self.undo.pop_front();
        }
        self.redo.clear();
        debug!(undo = self.undo.len(), "recorded history entry");
    }

    /// Returns the snapshot to restore; `current` moves onto the redo stack.
    pub fn undo(&mut self, current: Vec<Task>) -> Option<Vec<Task>> {
        let previous = self.undo.pop_back()?;
        self.redo.push(current);
        Some(previous)
    }

    pub fn redo(&mut self, current: Vec<Task>) -> Option<Vec<Task>> {
        let next = self.redo.pop()?;
        self.undo.push_back(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
}
