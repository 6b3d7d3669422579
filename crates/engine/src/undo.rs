use iocat_core::EntryId;

/// Linear, session-scoped undo history.
///
/// Holds the ids of this session's own edits. Steps before the cursor can be
/// undone, steps at or after it can be redone. Recording a new step drops
/// everything after the cursor.
pub struct UndoStack {
    steps: Vec<EntryId>,
    cursor: usize,
    max_depth: usize,
}

impl UndoStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            steps: Vec::new(),
            cursor: 0,
            max_depth: max_depth.max(1),
        }
    }

    pub fn push(&mut self, entry_id: EntryId) {
        self.steps.truncate(self.cursor);
        self.steps.push(entry_id);
        // Enforce depth limit by dropping oldest step
        if self.steps.len() > self.max_depth {
            let excess = self.steps.len() - self.max_depth;
            self.steps.drain(..excess);
        }
        self.cursor = self.steps.len();
    }

    /// The step the next undo would revert.
    pub fn undo_target(&self) -> Option<EntryId> {
        self.cursor.checked_sub(1).map(|i| self.steps[i])
    }

    pub fn redo_target(&self) -> Option<EntryId> {
        self.steps.get(self.cursor).copied()
    }

    pub fn mark_undone(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn mark_redone(&mut self) {
        if self.cursor < self.steps.len() {
            self.cursor += 1;
        }
    }

    /// Drop the undo target without reverting it (another writer got there later).
    pub fn skip_undo(&mut self) {
        if let Some(i) = self.cursor.checked_sub(1) {
            self.steps.remove(i);
            self.cursor = i;
        }
    }

    pub fn undo_depth(&self) -> usize {
        self.cursor
    }

    pub fn redo_depth(&self) -> usize {
        self.steps.len() - self.cursor
    }
}
