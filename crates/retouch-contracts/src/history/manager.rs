/// What happened to a snapshot handed to [`HistoryManager::record`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome<S> {
    /// Appended. `discarded` holds the abandoned redo branch and any
    /// snapshots evicted by the size limit, oldest first.
    Recorded { discarded: Vec<S> },
    /// A restoration was in progress; the snapshot is handed back untouched.
    Suppressed(S),
}

/// Linear undo/redo over full-state snapshots.
///
/// Snapshots are owned by value. `undo`/`redo` hand out clones and raise a
/// restoring guard so that the state-change path which installs the restored
/// snapshot does not record it again; [`HistoryManager::settle`] lowers the
/// guard before the next user-driven change.
#[derive(Debug, Clone)]
pub struct HistoryManager<S> {
    entries: Vec<S>,
    position: usize,
    limit: usize,
    restoring: bool,
}

impl<S: Clone> HistoryManager<S> {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            position: 0,
            limit: limit.max(1),
            restoring: false,
        }
    }

    pub fn record(&mut self, snapshot: S) -> RecordOutcome<S> {
        if self.restoring {
            return RecordOutcome::Suppressed(snapshot);
        }
        let abandoned: Vec<S> = if self.entries.is_empty() {
            Vec::new()
        } else {
            self.entries.drain(self.position + 1..).collect()
        };
        self.entries.push(snapshot);
        let overflow = self.entries.len().saturating_sub(self.limit);
        let mut discarded: Vec<S> = self.entries.drain(..overflow).collect();
        discarded.extend(abandoned);
        self.position = self.entries.len() - 1;
        RecordOutcome::Recorded { discarded }
    }

    /// Steps back one snapshot. `None` at the oldest snapshot.
    pub fn undo(&mut self) -> Option<S> {
        if !self.can_undo() {
            return None;
        }
        self.position -= 1;
        self.restoring = true;
        self.entries.get(self.position).cloned()
    }

    /// Steps forward one snapshot. `None` at the newest snapshot.
    pub fn redo(&mut self) -> Option<S> {
        if !self.can_redo() {
            return None;
        }
        self.position += 1;
        self.restoring = true;
        self.entries.get(self.position).cloned()
    }

    /// Ends a restoration started by `undo`/`redo`.
    pub fn settle(&mut self) {
        self.restoring = false;
    }

    pub fn is_restoring(&self) -> bool {
        self.restoring
    }

    pub fn can_undo(&self) -> bool {
        !self.entries.is_empty() && self.position > 0
    }

    pub fn can_redo(&self) -> bool {
        !self.entries.is_empty() && self.position + 1 < self.entries.len()
    }

    pub fn current(&self) -> Option<&S> {
        self.entries.get(self.position)
    }

    /// Index of the current snapshot, `None` while empty.
    pub fn position(&self) -> Option<usize> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.position)
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[S] {
        &self.entries
    }

    /// Empties the history, returning every snapshot it held.
    pub fn clear(&mut self) -> Vec<S> {
        self.position = 0;
        self.restoring = false;
        std::mem::take(&mut self.entries)
    }
}
