use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::{CompositeEdit, EditError, Timeline, TimelineError};

const DEFAULT_HISTORY_DEPTH: usize = 100;

/// A labelled, successfully applied composite edit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub label: String,
    pub edit: CompositeEdit,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(label: impl Into<String>, edit: CompositeEdit) -> Self {
        Self {
            label: label.into(),
            edit,
            timestamp: Utc::now(),
        }
    }
}

/// Where an edit session records its completed edits.
pub trait HistorySink {
    fn record(&mut self, entry: HistoryEntry);

    /// Reverts the newest entry on `timeline`, returning its label.
    fn undo(&mut self, timeline: &mut Timeline) -> Result<String, EditError>;

    /// Re-applies the newest undone entry on `timeline`, returning its label.
    fn redo(&mut self, timeline: &mut Timeline) -> Result<String, EditError>;

    fn clear(&mut self);
}

/// Bounded undo/redo stacks. Recording drops the redo branch and, past the
/// depth limit, the oldest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditHistory {
    undo_stack: VecDeque<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    max_depth: usize,
}

impl EditHistory {
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_HISTORY_DEPTH)
    }

    pub fn with_depth(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.undo_stack.back().map(|e| e.label.as_str())
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.redo_stack.last().map(|e| e.label.as_str())
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Recorded entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.undo_stack.iter()
    }
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl HistorySink for EditHistory {
    fn record(&mut self, entry: HistoryEntry) {
        debug!(label = %entry.label, steps = entry.edit.len(), "history entry recorded");
        self.redo_stack.clear();
        self.undo_stack.push_back(entry);
        while self.undo_stack.len() > self.max_depth {
            self.undo_stack.pop_front();
        }
    }

    fn undo(&mut self, timeline: &mut Timeline) -> Result<String, EditError> {
        let entry = self
            .undo_stack
            .pop_back()
            .ok_or(TimelineError::HistoryEmpty("nothing to undo"))?;
        entry.edit.undo(timeline)?;
        info!(label = %entry.label, "undo");
        let label = entry.label.clone();
        self.redo_stack.push(entry);
        Ok(label)
    }

    fn redo(&mut self, timeline: &mut Timeline) -> Result<String, EditError> {
        let entry = self
            .redo_stack
            .pop()
            .ok_or(TimelineError::HistoryEmpty("nothing to redo"))?;
        entry.edit.redo(timeline)?;
        info!(label = %entry.label, "redo");
        let label = entry.label.clone();
        self.undo_stack.push_back(entry);
        Ok(label)
    }

    fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
