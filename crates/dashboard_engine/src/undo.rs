use std::{cell::RefCell, collections::VecDeque};

use shared::protocol::Command;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Inverse {
    /// Commands that restore the prior state when run in order.
    Commands(Vec<Command>),
    NotUndoable { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    id: u64,
    /// The command as it should be replayed by redo.
    pub command: Command,
    pub inverse: Inverse,
}

impl UndoEntry {
    pub fn inverse_commands(&self) -> &[Command] {
        match &self.inverse {
            Inverse::Commands(commands) => commands,
            Inverse::NotUndoable { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot undo {command_type}: {reason}")]
pub struct UndoBlocked {
    pub command_type: String,
    pub reason: String,
}

#[derive(Default)]
struct Stacks {
    undo: VecDeque<UndoEntry>,
    redo: Vec<UndoEntry>,
    next_id: u64,
    /// Entry currently being replayed by an undo or redo.
    replaying: Option<u64>,
}

impl Stacks {
    fn busy(&self, command: &Command) -> Option<UndoBlocked> {
        self.replaying.map(|_| UndoBlocked {
            command_type: command.command_type().to_string(),
            reason: "another undo or redo is still running".to_string(),
        })
    }

    fn push_undo(&mut self, entry: UndoEntry, depth: usize) {
        self.undo.push_back(entry);
        while self.undo.len() > depth {
            self.undo.pop_front();
        }
    }
}

/// Bounded undo/redo history.
///
/// `undo` and `redo` hand out a copy of the entry and leave it in place. It moves to the
/// opposite stack only once the caller reports the replay succeeded; a failed replay
/// either leaves it where it was or, when some of its steps were applied, turns it into a
/// barrier.
pub struct UndoLedger {
    depth: usize,
    stacks: RefCell<Stacks>,
}

impl UndoLedger {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            stacks: RefCell::new(Stacks::default()),
        }
    }

    pub fn record(&self, command: Command, inverse: Vec<Command>) {
        self.push(
            strip_correlation(command),
            Inverse::Commands(inverse.into_iter().map(strip_correlation).collect()),
        );
    }

    pub fn record_not_undoable(&self, command: Command, reason: impl Into<String>) {
        self.push(
            strip_correlation(command),
            Inverse::NotUndoable {
                reason: reason.into(),
            },
        );
    }

    fn push(&self, command: Command, inverse: Inverse) {
        if self.depth == 0 {
            return;
        }
        debug!(command = command.command_type(), "undo entry recorded");
        let mut stacks = self.stacks.borrow_mut();
        stacks.next_id += 1;
        let entry = UndoEntry {
            id: stacks.next_id,
            command,
            inverse,
        };
        stacks.redo.clear();
        stacks.push_undo(entry, self.depth);
    }

    /// Returns the most recent entry for replay, leaving it on the stack. A not-undoable
    /// entry blocks, and so does a replay that is still running.
    pub fn undo(&self) -> Result<Option<UndoEntry>, UndoBlocked> {
        let mut stacks = self.stacks.borrow_mut();
        let Some(entry) = stacks.undo.back() else {
            return Ok(None);
        };
        if let Some(blocked) = stacks.busy(&entry.command) {
            return Err(blocked);
        }
        if let Inverse::NotUndoable { reason } = &entry.inverse {
            return Err(UndoBlocked {
                command_type: entry.command.command_type().to_string(),
                reason: reason.clone(),
            });
        }
        let entry = entry.clone();
        stacks.replaying = Some(entry.id);
        Ok(Some(entry))
    }

    /// Moves an entry whose inverse commands all succeeded onto the redo stack.
    pub fn complete_undo(&self, entry: UndoEntry) {
        let mut stacks = self.stacks.borrow_mut();
        stacks.replaying = None;
        stacks.undo.retain(|held| held.id != entry.id);
        stacks.redo.push(entry);
    }

    /// Ends a failed undo. With nothing applied the entry stays undoable; otherwise it
    /// becomes a barrier, since the dashboard is now between the two states.
    pub fn abort_undo(&self, entry: &UndoEntry, applied: usize) {
        let mut stacks = self.stacks.borrow_mut();
        stacks.replaying = None;
        if applied == 0 {
            return;
        }
        let steps = entry.inverse_commands().len();
        if let Some(held) = stacks.undo.iter_mut().find(|held| held.id == entry.id) {
            warn!(
                command = held.command.command_type(),
                applied, steps, "undo failed part way"
            );
            held.inverse = Inverse::NotUndoable {
                reason: format!("an earlier undo stopped after {applied} of {steps} steps"),
            };
        }
    }

    /// Returns the most recently undone entry for replay, leaving it on the redo stack.
    pub fn redo(&self) -> Result<Option<UndoEntry>, UndoBlocked> {
        let mut stacks = self.stacks.borrow_mut();
        let Some(entry) = stacks.redo.last() else {
            return Ok(None);
        };
        if let Some(blocked) = stacks.busy(&entry.command) {
            return Err(blocked);
        }
        let entry = entry.clone();
        stacks.replaying = Some(entry.id);
        Ok(Some(entry))
    }

    /// Returns a replayed entry to the undo stack without clearing the remaining redo entries.
    pub fn complete_redo(&self, entry: UndoEntry) {
        let mut stacks = self.stacks.borrow_mut();
        stacks.replaying = None;
        stacks.redo.retain(|held| held.id != entry.id);
        stacks.push_undo(entry, self.depth);
    }

    /// Ends a failed redo; the entry stays on the redo stack.
    pub fn abort_redo(&self) {
        self.stacks.borrow_mut().replaying = None;
    }

    pub fn clear(&self) {
        let mut stacks = self.stacks.borrow_mut();
        stacks.undo.clear();
        stacks.redo.clear();
    }

    pub fn can_undo(&self) -> bool {
        matches!(
            self.stacks.borrow().undo.back(),
            Some(UndoEntry {
                inverse: Inverse::Commands(_),
                ..
            })
        )
    }

    pub fn can_redo(&self) -> bool {
        !self.stacks.borrow().redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.stacks.borrow().undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.stacks.borrow().redo.len()
    }
}

fn strip_correlation(mut command: Command) -> Command {
    command.correlation_id = None;
    command
}

#[cfg(test)]
#[path = "tests/undo_tests.rs"]
mod tests;
