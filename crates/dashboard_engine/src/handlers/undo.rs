use async_trait::async_trait;
use shared::protocol::{Command, CommandKind, EventKind};
use tracing::debug;

use super::unexpected;
use crate::{
    saga::{delegated_outcome, CommandHandler, HandlerError, SagaContext},
    undo::{UndoEntry, UndoLedger},
};

pub(super) const COMMANDS: &[&str] = &["GDC.DASH/CMD.UNDO", "GDC.DASH/CMD.REDO"];

/// Replays recorded inverse commands, or the original command for redo, as child commands.
///
/// The ledger entry moves only after every replayed command succeeded. An undo that fails
/// before applying anything can be retried; one that fails part way leaves a barrier.
pub(super) struct UndoHandler;

#[derive(Clone, Copy)]
enum Direction {
    Undo,
    Redo,
}

/// Hands a taken entry back to the ledger, whichever way the replay ends.
struct Replay<'a> {
    ledger: &'a UndoLedger,
    direction: Direction,
    entry: Option<UndoEntry>,
    applied: usize,
}

impl<'a> Replay<'a> {
    fn new(ledger: &'a UndoLedger, direction: Direction, entry: UndoEntry) -> Self {
        Self {
            ledger,
            direction,
            entry: Some(entry),
            applied: 0,
        }
    }

    fn complete(mut self) {
        if let Some(entry) = self.entry.take() {
            match self.direction {
                Direction::Undo => self.ledger.complete_undo(entry),
                Direction::Redo => self.ledger.complete_redo(entry),
            }
        }
    }
}

impl Drop for Replay<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            match self.direction {
                Direction::Undo => self.ledger.abort_undo(&entry, self.applied),
                Direction::Redo => self.ledger.abort_redo(),
            }
        }
    }
}

#[async_trait(?Send)]
impl CommandHandler for UndoHandler {
    async fn handle(&self, ctx: &SagaContext, command: &Command) -> Result<EventKind, HandlerError> {
        match &command.kind {
            CommandKind::Undo {} => {
                let entry = ctx
                    .ledger()
                    .undo()?
                    .ok_or_else(|| HandlerError::invalid("there is nothing to undo"))?;
                let command_type = entry.command.command_type().to_string();
                let inverse = entry.inverse_commands().to_vec();
                debug!(command = %command_type, steps = inverse.len(), "undoing");
                let mut replay = Replay::new(ctx.ledger(), Direction::Undo, entry);
                for step in inverse {
                    let event = ctx.replay(step).await?;
                    delegated_outcome(&event)?;
                    replay.applied += 1;
                }
                replay.complete();
                Ok(EventKind::Undone { command_type })
            }
            CommandKind::Redo {} => {
                let entry = ctx
                    .ledger()
                    .redo()?
                    .ok_or_else(|| HandlerError::invalid("there is nothing to redo"))?;
                let command_type = entry.command.command_type().to_string();
                let step = entry.command.clone();
                debug!(command = %command_type, "redoing");
                let replay = Replay::new(ctx.ledger(), Direction::Redo, entry);
                let event = ctx.replay(step).await?;
                delegated_outcome(&event)?;
                replay.complete();
                Ok(EventKind::Redone { command_type })
            }
            _ => Err(unexpected(command)),
        }
    }
}
