use std::{
    any::Any,
    cell::{Cell, RefCell},
    future::Future,
    panic::AssertUnwindSafe,
    rc::Rc,
};

use async_trait::async_trait;
use backend_spi::{BackendError, DashboardBackend};
use futures::FutureExt;
use shared::{
    domain::CorrelationId,
    error::{ApiError, ErrorCode},
    protocol::{Command, DashboardEvent, EventKind},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    correlation::CancelSignal,
    engine::EngineCore,
    query::{QueryError, QueryService},
    store::{DashboardState, Mutation, ReducerError},
    undo::{UndoBlocked, UndoLedger},
};

/// Why a handler stopped before producing its success event.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Reported as `COMMAND.INVALID_ARGUMENTS`.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// Reported as `COMMAND.CANCELLED`.
    #[error("command was cancelled")]
    Cancelled,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Reducer(#[from] ReducerError),
    #[error(transparent)]
    UndoBlocked(#[from] UndoBlocked),
    #[error("delegated {command_type} failed: {error}")]
    Delegated {
        command_type: String,
        error: ApiError,
    },
    #[error("{0}")]
    Failed(ApiError),
}

impl HandlerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    pub fn to_api_error(&self) -> ApiError {
        let code = match self {
            Self::InvalidArguments(_) => ErrorCode::InvalidArguments,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Backend(err) | Self::Query(QueryError::Backend(err)) => err.code(),
            Self::Query(_) | Self::Reducer(_) => ErrorCode::Internal,
            Self::UndoBlocked(_) => ErrorCode::UndoBlocked,
            Self::Delegated { error, .. } | Self::Failed(error) => return error.clone(),
        };
        ApiError::new(code, self.to_string())
    }
}

/// Turns the terminal event of a delegated command into this command's outcome.
pub fn delegated_outcome(event: &DashboardEvent) -> Result<(), HandlerError> {
    let (command_type, error) = match &event.kind {
        kind if kind.is_success() => return Ok(()),
        EventKind::CommandCancelled { .. } => return Err(HandlerError::Cancelled),
        EventKind::CommandFailed {
            command_type,
            error,
        }
        | EventKind::CommandRejected {
            command_type,
            reason: error,
        } => (command_type.clone(), error.clone()),
        EventKind::InvalidArgumentsProvided {
            command_type,
            message,
        } => (
            command_type.clone(),
            ApiError::new(ErrorCode::InvalidArguments, message.clone()),
        ),
        other => (
            other.event_type().to_string(),
            ApiError::internal(format!("unexpected terminal event {}", other.event_type())),
        ),
    };
    Err(HandlerError::Delegated {
        command_type,
        error,
    })
}

/// Handles every command registered under one or more type strings.
///
/// A handler performs its I/O through [`SagaContext::call`] and changes state only through
/// [`SagaContext::commit`], so cancellation is observed at each suspension point and
/// before each commit.
#[async_trait(?Send)]
pub trait CommandHandler {
    async fn handle(&self, ctx: &SagaContext, command: &Command) -> Result<EventKind, HandlerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    /// A user command or a command delegated by one; records undo history.
    Direct,
    /// Undo or redo replay; records nothing.
    Replay,
}

enum PendingUndo {
    Record {
        command: Command,
        inverse: Vec<Command>,
    },
    NotUndoable {
        command: Command,
        reason: String,
    },
}

/// Everything a running command may touch.
pub struct SagaContext {
    core: Rc<EngineCore>,
    correlation_id: CorrelationId,
    command_type: String,
    signal: CancelSignal,
    mode: RunMode,
    delegations: Cell<u32>,
    pending_undo: RefCell<Option<PendingUndo>>,
}

impl SagaContext {
    pub(crate) fn new(
        core: Rc<EngineCore>,
        correlation_id: CorrelationId,
        command_type: String,
        signal: CancelSignal,
        mode: RunMode,
    ) -> Self {
        Self {
            core,
            correlation_id,
            command_type,
            signal,
            mode,
            delegations: Cell::new(0),
            pending_undo: RefCell::new(None),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn command_type(&self) -> &str {
        &self.command_type
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Snapshot of the current state; later commits do not affect it.
    pub fn state(&self) -> DashboardState {
        self.core.store.get_state()
    }

    pub fn backend(&self) -> &dyn DashboardBackend {
        self.core.backend.as_ref()
    }

    pub fn queries(&self) -> &QueryService {
        &self.core.queries
    }

    pub fn ledger(&self) -> &UndoLedger {
        &self.core.ledger
    }

    pub fn checkpoint(&self) -> Result<(), HandlerError> {
        if self.signal.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Awaits `operation` unless the command is cancelled first.
    pub async fn call<T, E>(
        &self,
        operation: impl Future<Output = Result<T, E>>,
    ) -> Result<T, HandlerError>
    where
        HandlerError: From<E>,
    {
        self.checkpoint()?;
        tokio::select! {
            biased;
            _ = self.signal.cancelled() => Err(HandlerError::Cancelled),
            result = operation => result.map_err(HandlerError::from),
        }
    }

    /// Gives other tasks a turn, then checks for cancellation.
    pub async fn yield_now(&self) -> Result<(), HandlerError> {
        tokio::task::yield_now().await;
        self.checkpoint()
    }

    pub fn commit(&self, mutation: Mutation) -> Result<(), HandlerError> {
        self.checkpoint()?;
        self.core.store.apply(mutation)?;
        Ok(())
    }

    /// Runs `command` to completion under a derived correlation id and returns its
    /// terminal event. The child is cancelled together with this command and records undo
    /// history only when this command does.
    pub async fn delegate(&self, command: Command) -> Result<DashboardEvent, HandlerError> {
        self.run_child(command, self.mode).await
    }

    pub(crate) async fn replay(&self, command: Command) -> Result<DashboardEvent, HandlerError> {
        self.run_child(command, RunMode::Replay).await
    }

    async fn run_child(
        &self,
        command: Command,
        mode: RunMode,
    ) -> Result<DashboardEvent, HandlerError> {
        self.checkpoint()?;
        let sequence = self.delegations.get() + 1;
        self.delegations.set(sequence);
        let child_id = self.correlation_id.derive(sequence);
        let signal = self.signal.child();
        self.core
            .registry
            .begin(child_id.clone(), command.command_type(), signal.clone())
            .map_err(|err| {
                HandlerError::Failed(ApiError::new(
                    ErrorCode::DuplicateCorrelation,
                    err.to_string(),
                ))
            })?;
        debug!(
            parent = %self.correlation_id,
            correlation_id = %child_id,
            command = command.command_type(),
            "running child command"
        );
        let event = Box::pin(run_command(self.core.clone(), command, child_id, signal, mode)).await;
        Ok(event)
    }

    /// Records how to undo this command once it succeeds. Ignored during replay.
    pub fn record_undo(&self, command: Command, inverse: Vec<Command>) {
        if self.mode == RunMode::Direct {
            *self.pending_undo.borrow_mut() = Some(PendingUndo::Record { command, inverse });
        }
    }

    /// Records a successful command that blocks undo past it.
    pub fn record_not_undoable(&self, command: Command, reason: impl Into<String>) {
        if self.mode == RunMode::Direct {
            *self.pending_undo.borrow_mut() = Some(PendingUndo::NotUndoable {
                command,
                reason: reason.into(),
            });
        }
    }

    fn flush_undo(&self) {
        match self.pending_undo.borrow_mut().take() {
            Some(PendingUndo::Record { command, inverse }) => {
                self.core.ledger.record(command, inverse)
            }
            Some(PendingUndo::NotUndoable { command, reason }) => {
                self.core.ledger.record_not_undoable(command, reason)
            }
            None => {}
        }
    }
}

/// Drives one command from `COMMAND.STARTED` to exactly one terminal event.
///
/// The correlation id must already be registered; it is released before the terminal
/// event is emitted.
pub(crate) async fn run_command(
    core: Rc<EngineCore>,
    command: Command,
    correlation_id: CorrelationId,
    signal: CancelSignal,
    mode: RunMode,
) -> DashboardEvent {
    let command_type = command.command_type().to_string();
    let Some(handler) = core.handlers.get(&command_type) else {
        core.registry.finish(&correlation_id);
        warn!(correlation_id = %correlation_id, command = %command_type, "no handler registered");
        let reason = ApiError::new(
            ErrorCode::UnknownCommand,
            format!("no handler registered for {command_type}"),
        );
        return core.emit(
            correlation_id,
            EventKind::CommandRejected {
                command_type,
                reason,
            },
        );
    };

    core.emit(
        correlation_id.clone(),
        EventKind::CommandStarted {
            command_type: command_type.clone(),
        },
    );
    info!(correlation_id = %correlation_id, command = %command_type, "command started");

    let ctx = SagaContext::new(
        core.clone(),
        correlation_id.clone(),
        command_type.clone(),
        signal,
        mode,
    );
    let outcome = match ctx.checkpoint() {
        Err(err) => Err(err),
        Ok(()) => AssertUnwindSafe(handler.handle(&ctx, &command))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::Failed(ApiError::internal(panic_message(
                    panic.as_ref(),
                ))))
            }),
    };

    let kind = match outcome {
        Ok(kind) => {
            ctx.flush_undo();
            info!(correlation_id = %correlation_id, event = kind.event_type(), "command completed");
            kind
        }
        Err(HandlerError::Cancelled) => {
            info!(correlation_id = %correlation_id, command = %command_type, "command cancelled");
            EventKind::CommandCancelled { command_type }
        }
        Err(HandlerError::InvalidArguments(message)) => {
            warn!(correlation_id = %correlation_id, command = %command_type, %message, "invalid command arguments");
            EventKind::InvalidArgumentsProvided {
                command_type,
                message,
            }
        }
        Err(err) => {
            let error = err.to_api_error();
            warn!(correlation_id = %correlation_id, command = %command_type, error = %error, "command failed");
            EventKind::CommandFailed {
                command_type,
                error,
            }
        }
    };
    core.registry.finish(&correlation_id);
    core.emit(correlation_id, kind)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
#[path = "tests/saga_tests.rs"]
mod tests;
