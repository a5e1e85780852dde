use std::{collections::HashMap, rc::Rc};

use serde_json::Value;
use shared::{
    domain::CorrelationId,
    error::{ApiError, ErrorCode},
    protocol::{Command, DashboardEvent, EventKind},
};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::{
    config::EngineConfigError,
    correlation::CancelSignal,
    engine::EngineCore,
    saga::{run_command, CommandHandler, RunMode},
};

/// Command type string to handler. One handler may serve several types.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Rc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        command_type: impl Into<String>,
        handler: Rc<dyn CommandHandler>,
    ) -> Result<(), EngineConfigError> {
        let command_type = command_type.into();
        if self.handlers.contains_key(&command_type) {
            return Err(EngineConfigError::DuplicateHandler(command_type));
        }
        self.handlers.insert(command_type, handler);
        Ok(())
    }

    pub fn get(&self, command_type: &str) -> Option<Rc<dyn CommandHandler>> {
        self.handlers.get(command_type).cloned()
    }

    pub fn contains(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Accepts `command` and schedules it on the current `LocalSet`.
///
/// The correlation id is registered before this returns, so the command can be cancelled
/// before its task first runs. A caller-supplied id that is still in flight yields a single
/// `COMMAND.REJECTED` and leaves the running command alone.
pub(crate) fn dispatch(
    core: &Rc<EngineCore>,
    command: Command,
) -> (CorrelationId, JoinHandle<DashboardEvent>) {
    let correlation_id = command
        .correlation_id
        .clone()
        .unwrap_or_else(|| core.registry.issue());
    let command_type = command.command_type().to_string();
    let signal = CancelSignal::new();

    let task = match core
        .registry
        .begin(correlation_id.clone(), &command_type, signal.clone())
    {
        Ok(()) => tokio::task::spawn_local(run_command(
            core.clone(),
            command,
            correlation_id.clone(),
            signal,
            RunMode::Direct,
        )),
        Err(err) => {
            warn!(correlation_id = %correlation_id, command = %command_type, "duplicate correlation id");
            let reason = ApiError::new(ErrorCode::DuplicateCorrelation, err.to_string());
            reject(core, correlation_id.clone(), command_type, reason)
        }
    };
    (correlation_id, task)
}

/// Parses a wire command and dispatches it; unparseable input is rejected under the
/// correlation id it carried, or a fresh one.
pub(crate) fn dispatch_wire(
    core: &Rc<EngineCore>,
    value: Value,
) -> (CorrelationId, JoinHandle<DashboardEvent>) {
    let correlation_id = Command::peek_correlation_id(&value);
    let command_type = Command::peek_type(&value).unwrap_or("unknown").to_string();
    match Command::from_wire(value) {
        Ok(command) => dispatch(core, command),
        Err(err) => {
            let correlation_id = correlation_id.unwrap_or_else(|| core.registry.issue());
            warn!(correlation_id = %correlation_id, command = %command_type, error = %err, "rejected wire command");
            let task = reject(core, correlation_id.clone(), command_type, ApiError::from(&err));
            (correlation_id, task)
        }
    }
}

fn reject(
    core: &Rc<EngineCore>,
    correlation_id: CorrelationId,
    command_type: String,
    reason: ApiError,
) -> JoinHandle<DashboardEvent> {
    let core = core.clone();
    tokio::task::spawn_local(async move {
        core.emit(
            correlation_id,
            EventKind::CommandRejected {
                command_type,
                reason,
            },
        )
    })
}

#[cfg(test)]
#[path = "tests/bus_tests.rs"]
mod tests;
