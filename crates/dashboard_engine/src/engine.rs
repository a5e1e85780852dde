use std::{num::NonZeroUsize, rc::Rc, sync::Arc};

use backend_spi::{DashboardBackend, MissingBackend};
use chrono::Utc;
use serde_json::Value;
use shared::{
    domain::CorrelationId,
    error::ApiError,
    protocol::{Command, DashboardEvent, EventContext, EventKind},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{error, info};

use crate::{
    bus::{self, HandlerRegistry},
    config::{EngineConfig, EngineConfigError},
    correlation::CorrelationRegistry,
    events::{EventBus, Subscription},
    handlers,
    query::{Query, QueryError, QueryResult, QueryService, QueryStats},
    saga::CommandHandler,
    store::{DashboardState, DashboardStore},
    undo::UndoLedger,
};

/// Shared by the engine facade and every running command.
pub(crate) struct EngineCore {
    pub(crate) config: EngineConfig,
    pub(crate) backend: Arc<dyn DashboardBackend>,
    pub(crate) store: Rc<DashboardStore>,
    pub(crate) registry: CorrelationRegistry,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) events: EventBus,
    pub(crate) queries: QueryService,
    pub(crate) ledger: UndoLedger,
}

impl EngineCore {
    pub(crate) fn emit(&self, correlation_id: CorrelationId, kind: EventKind) -> DashboardEvent {
        let event = self.event(correlation_id, kind);
        self.events.emit(event.clone());
        event
    }

    fn event(&self, correlation_id: CorrelationId, kind: EventKind) -> DashboardEvent {
        DashboardEvent {
            kind,
            correlation_id,
            ctx: EventContext {
                workspace: self.config.workspace.clone(),
                dashboard_ref: self.store.get_state().dashboard_ref().cloned(),
                emitted_at: Utc::now(),
            },
        }
    }
}

pub struct EngineBuilder {
    config: EngineConfig,
    backend: Option<Arc<dyn DashboardBackend>>,
    initial_state: Option<DashboardState>,
    handlers: Vec<(String, Rc<dyn CommandHandler>)>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn DashboardBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn initial_state(mut self, state: DashboardState) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Adds a handler for a command type outside the built-in set.
    pub fn handler(
        mut self,
        command_type: impl Into<String>,
        handler: impl CommandHandler + 'static,
    ) -> Self {
        self.handlers.push((command_type.into(), Rc::new(handler)));
        self
    }

    pub fn build(self) -> Result<DashboardEngine, EngineConfigError> {
        self.config.validate()?;
        let capacity = NonZeroUsize::new(self.config.query_cache_capacity)
            .ok_or(EngineConfigError::ZeroQueryCacheCapacity)?;

        let mut registry = HandlerRegistry::new();
        handlers::register_defaults(&mut registry)?;
        for (command_type, handler) in self.handlers {
            registry.register(command_type, handler)?;
        }

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MissingBackend) as Arc<dyn DashboardBackend>);
        let store = Rc::new(DashboardStore::new(self.initial_state.unwrap_or_default()));
        let queries = QueryService::new(backend.clone(), store.clone(), capacity);
        info!(
            workspace = %self.config.workspace,
            handlers = registry.len(),
            "dashboard engine ready"
        );

        Ok(DashboardEngine {
            core: Rc::new(EngineCore {
                events: EventBus::new(self.config.event_channel_capacity),
                ledger: UndoLedger::new(self.config.undo_depth),
                config: self.config,
                backend,
                store,
                registry: CorrelationRegistry::new(),
                handlers: registry,
                queries,
            }),
        })
    }
}

/// Command/event engine for a single dashboard.
///
/// Commands run as tasks on the current tokio `LocalSet`; `dispatch` and the other
/// command entry points must be called from within one.
pub struct DashboardEngine {
    core: Rc<EngineCore>,
}

impl DashboardEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            config: EngineConfig::default(),
            backend: None,
            initial_state: None,
            handlers: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    /// Schedules `command` and returns its correlation id without waiting.
    pub fn dispatch(&self, command: impl Into<Command>) -> CorrelationId {
        let (correlation_id, _task) = bus::dispatch(&self.core, command.into());
        correlation_id
    }

    /// Runs `command` and resolves with its terminal event.
    pub async fn run_and_wait(&self, command: impl Into<Command>) -> DashboardEvent {
        let command = command.into();
        let command_type = command.command_type().to_string();
        let (correlation_id, task) = bus::dispatch(&self.core, command);
        self.join(correlation_id, command_type, task).await
    }

    pub fn dispatch_wire(&self, value: Value) -> CorrelationId {
        let (correlation_id, _task) = bus::dispatch_wire(&self.core, value);
        correlation_id
    }

    pub async fn run_wire(&self, value: Value) -> DashboardEvent {
        let command_type = Command::peek_type(&value).unwrap_or("unknown").to_string();
        let (correlation_id, task) = bus::dispatch_wire(&self.core, value);
        self.join(correlation_id, command_type, task).await
    }

    async fn join(
        &self,
        correlation_id: CorrelationId,
        command_type: String,
        task: JoinHandle<DashboardEvent>,
    ) -> DashboardEvent {
        match task.await {
            Ok(event) => event,
            Err(err) => {
                error!(correlation_id = %correlation_id, error = %err, "command task aborted");
                let kind = EventKind::CommandFailed {
                    command_type,
                    error: ApiError::internal(format!("command task aborted: {err}")),
                };
                // A released id means the task got as far as its terminal event.
                if self.core.registry.finish(&correlation_id) {
                    self.core.emit(correlation_id, kind)
                } else {
                    self.core.event(correlation_id, kind)
                }
            }
        }
    }

    /// Requests cooperative cancellation; false when no such command is in flight.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        self.core.registry.cancel(correlation_id)
    }

    pub fn is_in_flight(&self, correlation_id: &CorrelationId) -> bool {
        self.core.registry.is_in_flight(correlation_id)
    }

    pub fn in_flight(&self) -> Vec<CorrelationId> {
        self.core.registry.in_flight()
    }

    pub fn state(&self) -> DashboardState {
        self.core.store.get_state()
    }

    pub fn revision(&self) -> u64 {
        self.core.store.revision()
    }

    pub fn subscribe_state(
        &self,
        listener: impl Fn(&DashboardState) + 'static,
    ) -> Subscription {
        self.core.store.subscribe(listener)
    }

    pub fn subscribe_events(
        &self,
        listener: impl Fn(&DashboardEvent) + 'static,
    ) -> Subscription {
        self.core.events.subscribe(listener)
    }

    pub fn events(&self) -> broadcast::Receiver<DashboardEvent> {
        self.core.events.receiver()
    }

    pub async fn run_query(&self, query: Query) -> Result<QueryResult, QueryError> {
        self.core.queries.run_query(query).await
    }

    pub fn query_stats(&self) -> QueryStats {
        self.core.queries.stats()
    }

    pub fn can_undo(&self) -> bool {
        self.core.ledger.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.core.ledger.can_redo()
    }
}
