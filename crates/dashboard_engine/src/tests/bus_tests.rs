use std::{cell::Cell, time::Duration};

use async_trait::async_trait;
use serde_json::json;
use shared::protocol::CommandKind;
use tokio::{sync::broadcast, task::LocalSet};

use super::*;
use crate::{
    engine::DashboardEngine,
    saga::{HandlerError, SagaContext},
};

struct Idle;

#[async_trait(?Send)]
impl CommandHandler for Idle {
    async fn handle(&self, _ctx: &SagaContext, _command: &Command) -> Result<EventKind, HandlerError> {
        Ok(EventKind::Custom {
            name: "test.idle".to_string(),
            payload: json!({}),
        })
    }
}

struct Parked {
    entered: Rc<Cell<bool>>,
}

#[async_trait(?Send)]
impl CommandHandler for Parked {
    async fn handle(&self, ctx: &SagaContext, _command: &Command) -> Result<EventKind, HandlerError> {
        self.entered.set(true);
        ctx.call(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, HandlerError>(())
        })
        .await?;
        Ok(EventKind::Custom {
            name: "test.parked".to_string(),
            payload: json!({}),
        })
    }
}

async fn terminal_for(
    receiver: &mut broadcast::Receiver<DashboardEvent>,
    correlation_id: &CorrelationId,
) -> DashboardEvent {
    loop {
        let event = receiver.recv().await.expect("event");
        if &event.correlation_id == correlation_id && event.is_terminal() {
            return event;
        }
    }
}

fn rejection_code(event: &DashboardEvent) -> ErrorCode {
    match &event.kind {
        EventKind::CommandRejected { reason, .. } => reason.code,
        other => panic!("expected a rejection, got {other:?}"),
    }
}

#[test]
fn registering_a_type_twice_is_an_error() {
    let mut registry = HandlerRegistry::new();
    registry.register("acme.idle", Rc::new(Idle)).expect("first");

    let result = registry.register("acme.idle", Rc::new(Idle));

    assert_eq!(
        result,
        Err(EngineConfigError::DuplicateHandler("acme.idle".to_string()))
    );
    assert_eq!(registry.len(), 1);
}

#[test]
fn custom_handlers_cannot_shadow_builtin_types() {
    let result = DashboardEngine::builder()
        .handler("GDC.DASH/CMD.RENAME", Idle)
        .build();

    assert_eq!(
        result.err(),
        Some(EngineConfigError::DuplicateHandler(
            "GDC.DASH/CMD.RENAME".to_string()
        ))
    );
}

#[tokio::test]
async fn a_command_cancelled_before_it_runs_changes_nothing() {
    LocalSet::new()
        .run_until(async {
            let engine = DashboardEngine::builder().build().expect("engine");
            let mut events = engine.events();
            let title = engine.state().descriptor.title.clone();

            let correlation_id = engine.dispatch(CommandKind::Rename {
                title: "Never applied".to_string(),
            });
            assert!(engine.is_in_flight(&correlation_id));
            assert!(engine.cancel(&correlation_id));

            let terminal = terminal_for(&mut events, &correlation_id).await;
            assert!(matches!(terminal.kind, EventKind::CommandCancelled { .. }));
            assert_eq!(engine.state().descriptor.title, title);
            assert!(!engine.can_undo());
        })
        .await;
}

#[tokio::test]
async fn reusing_an_in_flight_correlation_id_is_rejected() {
    LocalSet::new()
        .run_until(async {
            let entered = Rc::new(Cell::new(false));
            let engine = DashboardEngine::builder()
                .handler(
                    "acme.parked",
                    Parked {
                        entered: entered.clone(),
                    },
                )
                .build()
                .expect("engine");
            let parked = CorrelationId::new("dup");
            let mut events = engine.events();

            engine.dispatch(
                Command::new(CommandKind::Custom {
                    name: "acme.parked".to_string(),
                    payload: json!({}),
                })
                .with_correlation_id(parked.clone()),
            );
            while !entered.get() {
                tokio::task::yield_now().await;
            }
            let duplicate = engine
                .run_and_wait(
                    Command::new(CommandKind::SetFilterBarExpanded { expanded: true })
                        .with_correlation_id(parked.clone()),
                )
                .await;

            assert_eq!(duplicate.correlation_id, parked);
            assert_eq!(rejection_code(&duplicate), ErrorCode::DuplicateCorrelation);
            assert!(engine.is_in_flight(&parked));
            assert!(!engine.state().ui.filter_bar_expanded);

            engine.cancel(&parked);
            let terminal = terminal_for(&mut events, &parked).await;
            assert_eq!(terminal.event_type(), "GDC.DASH/EVT.COMMAND.REJECTED");
            let terminal = terminal_for(&mut events, &parked).await;
            assert!(matches!(terminal.kind, EventKind::CommandCancelled { .. }));
        })
        .await;
}

#[tokio::test]
async fn malformed_wire_commands_are_rejected_without_starting() {
    LocalSet::new()
        .run_until(async {
            let engine = DashboardEngine::builder().build().expect("engine");
            let started = Rc::new(Cell::new(0u32));
            let _subscription = {
                let started = started.clone();
                engine.subscribe_events(move |event| {
                    if matches!(event.kind, EventKind::CommandStarted { .. }) {
                        started.set(started.get() + 1);
                    }
                })
            };

            let bad_payload = engine
                .run_wire(json!({
                    "type": "GDC.DASH/CMD.RENAME",
                    "payload": { "title": 5 },
                    "correlationId": "wire-1",
                }))
                .await;
            let missing_type = engine.run_wire(json!({ "payload": {} })).await;
            let unknown = engine
                .run_wire(json!({ "type": "acme.unknown", "correlationId": "wire-3" }))
                .await;

            assert_eq!(bad_payload.correlation_id, CorrelationId::new("wire-1"));
            assert_eq!(rejection_code(&bad_payload), ErrorCode::InvalidPayload);
            assert_eq!(rejection_code(&missing_type), ErrorCode::InvalidPayload);
            assert!(matches!(
                &missing_type.kind,
                EventKind::CommandRejected { command_type, .. } if command_type == "unknown"
            ));
            assert_eq!(rejection_code(&unknown), ErrorCode::UnknownCommand);
            assert_eq!(started.get(), 0);
            assert!(engine.in_flight().is_empty());
        })
        .await;
}

#[tokio::test]
async fn valid_wire_commands_reach_their_handler() {
    LocalSet::new()
        .run_until(async {
            let engine = DashboardEngine::builder()
                .handler("acme.idle", Idle)
                .build()
                .expect("engine");

            let renamed = engine
                .run_wire(json!({
                    "type": "GDC.DASH/CMD.RENAME",
                    "payload": { "title": "From the wire" },
                }))
                .await;
            let custom = engine
                .run_wire(json!({ "type": "acme.idle", "payload": { "any": "thing" } }))
                .await;

            assert!(matches!(renamed.kind, EventKind::Renamed { ref title } if title == "From the wire"));
            assert_eq!(custom.event_type(), "test.idle");
            assert_eq!(engine.state().descriptor.title, "From the wire");
        })
        .await;
}

#[tokio::test]
async fn a_panicking_event_listener_does_not_strand_the_command() {
    LocalSet::new()
        .run_until(async {
            let engine = DashboardEngine::builder().build().expect("engine");
            let mut events = engine.events();
            let _faulty = engine.subscribe_events(|event| {
                if matches!(event.kind, EventKind::CommandStarted { .. }) {
                    panic!("listener bug");
                }
            });

            let correlation_id = engine.dispatch(CommandKind::Rename {
                title: "Still renamed".to_string(),
            });
            let terminal = terminal_for(&mut events, &correlation_id).await;

            assert!(matches!(terminal.kind, EventKind::Renamed { .. }));
            assert!(!engine.is_in_flight(&correlation_id));
            assert_eq!(engine.state().descriptor.title, "Still renamed");
        })
        .await;
}
