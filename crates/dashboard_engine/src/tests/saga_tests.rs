use std::{cell::RefCell, time::Duration};

use chrono::Utc;
use serde_json::json;
use shared::protocol::{CommandKind, EventContext};
use tokio::task::LocalSet;

use super::*;
use crate::engine::DashboardEngine;

fn event(kind: EventKind) -> DashboardEvent {
    DashboardEvent {
        kind,
        correlation_id: CorrelationId::new("c-1"),
        ctx: EventContext {
            workspace: "ws".to_string(),
            dashboard_ref: None,
            emitted_at: Utc::now(),
        },
    }
}

fn custom(name: &str) -> Command {
    CommandKind::Custom {
        name: name.to_string(),
        payload: json!({}),
    }
    .into()
}

fn done() -> EventKind {
    EventKind::Custom {
        name: "test.done".to_string(),
        payload: json!({}),
    }
}

struct Echo;

#[async_trait(?Send)]
impl CommandHandler for Echo {
    async fn handle(&self, _ctx: &SagaContext, _command: &Command) -> Result<EventKind, HandlerError> {
        Ok(done())
    }
}

/// Parks inside `ctx.call` until cancelled.
struct Slow {
    entered: Rc<Cell<bool>>,
}

#[async_trait(?Send)]
impl CommandHandler for Slow {
    async fn handle(&self, ctx: &SagaContext, _command: &Command) -> Result<EventKind, HandlerError> {
        self.entered.set(true);
        ctx.call(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, HandlerError>(())
        })
        .await?;
        Ok(done())
    }
}

struct Delegating {
    child: Command,
    children: Rc<RefCell<Vec<DashboardEvent>>>,
}

#[async_trait(?Send)]
impl CommandHandler for Delegating {
    async fn handle(&self, ctx: &SagaContext, _command: &Command) -> Result<EventKind, HandlerError> {
        let event = ctx.delegate(self.child.clone()).await?;
        self.children.borrow_mut().push(event.clone());
        delegated_outcome(&event)?;
        Ok(done())
    }
}

struct Panicking;

#[async_trait(?Send)]
impl CommandHandler for Panicking {
    async fn handle(&self, _ctx: &SagaContext, _command: &Command) -> Result<EventKind, HandlerError> {
        panic!("boom");
    }
}

#[test]
fn delegated_outcome_maps_terminal_events() {
    assert!(delegated_outcome(&event(EventKind::Renamed {
        title: "x".to_string()
    }))
    .is_ok());
    assert!(matches!(
        delegated_outcome(&event(EventKind::CommandCancelled {
            command_type: "t".to_string()
        })),
        Err(HandlerError::Cancelled)
    ));

    let invalid = delegated_outcome(&event(EventKind::InvalidArgumentsProvided {
        command_type: "t".to_string(),
        message: "bad index".to_string(),
    }))
    .expect_err("invalid arguments");
    assert_eq!(invalid.to_api_error().code, ErrorCode::InvalidArguments);

    let failed = delegated_outcome(&event(EventKind::CommandFailed {
        command_type: "t".to_string(),
        error: ApiError::new(ErrorCode::Conflict, "stale"),
    }))
    .expect_err("failed");
    assert_eq!(
        failed.to_api_error(),
        ApiError::new(ErrorCode::Conflict, "stale")
    );
}

#[test]
fn handler_errors_map_to_api_error_codes() {
    let cases = [
        (HandlerError::invalid("x"), ErrorCode::InvalidArguments),
        (HandlerError::Cancelled, ErrorCode::Cancelled),
        (
            HandlerError::Backend(BackendError::Unauthorized("token".to_string())),
            ErrorCode::Unauthorized,
        ),
        (
            HandlerError::Query(QueryError::Backend(BackendError::NotFound("i".to_string()))),
            ErrorCode::NotFound,
        ),
        (
            HandlerError::Query(QueryError::UnexpectedResult { query: "insight" }),
            ErrorCode::Internal,
        ),
        (HandlerError::Reducer(ReducerError::Reentrant), ErrorCode::Internal),
        (
            HandlerError::UndoBlocked(UndoBlocked {
                command_type: "t".to_string(),
                reason: "r".to_string(),
            }),
            ErrorCode::UndoBlocked,
        ),
    ];

    for (error, code) in cases {
        assert_eq!(error.to_api_error().code, code, "{error}");
    }
}

#[tokio::test]
async fn custom_handler_emits_started_then_its_success_event() {
    LocalSet::new()
        .run_until(async {
            let engine = DashboardEngine::builder()
                .handler("test.echo", Echo)
                .build()
                .expect("engine");
            let seen = Rc::new(RefCell::new(Vec::new()));
            let _subscription = {
                let seen = seen.clone();
                engine.subscribe_events(move |event| {
                    seen.borrow_mut()
                        .push((event.correlation_id.clone(), event.event_type().to_string()))
                })
            };

            let terminal = engine
                .run_and_wait(custom("test.echo").with_correlation_id("echo-1"))
                .await;

            assert_eq!(terminal.event_type(), "test.done");
            assert_eq!(
                *seen.borrow(),
                vec![
                    (
                        CorrelationId::new("echo-1"),
                        "GDC.DASH/EVT.COMMAND.STARTED".to_string()
                    ),
                    (CorrelationId::new("echo-1"), "test.done".to_string()),
                ]
            );
            assert!(!engine.is_in_flight(&CorrelationId::new("echo-1")));
        })
        .await;
}

#[tokio::test]
async fn cancelling_a_suspended_command_ends_it_as_cancelled() {
    LocalSet::new()
        .run_until(async {
            let entered = Rc::new(Cell::new(false));
            let engine = Rc::new(
                DashboardEngine::builder()
                    .handler(
                        "test.slow",
                        Slow {
                            entered: entered.clone(),
                        },
                    )
                    .build()
                    .expect("engine"),
            );
            let task = tokio::task::spawn_local({
                let engine = engine.clone();
                async move {
                    engine
                        .run_and_wait(custom("test.slow").with_correlation_id("slow"))
                        .await
                }
            });
            while !entered.get() {
                tokio::task::yield_now().await;
            }

            assert!(engine.cancel(&CorrelationId::new("slow")));
            let terminal = task.await.expect("join");

            assert!(matches!(
                terminal.kind,
                EventKind::CommandCancelled { ref command_type } if command_type == "test.slow"
            ));
            assert!(engine.in_flight().is_empty());
        })
        .await;
}

#[tokio::test]
async fn delegated_commands_run_under_derived_ids() {
    LocalSet::new()
        .run_until(async {
            let children = Rc::new(RefCell::new(Vec::new()));
            let engine = DashboardEngine::builder()
                .handler(
                    "test.delegate",
                    Delegating {
                        child: CommandKind::Rename {
                            title: "Delegated".to_string(),
                        }
                        .into(),
                        children: children.clone(),
                    },
                )
                .build()
                .expect("engine");

            let terminal = engine
                .run_and_wait(custom("test.delegate").with_correlation_id("parent"))
                .await;

            assert_eq!(terminal.event_type(), "test.done");
            let children = children.borrow();
            assert_eq!(children.len(), 1);
            assert_eq!(children[0].correlation_id, CorrelationId::new("parent.1"));
            assert_eq!(engine.state().descriptor.title, "Delegated");
        })
        .await;
}

#[tokio::test]
async fn a_failed_delegation_fails_the_parent_with_the_child_error() {
    LocalSet::new()
        .run_until(async {
            let engine = DashboardEngine::builder()
                .handler(
                    "test.delegate",
                    Delegating {
                        child: CommandKind::Rename {
                            title: String::new(),
                        }
                        .into(),
                        children: Rc::new(RefCell::new(Vec::new())),
                    },
                )
                .build()
                .expect("engine");

            let terminal = engine.run_and_wait(custom("test.delegate")).await;

            match terminal.kind {
                EventKind::CommandFailed { error, .. } => {
                    assert_eq!(error.code, ErrorCode::InvalidArguments)
                }
                other => panic!("unexpected event {other:?}"),
            }
        })
        .await;
}

#[tokio::test]
async fn a_panicking_handler_fails_with_internal_error() {
    LocalSet::new()
        .run_until(async {
            let engine = DashboardEngine::builder()
                .handler("test.panic", Panicking)
                .build()
                .expect("engine");

            let terminal = engine
                .run_and_wait(custom("test.panic").with_correlation_id("p"))
                .await;

            match terminal.kind {
                EventKind::CommandFailed { error, .. } => {
                    assert_eq!(error.code, ErrorCode::Internal);
                    assert!(error.message.contains("boom"), "{}", error.message);
                }
                other => panic!("unexpected event {other:?}"),
            }
            assert!(!engine.is_in_flight(&CorrelationId::new("p")));
        })
        .await;
}
