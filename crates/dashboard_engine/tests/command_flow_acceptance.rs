mod support;

use std::{cell::RefCell, rc::Rc, sync::Arc, time::Duration};

use backend_spi::{BackendError, BackendOperation};
use dashboard_engine::DashboardEngine;
use futures::future::join;
use shared::{
    domain::ObjRef,
    error::ErrorCode,
    protocol::{
        add_section_item, remove_section_item_by_widget_ref, Command, CommandKind, EventKind,
    },
};
use support::{backend, failure_code, initialized, insight_widget, SALES};
use tokio::task::LocalSet;

#[tokio::test]
async fn initialize_loads_the_dashboard_and_catalog() {
    LocalSet::new()
        .run_until(async {
            let backend = Arc::new(backend());
            let engine = initialized(backend.clone()).await;

            let state = engine.state();
            assert_eq!(state.descriptor.title, "Sales");
            assert_eq!(state.dashboard_ref(), Some(&ObjRef::identifier(SALES)));
            assert_eq!(state.layout.sections.len(), 2);
            assert_eq!(state.catalog.len(), 2);
            assert!(!state.is_dirty());
            assert!(!engine.can_undo());
            assert_eq!(backend.calls(BackendOperation::GetDashboard), 1);
        })
        .await;
}

#[tokio::test]
async fn adding_an_item_emits_started_then_items_added() {
    LocalSet::new()
        .run_until(async {
            let engine = initialized(Arc::new(backend())).await;
            let events = Rc::new(RefCell::new(Vec::new()));
            let _subscription = {
                let events = events.clone();
                engine.subscribe_events(move |event| events.borrow_mut().push(event.clone()))
            };

            let terminal = engine
                .run_and_wait(
                    add_section_item(0, -1, insight_widget("widget.cost", "insight.cost"))
                        .with_correlation_id("add-1"),
                )
                .await;

            let events = events.borrow();
            assert_eq!(events.len(), 2);
            assert!(matches!(events[0].kind, EventKind::CommandStarted { .. }));
            assert_eq!(events[1], terminal);
            assert!(events.iter().all(|event| event.correlation_id.as_str() == "add-1"));
            match &terminal.kind {
                EventKind::ItemsAdded {
                    section_index,
                    item_index,
                    items,
                    section_created,
                } => {
                    assert_eq!((*section_index, *item_index), (0, 1));
                    assert_eq!(items, &vec![insight_widget("widget.cost", "insight.cost")]);
                    assert!(!section_created);
                }
                other => panic!("unexpected event {other:?}"),
            }
            assert_eq!(
                terminal.ctx.dashboard_ref,
                Some(ObjRef::identifier(SALES))
            );
            assert_eq!(engine.state().layout.sections[0].items.len(), 2);
        })
        .await;
}

#[tokio::test]
async fn first_item_on_an_empty_layout_creates_its_section_and_removing_it_clears_the_layout() {
    LocalSet::new()
        .run_until(async {
            let engine = DashboardEngine::builder()
                .backend(Arc::new(backend()))
                .build()
                .expect("engine");
            let widget = insight_widget("widget.first", "insight.revenue");

            let added = engine
                .run_and_wait(add_section_item(0, 0, widget.clone()))
                .await;

            assert!(added.event_type().ends_with("ITEMS_ADDED"));
            assert!(matches!(
                added.kind,
                EventKind::ItemsAdded {
                    section_created: true,
                    ..
                }
            ));
            let layout = engine.state().layout.clone();
            assert_eq!(layout.sections.len(), 1);
            assert_eq!(layout.sections[0].items, vec![widget]);

            let removed = engine
                .run_and_wait(remove_section_item_by_widget_ref(ObjRef::identifier(
                    "widget.first",
                )))
                .await;

            assert!(matches!(removed.kind, EventKind::ItemRemoved { .. }));
            assert!(engine.state().layout.sections.is_empty());
        })
        .await;
}

#[tokio::test]
async fn unknown_insights_are_invalid_and_change_nothing() {
    LocalSet::new()
        .run_until(async {
            let engine = initialized(Arc::new(backend())).await;
            let revision = engine.revision();

            let terminal = engine
                .run_and_wait(add_section_item(
                    0,
                    -1,
                    insight_widget("widget.ghost", "insight.missing"),
                ))
                .await;

            assert!(matches!(
                terminal.kind,
                EventKind::InvalidArgumentsProvided { .. }
            ));
            assert_eq!(engine.revision(), revision);
        })
        .await;
}

#[tokio::test]
async fn removing_the_last_item_by_ref_removes_its_section() {
    LocalSet::new()
        .run_until(async {
            let engine = initialized(Arc::new(backend())).await;

            let terminal = engine
                .run_and_wait(remove_section_item_by_widget_ref(ObjRef::identifier(
                    "widget.margin",
                )))
                .await;

            match terminal.kind {
                EventKind::ItemRemoved {
                    section_index,
                    item_index,
                    section_removed,
                    ..
                } => {
                    assert_eq!((section_index, item_index), (1, 0));
                    assert!(section_removed);
                }
                other => panic!("unexpected event {other:?}"),
            }
            assert_eq!(engine.state().layout.sections.len(), 1);
        })
        .await;
}

#[tokio::test]
async fn concurrent_commands_share_one_insight_fetch() {
    LocalSet::new()
        .run_until(async {
            let backend = Arc::new(backend().with_latency(Duration::from_millis(10)));
            let engine = initialized(backend.clone()).await;

            let (first, second) = join(
                engine.run_and_wait(add_section_item(
                    0,
                    -1,
                    insight_widget("widget.cost.a", "insight.cost"),
                )),
                engine.run_and_wait(add_section_item(
                    1,
                    -1,
                    insight_widget("widget.cost.b", "insight.cost"),
                )),
            )
            .await;

            assert!(matches!(first.kind, EventKind::ItemsAdded { .. }));
            assert!(matches!(second.kind, EventKind::ItemsAdded { .. }));
            assert_eq!(backend.calls(BackendOperation::GetInsight), 1);
            assert_eq!(engine.query_stats().coalesced, 1);
        })
        .await;
}

#[tokio::test]
async fn save_persists_edits_and_clears_the_dirty_flag() {
    LocalSet::new()
        .run_until(async {
            let backend = Arc::new(backend());
            let engine = initialized(backend.clone()).await;
            engine
                .run_and_wait(CommandKind::Rename {
                    title: "Sales 2026".to_string(),
                })
                .await;
            assert!(engine.state().is_dirty());

            let terminal = engine.run_and_wait(CommandKind::Save {}).await;

            assert!(matches!(
                terminal.kind,
                EventKind::Saved {
                    new_dashboard: false,
                    ..
                }
            ));
            assert!(!engine.state().is_dirty());
            let stored = backend
                .dashboard(&ObjRef::identifier(SALES))
                .expect("stored dashboard");
            assert_eq!(stored.descriptor.title, "Sales 2026");
        })
        .await;
}

#[tokio::test]
async fn backend_failures_surface_with_their_code() {
    LocalSet::new()
        .run_until(async {
            let backend = Arc::new(backend());
            let engine = initialized(backend.clone()).await;
            engine
                .run_and_wait(CommandKind::Rename {
                    title: "Unsaved".to_string(),
                })
                .await;
            backend.fail_next(
                BackendOperation::SaveDashboard,
                BackendError::Unavailable("maintenance".to_string()),
            );

            let terminal = engine.run_and_wait(CommandKind::Save {}).await;

            assert_eq!(failure_code(&terminal), Some(ErrorCode::Unavailable));
            assert!(engine.state().is_dirty());
        })
        .await;
}

#[tokio::test]
async fn save_as_creates_a_copy_and_optionally_switches_to_it() {
    LocalSet::new()
        .run_until(async {
            let backend = Arc::new(backend());
            let engine = initialized(backend.clone()).await;

            let kept = engine
                .run_and_wait(CommandKind::SaveAs {
                    title: None,
                    switch_to_copy: false,
                })
                .await;
            let EventKind::CopySaved { dashboard_ref, .. } = kept.kind else {
                panic!("unexpected event {kept:?}");
            };
            let copy = backend.dashboard(&dashboard_ref).expect("copy");
            assert_eq!(copy.descriptor.title, "Copy of Sales");
            assert_eq!(engine.state().dashboard_ref(), Some(&ObjRef::identifier(SALES)));

            let switched = engine
                .run_and_wait(CommandKind::SaveAs {
                    title: Some("Forecast".to_string()),
                    switch_to_copy: true,
                })
                .await;
            let EventKind::CopySaved { dashboard_ref, .. } = switched.kind else {
                panic!("unexpected event {switched:?}");
            };
            assert_eq!(engine.state().dashboard_ref(), Some(&dashboard_ref));
            assert_eq!(engine.state().descriptor.title, "Forecast");
            assert_eq!(backend.dashboard_count(), 3);
        })
        .await;
}

#[tokio::test]
async fn locked_dashboards_cannot_be_saved() {
    LocalSet::new()
        .run_until(async {
            let mut locked = support::sales_dashboard();
            locked.descriptor.is_locked = true;
            let backend = Arc::new(backend_spi::InMemoryBackend::new().with_dashboard(locked));
            let engine = initialized(backend.clone()).await;

            let terminal = engine.run_and_wait(CommandKind::Save {}).await;

            assert_eq!(failure_code(&terminal), Some(ErrorCode::Forbidden));
            assert_eq!(backend.calls(BackendOperation::SaveDashboard), 0);
        })
        .await;
}

#[tokio::test]
async fn reset_returns_to_the_persisted_dashboard() {
    LocalSet::new()
        .run_until(async {
            let engine = initialized(Arc::new(backend())).await;
            let persisted = engine.state().definition();
            engine
                .run_and_wait(remove_section_item_by_widget_ref(ObjRef::identifier(
                    "widget.revenue",
                )))
                .await;
            engine
                .run_and_wait(CommandKind::Rename {
                    title: "Scratch".to_string(),
                })
                .await;

            let terminal = engine.run_and_wait(CommandKind::Reset {}).await;

            assert!(matches!(terminal.kind, EventKind::Reset { .. }));
            assert_eq!(engine.state().definition(), persisted);
            assert!(!engine.can_undo());
        })
        .await;
}

#[tokio::test]
async fn cancelling_a_command_waiting_on_the_backend_leaves_state_alone() {
    LocalSet::new()
        .run_until(async {
            let backend = Arc::new(backend().with_latency(Duration::from_millis(20)));
            let engine = initialized(backend).await;
            let revision = engine.revision();
            let mut events = engine.events();

            let correlation_id = engine.dispatch(
                Command::from(CommandKind::AddItems {
                    section_index: 0,
                    item_index: -1,
                    items: vec![shared::protocol::ItemDefinition::Item(insight_widget(
                        "widget.cost",
                        "insight.cost",
                    ))],
                })
                .with_correlation_id("slow-add"),
            );
            // Let the command reach its insight lookup before cancelling.
            loop {
                let event = events.recv().await.expect("event");
                if event.correlation_id == correlation_id {
                    break;
                }
            }
            tokio::task::yield_now().await;
            assert!(engine.cancel(&correlation_id));

            let terminal = loop {
                let event = events.recv().await.expect("event");
                if event.correlation_id == correlation_id && event.is_terminal() {
                    break event;
                }
            };
            assert!(matches!(terminal.kind, EventKind::CommandCancelled { .. }));
            assert_eq!(engine.revision(), revision);
            assert!(engine.in_flight().is_empty());
        })
        .await;
}
