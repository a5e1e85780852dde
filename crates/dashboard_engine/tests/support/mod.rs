#![allow(dead_code)]

use std::sync::Arc;

use backend_spi::InMemoryBackend;
use dashboard_engine::DashboardEngine;
use shared::{
    domain::{
        CatalogAttribute, DashboardDefinition, DashboardDescriptor, Insight, InsightWidget, Item,
        Layout, ObjRef, Section, Widget,
    },
    protocol::{initialize, DashboardEvent, EventKind},
};

pub const SALES: &str = "dashboard.sales";

pub fn insight_widget(widget: &str, insight: &str) -> Item {
    Item::new(Widget::Insight(InsightWidget {
        widget_ref: ObjRef::identifier(widget),
        title: widget.to_string(),
        description: String::new(),
        insight: ObjRef::identifier(insight),
        ignore_filters: Vec::new(),
        date_dataset: None,
        properties: None,
    }))
}

pub fn sales_dashboard() -> DashboardDefinition {
    DashboardDefinition {
        descriptor: DashboardDescriptor {
            dashboard_ref: Some(ObjRef::identifier(SALES)),
            title: "Sales".to_string(),
            ..DashboardDescriptor::default()
        },
        layout: Layout {
            sections: vec![
                Section {
                    items: vec![insight_widget("widget.revenue", "insight.revenue")],
                    ..Section::default()
                },
                Section {
                    items: vec![insight_widget("widget.margin", "insight.margin")],
                    ..Section::default()
                },
            ],
        },
        ..DashboardDefinition::default()
    }
}

fn insight(id: &str, title: &str) -> Insight {
    Insight {
        insight_ref: ObjRef::identifier(id),
        title: title.to_string(),
        visualization_url: "local:bar".to_string(),
    }
}

fn attribute(name: &str) -> CatalogAttribute {
    CatalogAttribute {
        attribute: ObjRef::identifier(format!("attr.{name}")),
        title: name.to_string(),
        default_display_form: ObjRef::identifier(format!("label.{name}")),
        display_forms: Vec::new(),
    }
}

pub fn backend() -> InMemoryBackend {
    InMemoryBackend::new()
        .with_dashboard(sales_dashboard())
        .with_insight(insight("insight.revenue", "Revenue"))
        .with_insight(insight("insight.margin", "Margin"))
        .with_insight(insight("insight.cost", "Cost"))
        .with_attribute(attribute("region"))
        .with_attribute(attribute("product"))
}

/// Builds an engine over `backend` and loads the sales dashboard.
pub async fn initialized(backend: Arc<InMemoryBackend>) -> DashboardEngine {
    let engine = DashboardEngine::builder()
        .backend(backend)
        .build()
        .expect("engine");
    let event = engine
        .run_and_wait(initialize(Some(ObjRef::identifier(SALES))))
        .await;
    assert!(
        matches!(event.kind, EventKind::Initialized { .. }),
        "initialize failed: {event:?}"
    );
    engine
}

pub fn failure_code(event: &DashboardEvent) -> Option<shared::error::ErrorCode> {
    match &event.kind {
        EventKind::CommandFailed { error, .. } => Some(error.code),
        EventKind::CommandRejected { reason, .. } => Some(reason.code),
        _ => None,
    }
}
