use async_trait::async_trait;
use backend_spi::BackendError;
use shared::{
    domain::{ObjRef, Widget},
    protocol::{Command, CommandKind, EventKind, KpiTitle},
};

use super::unexpected;
use crate::{
    layout::LayoutFacade,
    query::QueryError,
    saga::{CommandHandler, HandlerError, SagaContext},
    store::{DashboardState, Mutation},
};

pub(super) const COMMANDS: &[&str] = &[
    "GDC.DASH/CMD.WIDGET.CHANGE_HEADER",
    "GDC.DASH/CMD.WIDGET.CHANGE_DESCRIPTION",
    "GDC.DASH/CMD.WIDGET.CHANGE_FILTER_SETTINGS",
    "GDC.DASH/CMD.KPI_WIDGET.CHANGE_MEASURE",
    "GDC.DASH/CMD.KPI_WIDGET.CHANGE_COMPARISON",
    "GDC.DASH/CMD.INSIGHT_WIDGET.CHANGE_PROPERTIES",
];

pub(super) struct WidgetHandler;

#[async_trait(?Send)]
impl CommandHandler for WidgetHandler {
    async fn handle(&self, ctx: &SagaContext, command: &Command) -> Result<EventKind, HandlerError> {
        let state = ctx.state();
        match &command.kind {
            CommandKind::ChangeWidgetHeader { widget_ref, title } => {
                let previous = widget(&state, widget_ref)?
                    .title()
                    .map(str::to_string)
                    .ok_or_else(|| unsupported(widget_ref, "a header"))?;
                ctx.commit(Mutation::ChangeWidgetHeader {
                    widget_ref: widget_ref.clone(),
                    title: title.clone(),
                })?;
                ctx.record_undo(
                    command.clone(),
                    vec![CommandKind::ChangeWidgetHeader {
                        widget_ref: widget_ref.clone(),
                        title: previous,
                    }
                    .into()],
                );
                Ok(EventKind::WidgetHeaderChanged {
                    widget_ref: widget_ref.clone(),
                    title: title.clone(),
                })
            }
            CommandKind::ChangeWidgetDescription {
                widget_ref,
                description,
            } => {
                let previous = widget(&state, widget_ref)?
                    .description()
                    .map(str::to_string)
                    .ok_or_else(|| unsupported(widget_ref, "a description"))?;
                ctx.commit(Mutation::ChangeWidgetDescription {
                    widget_ref: widget_ref.clone(),
                    description: description.clone(),
                })?;
                ctx.record_undo(
                    command.clone(),
                    vec![CommandKind::ChangeWidgetDescription {
                        widget_ref: widget_ref.clone(),
                        description: previous,
                    }
                    .into()],
                );
                Ok(EventKind::WidgetDescriptionChanged {
                    widget_ref: widget_ref.clone(),
                    description: description.clone(),
                })
            }
            CommandKind::ChangeWidgetFilterSettings {
                widget_ref,
                ignore_filters,
                date_dataset,
            } => {
                let (previous_ignored, previous_dataset) = widget(&state, widget_ref)?
                    .filter_settings()
                    .map(|(ignored, dataset)| (ignored.to_vec(), dataset.cloned()))
                    .ok_or_else(|| unsupported(widget_ref, "filter settings"))?;
                if let Some(unknown) = ignore_filters
                    .iter()
                    .find(|filter| state.filter_context.index_of(filter).is_none())
                {
                    return Err(HandlerError::invalid(format!(
                        "attribute filter {unknown} does not exist"
                    )));
                }
                ctx.commit(Mutation::ChangeWidgetFilterSettings {
                    widget_ref: widget_ref.clone(),
                    ignore_filters: ignore_filters.clone(),
                    date_dataset: date_dataset.clone(),
                })?;
                ctx.record_undo(
                    command.clone(),
                    vec![CommandKind::ChangeWidgetFilterSettings {
                        widget_ref: widget_ref.clone(),
                        ignore_filters: previous_ignored,
                        date_dataset: previous_dataset,
                    }
                    .into()],
                );
                Ok(EventKind::WidgetFilterSettingsChanged {
                    widget_ref: widget_ref.clone(),
                    ignore_filters: ignore_filters.clone(),
                    date_dataset: date_dataset.clone(),
                })
            }
            CommandKind::ChangeKpiWidgetMeasure {
                widget_ref,
                measure,
                title,
            } => {
                if !matches!(widget(&state, widget_ref)?, Widget::Kpi(_)) {
                    return Err(unsupported(widget_ref, "a measure"));
                }
                let metadata = match ctx.call(ctx.queries().measure_metadata(measure)).await {
                    Ok(metadata) => metadata,
                    Err(HandlerError::Query(QueryError::Backend(BackendError::NotFound(_)))) => {
                        return Err(HandlerError::invalid(format!(
                            "measure {measure} does not exist"
                        )));
                    }
                    Err(err) => return Err(err),
                };

                // The layout may have changed while the measure was being resolved.
                let state = ctx.state();
                let previous = match widget(&state, widget_ref)? {
                    Widget::Kpi(kpi) => kpi.clone(),
                    _ => return Err(unsupported(widget_ref, "a measure")),
                };
                let title = match title {
                    Some(KpiTitle::Text(text)) => text.clone(),
                    Some(KpiTitle::FromMeasure) => metadata.title,
                    None => previous.title.clone(),
                };
                ctx.commit(Mutation::ChangeKpiMeasure {
                    widget_ref: widget_ref.clone(),
                    measure: measure.clone(),
                    title: title.clone(),
                })?;
                ctx.record_undo(
                    command.clone(),
                    vec![CommandKind::ChangeKpiWidgetMeasure {
                        widget_ref: widget_ref.clone(),
                        measure: previous.measure,
                        title: Some(KpiTitle::Text(previous.title)),
                    }
                    .into()],
                );
                Ok(EventKind::KpiWidgetMeasureChanged {
                    widget_ref: widget_ref.clone(),
                    measure: measure.clone(),
                    title,
                })
            }
            CommandKind::ChangeKpiWidgetComparison {
                widget_ref,
                comparison,
            } => {
                let previous = match widget(&state, widget_ref)? {
                    Widget::Kpi(kpi) => kpi.comparison,
                    _ => return Err(unsupported(widget_ref, "a comparison")),
                };
                ctx.commit(Mutation::ChangeKpiComparison {
                    widget_ref: widget_ref.clone(),
                    comparison: *comparison,
                })?;
                ctx.record_undo(
                    command.clone(),
                    vec![CommandKind::ChangeKpiWidgetComparison {
                        widget_ref: widget_ref.clone(),
                        comparison: previous,
                    }
                    .into()],
                );
                Ok(EventKind::KpiWidgetComparisonChanged {
                    widget_ref: widget_ref.clone(),
                    comparison: *comparison,
                })
            }
            CommandKind::ChangeInsightWidgetProperties {
                widget_ref,
                properties,
            } => {
                let previous = match widget(&state, widget_ref)? {
                    Widget::Insight(insight) => insight.properties.clone(),
                    _ => return Err(unsupported(widget_ref, "visualization properties")),
                };
                if properties.as_ref().is_some_and(|value| !value.is_object()) {
                    return Err(HandlerError::invalid(
                        "insight widget properties must be a JSON object",
                    ));
                }
                ctx.commit(Mutation::ChangeInsightProperties {
                    widget_ref: widget_ref.clone(),
                    properties: properties.clone(),
                })?;
                ctx.record_undo(
                    command.clone(),
                    vec![CommandKind::ChangeInsightWidgetProperties {
                        widget_ref: widget_ref.clone(),
                        properties: previous,
                    }
                    .into()],
                );
                Ok(EventKind::InsightWidgetPropertiesChanged {
                    widget_ref: widget_ref.clone(),
                    properties: properties.clone(),
                })
            }
            _ => Err(unexpected(command)),
        }
    }
}

fn widget<'a>(state: &'a DashboardState, widget_ref: &ObjRef) -> Result<&'a Widget, HandlerError> {
    LayoutFacade::new(&state.layout)
        .widget_by_ref(widget_ref)
        .ok_or_else(|| HandlerError::invalid(format!("widget {widget_ref} does not exist")))
}

fn unsupported(widget_ref: &ObjRef, what: &str) -> HandlerError {
    HandlerError::invalid(format!("widget {widget_ref} does not have {what}"))
}
