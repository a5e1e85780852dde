use async_trait::async_trait;
use backend_spi::BackendError;
use shared::{
    domain::{AttributeFilter, DateFilter, FilterContext},
    protocol::{Command, CommandKind, EventKind, RelativeIndex},
};
use tracing::debug;
use uuid::Uuid;

use super::{relative, unexpected};
use crate::{
    query::QueryError,
    saga::{CommandHandler, HandlerError, SagaContext},
    store::{resolve_insert_index, Mutation},
};

pub(super) const COMMANDS: &[&str] = &[
    "GDC.DASH/CMD.FILTER_CONTEXT.DATE_FILTER.CHANGE_SELECTION",
    "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.ADD",
    "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.REMOVE",
    "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.MOVE",
    "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.CHANGE_SELECTION",
    "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.SET_PARENT",
];

/// Date and attribute filters of the filter context.
pub(super) struct FilterHandler;

#[async_trait(?Send)]
impl CommandHandler for FilterHandler {
    async fn handle(&self, ctx: &SagaContext, command: &Command) -> Result<EventKind, HandlerError> {
        match &command.kind {
            CommandKind::ChangeDateFilterSelection { filter } => {
                let previous = ctx.state().filter_context.date_filter.clone();
                ctx.commit(Mutation::SetDateFilter {
                    filter: filter.clone(),
                })?;
                ctx.record_undo(
                    command.clone(),
                    vec![CommandKind::ChangeDateFilterSelection {
                        filter: previous.unwrap_or(DateFilter::AllTime),
                    }
                    .into()],
                );
                Ok(EventKind::DateFilterSelectionChanged {
                    filter: ctx.state().filter_context.date_filter.clone(),
                })
            }
            CommandKind::AddAttributeFilter {
                index,
                display_form,
                local_identifier,
                title,
                negative_selection,
                elements,
                parents,
            } => {
                let attribute = match ctx.call(ctx.queries().attribute_metadata(display_form)).await {
                    Ok(attribute) => attribute,
                    Err(HandlerError::Query(QueryError::Backend(BackendError::NotFound(_)))) => {
                        return Err(HandlerError::invalid(format!(
                            "display form {display_form} does not exist"
                        )));
                    }
                    Err(err) => return Err(err),
                };

                let context = ctx.state().filter_context;
                let filter = AttributeFilter {
                    local_identifier: local_identifier
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
                    display_form: display_form.clone(),
                    title: title.clone(),
                    negative_selection: *negative_selection,
                    elements: elements.clone(),
                    parents: parents.clone(),
                };
                if context.index_of(&filter.local_identifier).is_some() {
                    return Err(HandlerError::invalid(format!(
                        "attribute filter {} already exists",
                        filter.local_identifier
                    )));
                }
                if let Some(other) = context
                    .attribute_filters
                    .iter()
                    .find(|other| attribute.has_display_form(&other.display_form))
                {
                    return Err(HandlerError::invalid(format!(
                        "attribute {} is already filtered by {}",
                        attribute.attribute, other.local_identifier
                    )));
                }
                ensure_parents(&context, &filter.local_identifier, parents)?;
                let position = resolve_insert_index(context.attribute_filters.len(), *index)
                    .ok_or_else(|| index_out_of_range(*index))?;
                debug!(
                    local_identifier = %filter.local_identifier,
                    attribute = %attribute.attribute,
                    "adding attribute filter"
                );

                ctx.commit(Mutation::AddAttributeFilter {
                    index: relative(position)?,
                    filter: filter.clone(),
                })?;
                let mut redo = command.clone();
                if let CommandKind::AddAttributeFilter {
                    local_identifier, ..
                } = &mut redo.kind
                {
                    *local_identifier = Some(filter.local_identifier.clone());
                }
                ctx.record_undo(
                    redo,
                    vec![CommandKind::RemoveAttributeFilters {
                        local_identifiers: vec![filter.local_identifier.clone()],
                    }
                    .into()],
                );
                Ok(EventKind::AttributeFilterAdded {
                    index: position,
                    filter,
                })
            }
            CommandKind::RemoveAttributeFilters { local_identifiers } => {
                remove_filters(ctx, command, local_identifiers)
            }
            CommandKind::MoveAttributeFilter {
                local_identifier,
                index,
            } => {
                let context = ctx.state().filter_context;
                let from_index = existing(&context, local_identifier)?;
                let to_index = resolve_insert_index(context.attribute_filters.len() - 1, *index)
                    .ok_or_else(|| index_out_of_range(*index))?;
                ctx.commit(Mutation::MoveAttributeFilter {
                    local_identifier: local_identifier.clone(),
                    index: *index,
                })?;
                ctx.record_undo(
                    command.clone(),
                    vec![CommandKind::MoveAttributeFilter {
                        local_identifier: local_identifier.clone(),
                        index: relative(from_index)?,
                    }
                    .into()],
                );
                Ok(EventKind::AttributeFilterMoved {
                    local_identifier: local_identifier.clone(),
                    from_index,
                    to_index,
                })
            }
            CommandKind::ChangeAttributeFilterSelection {
                local_identifier,
                elements,
                negative_selection,
            } => {
                let context = ctx.state().filter_context;
                let previous = &context.attribute_filters[existing(&context, local_identifier)?];
                ctx.commit(Mutation::ChangeAttributeFilterSelection {
                    local_identifier: local_identifier.clone(),
                    elements: elements.clone(),
                    negative_selection: *negative_selection,
                })?;
                ctx.record_undo(
                    command.clone(),
                    vec![CommandKind::ChangeAttributeFilterSelection {
                        local_identifier: local_identifier.clone(),
                        elements: previous.elements.clone(),
                        negative_selection: previous.negative_selection,
                    }
                    .into()],
                );
                Ok(EventKind::AttributeFilterSelectionChanged {
                    local_identifier: local_identifier.clone(),
                    elements: elements.clone(),
                    negative_selection: *negative_selection,
                })
            }
            CommandKind::SetAttributeFilterParents {
                local_identifier,
                parents,
            } => {
                let context = ctx.state().filter_context;
                let previous = &context.attribute_filters[existing(&context, local_identifier)?];
                ensure_parents(&context, local_identifier, parents)?;
                ctx.commit(Mutation::SetAttributeFilterParents {
                    local_identifier: local_identifier.clone(),
                    parents: parents.clone(),
                })?;
                ctx.record_undo(
                    command.clone(),
                    vec![set_parents(local_identifier, &previous.parents)],
                );
                Ok(EventKind::AttributeFilterParentChanged {
                    local_identifier: local_identifier.clone(),
                    parents: parents.clone(),
                })
            }
            _ => Err(unexpected(command)),
        }
    }
}

/// Removing filters also strips them from the parents of the remaining filters, so the
/// inverse re-adds the removed filters first and then restores every affected parent list.
fn remove_filters(
    ctx: &SagaContext,
    command: &Command,
    local_identifiers: &[String],
) -> Result<EventKind, HandlerError> {
    if local_identifiers.is_empty() {
        return Err(HandlerError::invalid("no attribute filters to remove"));
    }
    let context = ctx.state().filter_context;
    for local_identifier in local_identifiers {
        existing(&context, local_identifier)?;
    }
    let is_removed = |local_identifier: &String| local_identifiers.contains(local_identifier);
    let removed: Vec<(usize, &AttributeFilter)> = context
        .attribute_filters
        .iter()
        .enumerate()
        .filter(|(_, filter)| is_removed(&filter.local_identifier))
        .collect();

    ctx.commit(Mutation::RemoveAttributeFilters {
        local_identifiers: local_identifiers.to_vec(),
    })?;

    let mut inverse = Vec::new();
    for (index, filter) in &removed {
        inverse.push(
            CommandKind::AddAttributeFilter {
                index: relative(*index)?,
                display_form: filter.display_form.clone(),
                local_identifier: Some(filter.local_identifier.clone()),
                title: filter.title.clone(),
                negative_selection: filter.negative_selection,
                elements: filter.elements.clone(),
                parents: Vec::new(),
            }
            .into(),
        );
    }
    for filter in &context.attribute_filters {
        let restore = if is_removed(&filter.local_identifier) {
            !filter.parents.is_empty()
        } else {
            filter.parents.iter().any(is_removed)
        };
        if restore {
            inverse.push(set_parents(&filter.local_identifier, &filter.parents));
        }
    }
    ctx.record_undo(command.clone(), inverse);
    Ok(EventKind::AttributeFilterRemoved {
        removed: removed.into_iter().map(|(_, filter)| filter.clone()).collect(),
    })
}

fn existing(context: &FilterContext, local_identifier: &str) -> Result<usize, HandlerError> {
    context.index_of(local_identifier).ok_or_else(|| {
        HandlerError::invalid(format!("attribute filter {local_identifier} does not exist"))
    })
}

fn ensure_parents(
    context: &FilterContext,
    local_identifier: &str,
    parents: &[String],
) -> Result<(), HandlerError> {
    for parent in parents {
        if parent == local_identifier {
            return Err(HandlerError::invalid(format!(
                "attribute filter {local_identifier} cannot be its own parent"
            )));
        }
        existing(context, parent)?;
    }
    Ok(())
}

fn set_parents(local_identifier: &str, parents: &[String]) -> Command {
    CommandKind::SetAttributeFilterParents {
        local_identifier: local_identifier.to_string(),
        parents: parents.to_vec(),
    }
    .into()
}

fn index_out_of_range(index: RelativeIndex) -> HandlerError {
    HandlerError::invalid(format!("filter index {index} is out of range"))
}
