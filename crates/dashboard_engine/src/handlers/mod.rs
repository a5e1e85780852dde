use std::{collections::HashSet, rc::Rc};

use backend_spi::BackendError;
use futures::{future::join_all, FutureExt};
use shared::{
    domain::{Item, Layout, ObjRef, StashId},
    error::{ApiError, ErrorCode},
    protocol::{Command, ItemDefinition, RelativeIndex, LAST_INDEX},
};

use crate::{
    bus::HandlerRegistry,
    config::EngineConfigError,
    layout::{ItemPath, LayoutFacade},
    query::QueryError,
    saga::{CommandHandler, HandlerError, SagaContext},
    store::DashboardState,
};

mod dashboard;
mod filters;
mod layout;
mod ui;
mod undo;
mod widgets;

/// Registers the built-in handler for every built-in command type.
pub(crate) fn register_defaults(registry: &mut HandlerRegistry) -> Result<(), EngineConfigError> {
    let groups: [(Rc<dyn CommandHandler>, &[&str]); 6] = [
        (Rc::new(dashboard::DashboardHandler), dashboard::COMMANDS),
        (Rc::new(layout::LayoutHandler), layout::COMMANDS),
        (Rc::new(widgets::WidgetHandler), widgets::COMMANDS),
        (Rc::new(filters::FilterHandler), filters::COMMANDS),
        (Rc::new(ui::UiHandler), ui::COMMANDS),
        (Rc::new(undo::UndoHandler), undo::COMMANDS),
    ];
    for (handler, commands) in groups {
        for command_type in commands {
            registry.register(*command_type, handler.clone())?;
        }
    }
    Ok(())
}

/// A handler was routed a command kind it does not serve.
fn unexpected(command: &Command) -> HandlerError {
    HandlerError::Failed(ApiError::new(
        ErrorCode::UnknownCommand,
        format!("handler cannot process {}", command.command_type()),
    ))
}

fn relative(index: usize) -> Result<RelativeIndex, HandlerError> {
    RelativeIndex::try_from(index)
        .map_err(|_| HandlerError::Failed(ApiError::internal(format!("index {index} overflows"))))
}

/// Maps a relative index onto an existing element of a sequence of `len` elements.
fn resolve_existing_index(len: usize, index: RelativeIndex) -> Option<usize> {
    if index == LAST_INDEX {
        return len.checked_sub(1);
    }
    usize::try_from(index).ok().filter(|index| *index < len)
}

struct ResolvedItems {
    items: Vec<Item>,
    used_stashes: Vec<StashId>,
}

/// Expands stash references into the items they hold.
fn resolve_items(
    state: &DashboardState,
    definitions: &[ItemDefinition],
) -> Result<ResolvedItems, HandlerError> {
    let mut resolved = ResolvedItems {
        items: Vec::new(),
        used_stashes: Vec::new(),
    };
    for definition in definitions {
        match definition {
            ItemDefinition::Item(item) => resolved.items.push(item.clone()),
            ItemDefinition::Stash(stash) => {
                let stashed = state
                    .stash
                    .get(stash)
                    .ok_or_else(|| HandlerError::invalid(format!("stash {stash} does not exist")))?;
                if resolved.used_stashes.contains(stash) {
                    return Err(HandlerError::invalid(format!("stash {stash} is used twice")));
                }
                resolved.items.extend(stashed.iter().cloned());
                resolved.used_stashes.push(stash.clone());
            }
        }
    }
    Ok(resolved)
}

/// The stash id when `definitions` is exactly one stash reference.
fn single_stash(definitions: &[ItemDefinition]) -> Option<&StashId> {
    match definitions {
        [ItemDefinition::Stash(stash)] => Some(stash),
        _ => None,
    }
}

fn uses_stash(definitions: &[ItemDefinition]) -> bool {
    definitions
        .iter()
        .any(|definition| matches!(definition, ItemDefinition::Stash(_)))
}

fn item_definitions(items: impl IntoIterator<Item = Item>) -> Vec<ItemDefinition> {
    items.into_iter().map(ItemDefinition::Item).collect()
}

/// Rejects widget refs that repeat within `items` or already exist in `layout`, except in
/// the item at `replaced`.
fn ensure_refs_available(
    layout: &Layout,
    items: &[Item],
    replaced: Option<ItemPath>,
) -> Result<(), HandlerError> {
    let facade = LayoutFacade::new(layout);
    let mut seen: HashSet<&ObjRef> = HashSet::new();
    for widget_ref in items.iter().flat_map(|item| item.widget.all_refs()) {
        if !seen.insert(widget_ref) {
            return Err(HandlerError::invalid(format!(
                "widget ref {widget_ref} appears more than once"
            )));
        }
        if let Some(path) = facade.find_by_ref(widget_ref) {
            if Some(path) != replaced {
                return Err(HandlerError::invalid(format!(
                    "widget ref {widget_ref} is already used on this dashboard"
                )));
            }
        }
    }
    Ok(())
}

/// Checks that every insight referenced by literal items exists. Lookups run concurrently
/// through the query service.
async fn validate_insights(
    ctx: &SagaContext,
    definitions: &[ItemDefinition],
) -> Result<(), HandlerError> {
    let mut insights: Vec<&ObjRef> = definitions
        .iter()
        .filter_map(|definition| match definition {
            ItemDefinition::Item(item) => Some(item),
            ItemDefinition::Stash(_) => None,
        })
        .flat_map(|item| item.widget.insight_refs())
        .collect();
    insights.sort();
    insights.dedup();
    if insights.is_empty() {
        return Ok(());
    }

    let lookups = join_all(insights.iter().map(|insight| ctx.queries().insight(insight)));
    let results = ctx.call(lookups.map(Ok::<_, HandlerError>)).await?;
    for (insight, result) in insights.iter().zip(results) {
        match result {
            Ok(_) => {}
            Err(QueryError::Backend(BackendError::NotFound(_))) => {
                return Err(HandlerError::invalid(format!(
                    "insight {insight} does not exist"
                )));
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../tests/handlers_tests.rs"]
mod tests;
