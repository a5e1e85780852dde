use async_trait::async_trait;
use shared::{
    domain::{Item, ObjRef, Section, SectionHeader, StashId},
    protocol::{Command, CommandKind, EventKind, ItemDefinition, RelativeIndex},
};

use super::{
    ensure_refs_available, item_definitions, relative, resolve_existing_index, resolve_items,
    single_stash, unexpected, uses_stash, validate_insights,
};
use crate::{
    layout::{ItemPath, LayoutFacade},
    saga::{CommandHandler, HandlerError, SagaContext},
    store::{resolve_insert_index, Mutation},
};

pub(super) const COMMANDS: &[&str] = &[
    "GDC.DASH/CMD.FLUID_LAYOUT.ADD_SECTION",
    "GDC.DASH/CMD.FLUID_LAYOUT.REMOVE_SECTION",
    "GDC.DASH/CMD.FLUID_LAYOUT.MOVE_SECTION",
    "GDC.DASH/CMD.FLUID_LAYOUT.CHANGE_SECTION_HEADER",
    "GDC.DASH/CMD.FLUID_LAYOUT.ADD_ITEMS",
    "GDC.DASH/CMD.FLUID_LAYOUT.MOVE_ITEM",
    "GDC.DASH/CMD.FLUID_LAYOUT.REMOVE_ITEM",
    "GDC.DASH/CMD.FLUID_LAYOUT.REMOVE_ITEM_BY_WIDGET_REF",
    "GDC.DASH/CMD.FLUID_LAYOUT.REPLACE_ITEM",
];

const STASH_NOT_UNDOABLE: &str = "items were taken from more than one stash";

/// Fluid layout sections and items.
///
/// Every handler validates inputs that need the backend first, then snapshots the state
/// and commits without suspending in between.
pub(super) struct LayoutHandler;

#[async_trait(?Send)]
impl CommandHandler for LayoutHandler {
    async fn handle(&self, ctx: &SagaContext, command: &Command) -> Result<EventKind, HandlerError> {
        match &command.kind {
            CommandKind::AddSection {
                index,
                header,
                persistent,
                items,
            } => {
                validate_insights(ctx, items).await?;
                add_section(ctx, command, *index, header.clone(), *persistent, items)
            }
            CommandKind::RemoveSection { index, stash } => {
                remove_section(ctx, command, *index, stash.clone())
            }
            CommandKind::MoveSection {
                section_index,
                to_index,
            } => move_section(ctx, command, *section_index, *to_index),
            CommandKind::ChangeSectionHeader {
                index,
                header,
                merge,
            } => change_section_header(ctx, command, *index, header, *merge),
            CommandKind::AddItems {
                section_index,
                item_index,
                items,
            } => {
                if items.is_empty() {
                    return Err(HandlerError::invalid("no items to add"));
                }
                validate_insights(ctx, items).await?;
                add_items(ctx, command, *section_index, *item_index, items)
            }
            CommandKind::MoveItem {
                section_index,
                item_index,
                to_section_index,
                to_item_index,
                eager,
            } => move_item(
                ctx,
                command,
                ItemPath {
                    section_index: *section_index,
                    item_index: *item_index,
                },
                *to_section_index,
                *to_item_index,
                *eager,
            ),
            CommandKind::RemoveItem {
                section_index,
                item_index,
                stash,
                eager,
            } => remove_item(
                ctx,
                command,
                ItemPath {
                    section_index: *section_index,
                    item_index: *item_index,
                },
                stash.clone(),
                *eager,
            ),
            CommandKind::RemoveItemByWidgetRef { widget_ref, stash } => {
                let path = top_level_path(ctx, widget_ref)?;
                remove_item(ctx, command, path, stash.clone(), true)
            }
            CommandKind::ReplaceItem {
                section_index,
                item_index,
                items,
                stash,
            } => {
                if items.is_empty() {
                    return Err(HandlerError::invalid("no replacement items"));
                }
                validate_insights(ctx, items).await?;
                replace_item(
                    ctx,
                    command,
                    ItemPath {
                        section_index: *section_index,
                        item_index: *item_index,
                    },
                    items,
                    stash.clone(),
                )
            }
            _ => Err(unexpected(command)),
        }
    }
}

fn add_section(
    ctx: &SagaContext,
    command: &Command,
    index: RelativeIndex,
    header: Option<SectionHeader>,
    persistent: bool,
    definitions: &[ItemDefinition],
) -> Result<EventKind, HandlerError> {
    let state = ctx.state();
    let position = resolve_insert_index(state.layout.sections.len(), index)
        .ok_or_else(|| HandlerError::invalid(format!("section index {index} is out of range")))?;
    let resolved = resolve_items(&state, definitions)?;
    ensure_refs_available(&state.layout, &resolved.items, None)?;

    let section = Section {
        header: header.unwrap_or_default(),
        persistent,
        items: resolved.items,
    };
    let undo_stash = single_stash(definitions).cloned();
    ctx.commit(Mutation::AddSection {
        index: relative(position)?,
        section: section.clone(),
        used_stashes: resolved.used_stashes,
    })?;

    if uses_stash(definitions) && undo_stash.is_none() {
        ctx.record_not_undoable(command.clone(), STASH_NOT_UNDOABLE);
    } else {
        ctx.record_undo(
            command.clone(),
            vec![CommandKind::RemoveSection {
                index: relative(position)?,
                stash: undo_stash,
            }
            .into()],
        );
    }
    Ok(EventKind::SectionAdded {
        index: position,
        section,
    })
}

fn remove_section(
    ctx: &SagaContext,
    command: &Command,
    index: RelativeIndex,
    stash: Option<StashId>,
) -> Result<EventKind, HandlerError> {
    let state = ctx.state();
    let position = resolve_existing_index(state.layout.sections.len(), index)
        .ok_or_else(|| HandlerError::invalid(format!("section {index} does not exist")))?;
    let section = state.layout.sections[position].clone();

    ctx.commit(Mutation::RemoveSection {
        index: position,
        stash: stash.clone(),
    })?;

    let items = match &stash {
        Some(stash) => vec![ItemDefinition::Stash(stash.clone())],
        None => item_definitions(section.items.iter().cloned()),
    };
    ctx.record_undo(
        command.clone(),
        vec![CommandKind::AddSection {
            index: relative(position)?,
            header: Some(section.header.clone()),
            persistent: section.persistent,
            items,
        }
        .into()],
    );
    Ok(EventKind::SectionRemoved {
        index: position,
        section,
        stash,
    })
}

fn move_section(
    ctx: &SagaContext,
    command: &Command,
    from_index: usize,
    to_index: RelativeIndex,
) -> Result<EventKind, HandlerError> {
    let state = ctx.state();
    let section = state
        .layout
        .sections
        .get(from_index)
        .cloned()
        .ok_or_else(|| HandlerError::invalid(format!("section {from_index} does not exist")))?;
    let target = resolve_insert_index(state.layout.sections.len() - 1, to_index)
        .ok_or_else(|| HandlerError::invalid(format!("target index {to_index} is out of range")))?;

    ctx.commit(Mutation::MoveSection {
        from_index,
        to_index,
    })?;
    ctx.record_undo(
        command.clone(),
        vec![CommandKind::MoveSection {
            section_index: target,
            to_index: relative(from_index)?,
        }
        .into()],
    );
    Ok(EventKind::SectionMoved {
        section,
        from_index,
        to_index: target,
    })
}

fn change_section_header(
    ctx: &SagaContext,
    command: &Command,
    index: usize,
    header: &SectionHeader,
    merge: bool,
) -> Result<EventKind, HandlerError> {
    let state = ctx.state();
    let previous = state
        .layout
        .sections
        .get(index)
        .map(|section| section.header.clone())
        .ok_or_else(|| HandlerError::invalid(format!("section {index} does not exist")))?;
    let header = if merge {
        previous.merged_with(header)
    } else {
        header.clone()
    };

    ctx.commit(Mutation::ChangeSectionHeader {
        index,
        header: header.clone(),
    })?;
    ctx.record_undo(
        command.clone(),
        vec![CommandKind::ChangeSectionHeader {
            index,
            header: previous,
            merge: false,
        }
        .into()],
    );
    Ok(EventKind::SectionHeaderChanged { index, header })
}

fn add_items(
    ctx: &SagaContext,
    command: &Command,
    section_index: usize,
    item_index: RelativeIndex,
    definitions: &[ItemDefinition],
) -> Result<EventKind, HandlerError> {
    let state = ctx.state();
    let section_count = state.layout.sections.len();
    if section_index > section_count {
        return Err(HandlerError::invalid(format!(
            "section {section_index} does not exist"
        )));
    }
    let section_created = section_index == section_count;
    let existing = state
        .layout
        .sections
        .get(section_index)
        .map_or(0, |section| section.items.len());
    let position = resolve_insert_index(existing, item_index).ok_or_else(|| {
        HandlerError::invalid(format!(
            "item index {item_index} is out of range for section {section_index}"
        ))
    })?;
    let resolved = resolve_items(&state, definitions)?;
    ensure_refs_available(&state.layout, &resolved.items, None)?;
    let items = resolved.items.clone();
    let undo_stash = single_stash(definitions).cloned();

    let inverse = if section_created {
        ctx.commit(Mutation::AddSection {
            index: relative(section_index)?,
            section: Section {
                items: resolved.items,
                ..Section::default()
            },
            used_stashes: resolved.used_stashes,
        })?;
        vec![CommandKind::RemoveSection {
            index: relative(section_index)?,
            stash: undo_stash.clone(),
        }
        .into()]
    } else {
        ctx.commit(Mutation::AddItems {
            section_index,
            item_index: relative(position)?,
            items: resolved.items,
            used_stashes: resolved.used_stashes,
        })?;
        match (&undo_stash, items.len()) {
            (Some(stash), 1) => vec![remove_item_command(
                section_index,
                position,
                Some(stash.clone()),
            )],
            _ => (0..items.len())
                .rev()
                .map(|offset| remove_item_command(section_index, position + offset, None))
                .collect(),
        }
    };

    let undoable = !uses_stash(definitions)
        || (undo_stash.is_some() && (section_created || items.len() == 1));
    if undoable {
        ctx.record_undo(command.clone(), inverse);
    } else {
        ctx.record_not_undoable(command.clone(), STASH_NOT_UNDOABLE);
    }
    Ok(EventKind::ItemsAdded {
        section_index,
        item_index: position,
        items,
        section_created,
    })
}

fn move_item(
    ctx: &SagaContext,
    command: &Command,
    from: ItemPath,
    to_section_index: usize,
    to_item_index: RelativeIndex,
    eager: bool,
) -> Result<EventKind, HandlerError> {
    let state = ctx.state();
    let facade = LayoutFacade::new(&state.layout);
    let source = facade.section_at(from.section_index).ok_or_else(|| {
        HandlerError::invalid(format!("section {} does not exist", from.section_index))
    })?;
    let item = source
        .items
        .get(from.item_index)
        .cloned()
        .ok_or_else(|| HandlerError::invalid(item_missing(from)))?;
    let target_section = facade.section_at(to_section_index).ok_or_else(|| {
        HandlerError::invalid(format!("section {to_section_index} does not exist"))
    })?;
    let same_section = from.section_index == to_section_index;
    let target_len = target_section.items.len() - usize::from(same_section);
    let target = resolve_insert_index(target_len, to_item_index).ok_or_else(|| {
        HandlerError::invalid(format!(
            "item index {to_item_index} is out of range for section {to_section_index}"
        ))
    })?;
    let section_removed =
        eager && !same_section && source.items.len() == 1 && !source.persistent;
    let source_header = source.header.clone();

    ctx.commit(Mutation::MoveItem {
        section_index: from.section_index,
        item_index: from.item_index,
        to_section_index,
        to_item_index,
        eager,
    })?;

    let final_section = if section_removed && from.section_index < to_section_index {
        to_section_index - 1
    } else {
        to_section_index
    };
    let inverse = if section_removed {
        vec![
            CommandKind::AddSection {
                index: relative(from.section_index)?,
                header: Some(source_header),
                persistent: false,
                items: Vec::new(),
            }
            .into(),
            move_item_command(
                ItemPath {
                    section_index: to_section_index,
                    item_index: target,
                },
                from,
            )?,
        ]
    } else {
        vec![move_item_command(
            ItemPath {
                section_index: final_section,
                item_index: target,
            },
            from,
        )?]
    };
    ctx.record_undo(command.clone(), inverse);
    Ok(EventKind::ItemMoved {
        item,
        from_section_index: from.section_index,
        from_item_index: from.item_index,
        to_section_index: final_section,
        to_item_index: target,
        section_removed,
    })
}

fn remove_item(
    ctx: &SagaContext,
    command: &Command,
    path: ItemPath,
    stash: Option<StashId>,
    eager: bool,
) -> Result<EventKind, HandlerError> {
    let state = ctx.state();
    let section = state
        .layout
        .sections
        .get(path.section_index)
        .ok_or_else(|| HandlerError::invalid(item_missing(path)))?;
    let item = section
        .items
        .get(path.item_index)
        .cloned()
        .ok_or_else(|| HandlerError::invalid(item_missing(path)))?;
    let section_removed = eager && section.items.len() == 1 && !section.persistent;
    let header = section.header.clone();

    ctx.commit(Mutation::RemoveItem {
        section_index: path.section_index,
        item_index: path.item_index,
        stash: stash.clone(),
        eager,
    })?;

    let restored = match &stash {
        Some(stash) => ItemDefinition::Stash(stash.clone()),
        None => ItemDefinition::Item(item.clone()),
    };
    let inverse: Command = if section_removed {
        CommandKind::AddSection {
            index: relative(path.section_index)?,
            header: Some(header),
            persistent: false,
            items: vec![restored],
        }
        .into()
    } else {
        CommandKind::AddItems {
            section_index: path.section_index,
            item_index: relative(path.item_index)?,
            items: vec![restored],
        }
        .into()
    };
    ctx.record_undo(command.clone(), vec![inverse]);
    Ok(EventKind::ItemRemoved {
        section_index: path.section_index,
        item_index: path.item_index,
        item,
        section_removed,
        stash,
    })
}

fn replace_item(
    ctx: &SagaContext,
    command: &Command,
    path: ItemPath,
    definitions: &[ItemDefinition],
    stash: Option<StashId>,
) -> Result<EventKind, HandlerError> {
    let state = ctx.state();
    let previous = state
        .layout
        .sections
        .get(path.section_index)
        .and_then(|section| section.items.get(path.item_index))
        .cloned()
        .ok_or_else(|| HandlerError::invalid(item_missing(path)))?;
    let resolved = resolve_items(&state, definitions)?;
    ensure_refs_available(&state.layout, &resolved.items, Some(path))?;
    let items = resolved.items.clone();

    ctx.commit(Mutation::ReplaceItem {
        section_index: path.section_index,
        item_index: path.item_index,
        items: resolved.items,
        stash: stash.clone(),
        used_stashes: resolved.used_stashes,
    })?;

    let consumed = single_stash(definitions).filter(|_| items.len() == 1);
    if uses_stash(definitions) && consumed.is_none() {
        ctx.record_not_undoable(command.clone(), STASH_NOT_UNDOABLE);
    } else {
        let mut inverse: Vec<Command> = (1..items.len())
            .rev()
            .map(|offset| {
                remove_item_command(path.section_index, path.item_index + offset, None)
            })
            .collect();
        let restored = match &stash {
            Some(stash) => ItemDefinition::Stash(stash.clone()),
            None => ItemDefinition::Item(previous.clone()),
        };
        inverse.push(
            CommandKind::ReplaceItem {
                section_index: path.section_index,
                item_index: path.item_index,
                items: vec![restored],
                stash: consumed.cloned(),
            }
            .into(),
        );
        ctx.record_undo(command.clone(), inverse);
    }
    Ok(EventKind::ItemReplaced {
        section_index: path.section_index,
        item_index: path.item_index,
        previous,
        items,
        stash,
    })
}

/// Position of the top-level item whose own ref is `widget_ref`.
fn top_level_path(ctx: &SagaContext, widget_ref: &ObjRef) -> Result<ItemPath, HandlerError> {
    let state = ctx.state();
    let facade = LayoutFacade::new(&state.layout);
    let path = facade
        .find_by_ref(widget_ref)
        .ok_or_else(|| HandlerError::invalid(format!("widget {widget_ref} does not exist")))?;
    let top_level = facade
        .item_at(path.section_index, path.item_index)
        .is_some_and(|item: &Item| item.widget.widget_ref() == widget_ref);
    if !top_level {
        return Err(HandlerError::invalid(format!(
            "widget {widget_ref} is nested inside another widget"
        )));
    }
    Ok(path)
}

fn remove_item_command(section_index: usize, item_index: usize, stash: Option<StashId>) -> Command {
    CommandKind::RemoveItem {
        section_index,
        item_index,
        stash,
        eager: false,
    }
    .into()
}

fn move_item_command(from: ItemPath, to: ItemPath) -> Result<Command, HandlerError> {
    Ok(CommandKind::MoveItem {
        section_index: from.section_index,
        item_index: from.item_index,
        to_section_index: to.section_index,
        to_item_index: relative(to.item_index)?,
        eager: false,
    }
    .into())
}

fn item_missing(path: ItemPath) -> String {
    format!(
        "item {} of section {} does not exist",
        path.item_index, path.section_index
    )
}
