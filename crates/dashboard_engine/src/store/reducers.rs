use std::collections::{BTreeMap, HashSet};

use shared::{
    domain::{DateFilter, Item, Layout, ObjRef, StashId, Widget},
    protocol::{RelativeIndex, LAST_INDEX},
};

use super::{CatalogCache, DashboardState, Mutation, ReducerError, UiState};

/// Maps a relative insertion index onto `0..=len`; `-1` means append.
pub(crate) fn resolve_insert_index(len: usize, index: RelativeIndex) -> Option<usize> {
    if index == LAST_INDEX {
        return Some(len);
    }
    usize::try_from(index).ok().filter(|index| *index <= len)
}

pub(super) fn reduce(
    state: &mut DashboardState,
    mutation: Mutation,
    revision: u64,
) -> Result<(), ReducerError> {
    match mutation {
        Mutation::Hydrate {
            mut definition,
            attributes,
        } => {
            ensure_unique_refs(&Layout::default(), definition.layout.items())?;
            normalize_date_filter(&mut definition.filter_context.date_filter);
            state
                .descriptor
                .replace(definition.descriptor.clone(), revision);
            state.layout.replace(definition.layout.clone(), revision);
            state
                .filter_context
                .replace(definition.filter_context.clone(), revision);
            state
                .catalog
                .replace(CatalogCache::from_attributes(attributes), revision);
            state.ui.replace(UiState::default(), revision);
            state.stash.replace(BTreeMap::new(), revision);
            state.persisted.replace(Some(definition), revision);
        }
        Mutation::CacheCatalog {
            attributes,
            measures,
        } => {
            let catalog = state.catalog.make_mut(revision);
            for attribute in attributes {
                catalog.insert(attribute);
            }
            for measure in measures {
                catalog.insert_measure(measure);
            }
        }
        Mutation::MarkSaved { definition } => {
            state
                .descriptor
                .replace(definition.descriptor.clone(), revision);
            state.persisted.replace(Some(definition), revision);
        }
        Mutation::ResetToPersisted => {
            let definition = (*state.persisted).clone().unwrap_or_default();
            state.descriptor.replace(definition.descriptor, revision);
            state.layout.replace(definition.layout, revision);
            state
                .filter_context
                .replace(definition.filter_context, revision);
            state.ui.replace(UiState::default(), revision);
            state.stash.replace(BTreeMap::new(), revision);
        }
        Mutation::Rename { title } => {
            state.descriptor.make_mut(revision).title = title;
        }
        Mutation::ChangeMetadata {
            description,
            tags,
            share_status,
        } => {
            let descriptor = state.descriptor.make_mut(revision);
            if let Some(description) = description {
                descriptor.description = description;
            }
            if let Some(tags) = tags {
                descriptor.tags = tags;
            }
            if let Some(share_status) = share_status {
                descriptor.share_status = share_status;
            }
        }
        Mutation::AddSection {
            index,
            section,
            used_stashes,
        } => {
            let position = resolve_insert_index(state.layout.sections.len(), index)
                .ok_or(ReducerError::SectionOutOfRange {
                    index: i64::from(index),
                })?;
            ensure_unique_refs(&state.layout, section.items.iter())?;
            consume_stashes(state, &used_stashes, None, revision)?;
            state
                .layout
                .make_mut(revision)
                .sections
                .insert(position, section);
        }
        Mutation::RemoveSection { index, stash } => {
            check_section(&state.layout, index)?;
            let section = state.layout.make_mut(revision).sections.remove(index);
            if let Some(stash) = stash {
                state.stash.make_mut(revision).insert(stash, section.items);
            }
            drop_stale_selection(state, revision);
        }
        Mutation::MoveSection {
            from_index,
            to_index,
        } => {
            check_section(&state.layout, from_index)?;
            let target = resolve_insert_index(state.layout.sections.len() - 1, to_index).ok_or(
                ReducerError::SectionOutOfRange {
                    index: i64::from(to_index),
                },
            )?;
            let sections = &mut state.layout.make_mut(revision).sections;
            let section = sections.remove(from_index);
            sections.insert(target, section);
        }
        Mutation::ChangeSectionHeader { index, header } => {
            check_section(&state.layout, index)?;
            state.layout.make_mut(revision).sections[index].header = header;
        }
        Mutation::AddItems {
            section_index,
            item_index,
            items,
            used_stashes,
        } => {
            check_section(&state.layout, section_index)?;
            let position =
                resolve_insert_index(state.layout.sections[section_index].items.len(), item_index)
                    .ok_or(ReducerError::ItemOutOfRange {
                        section_index,
                        item_index: i64::from(item_index),
                    })?;
            ensure_unique_refs(&state.layout, items.iter())?;
            consume_stashes(state, &used_stashes, None, revision)?;
            let section_items = &mut state.layout.make_mut(revision).sections[section_index].items;
            insert_all(section_items, position, items);
        }
        Mutation::MoveItem {
            section_index,
            item_index,
            to_section_index,
            to_item_index,
            eager,
        } => {
            check_item(&state.layout, section_index, item_index)?;
            check_section(&state.layout, to_section_index)?;
            let target_len = state.layout.sections[to_section_index].items.len()
                - usize::from(section_index == to_section_index);
            let target = resolve_insert_index(target_len, to_item_index).ok_or(
                ReducerError::ItemOutOfRange {
                    section_index: to_section_index,
                    item_index: i64::from(to_item_index),
                },
            )?;
            let layout = state.layout.make_mut(revision);
            let item = layout.sections[section_index].items.remove(item_index);
            layout.sections[to_section_index].items.insert(target, item);
            if section_index != to_section_index {
                remove_if_empty(layout, section_index, eager);
            }
        }
        Mutation::RemoveItem {
            section_index,
            item_index,
            stash,
            eager,
        } => {
            check_item(&state.layout, section_index, item_index)?;
            let layout = state.layout.make_mut(revision);
            let item = layout.sections[section_index].items.remove(item_index);
            remove_if_empty(layout, section_index, eager);
            if let Some(stash) = stash {
                state.stash.make_mut(revision).insert(stash, vec![item]);
            }
            drop_stale_selection(state, revision);
        }
        Mutation::ReplaceItem {
            section_index,
            item_index,
            items,
            stash,
            used_stashes,
        } => {
            check_item(&state.layout, section_index, item_index)?;
            for used in &used_stashes {
                if !state.stash.contains_key(used) {
                    return Err(ReducerError::MissingStash(used.clone()));
                }
            }
            let mut remaining = (*state.layout).clone();
            let previous = remaining.sections[section_index].items.remove(item_index);
            ensure_unique_refs(&remaining, items.iter())?;
            insert_all(&mut remaining.sections[section_index].items, item_index, items);
            state.layout.replace(remaining, revision);

            if let Some(stash) = &stash {
                state
                    .stash
                    .make_mut(revision)
                    .insert(stash.clone(), vec![previous]);
            }
            consume_stashes(state, &used_stashes, stash.as_ref(), revision)?;
            drop_stale_selection(state, revision);
        }
        Mutation::ChangeWidgetHeader { widget_ref, title } => {
            let widget = widget_mut(state, &widget_ref, revision)?;
            if !widget.set_title(title) {
                return Err(unsupported(widget_ref, "headers"));
            }
        }
        Mutation::ChangeWidgetDescription {
            widget_ref,
            description,
        } => {
            let widget = widget_mut(state, &widget_ref, revision)?;
            if !widget.set_description(description) {
                return Err(unsupported(widget_ref, "descriptions"));
            }
        }
        Mutation::ChangeWidgetFilterSettings {
            widget_ref,
            ignore_filters,
            date_dataset,
        } => {
            let widget = widget_mut(state, &widget_ref, revision)?;
            if !widget.set_filter_settings(ignore_filters, date_dataset) {
                return Err(unsupported(widget_ref, "filter settings"));
            }
        }
        Mutation::ChangeKpiMeasure {
            widget_ref,
            measure,
            title,
        } => match widget_mut(state, &widget_ref, revision)? {
            Widget::Kpi(kpi) => {
                kpi.measure = measure;
                kpi.title = title;
            }
            _ => return Err(unsupported(widget_ref, "measures")),
        },
        Mutation::ChangeKpiComparison {
            widget_ref,
            comparison,
        } => match widget_mut(state, &widget_ref, revision)? {
            Widget::Kpi(kpi) => kpi.comparison = comparison,
            _ => return Err(unsupported(widget_ref, "comparisons")),
        },
        Mutation::ChangeInsightProperties {
            widget_ref,
            properties,
        } => match widget_mut(state, &widget_ref, revision)? {
            Widget::Insight(insight) => insight.properties = properties,
            _ => return Err(unsupported(widget_ref, "properties")),
        },
        Mutation::SetDateFilter { filter } => {
            let mut filter = Some(filter);
            normalize_date_filter(&mut filter);
            state.filter_context.make_mut(revision).date_filter = filter;
        }
        Mutation::AddAttributeFilter { index, filter } => {
            if state
                .filter_context
                .index_of(&filter.local_identifier)
                .is_some()
            {
                return Err(ReducerError::DuplicateFilter(filter.local_identifier));
            }
            let position =
                resolve_insert_index(state.filter_context.attribute_filters.len(), index)
                    .ok_or(ReducerError::FilterIndexOutOfRange(i64::from(index)))?;
            state
                .filter_context
                .make_mut(revision)
                .attribute_filters
                .insert(position, filter);
        }
        Mutation::RemoveAttributeFilters { local_identifiers } => {
            for local_identifier in &local_identifiers {
                if state.filter_context.index_of(local_identifier).is_none() {
                    return Err(ReducerError::FilterNotFound(local_identifier.clone()));
                }
            }
            let removed: HashSet<&String> = local_identifiers.iter().collect();
            let filters = &mut state.filter_context.make_mut(revision).attribute_filters;
            filters.retain(|filter| !removed.contains(&filter.local_identifier));
            for filter in filters.iter_mut() {
                filter.parents.retain(|parent| !removed.contains(parent));
            }
        }
        Mutation::MoveAttributeFilter {
            local_identifier,
            index,
        } => {
            let from = state
                .filter_context
                .index_of(&local_identifier)
                .ok_or_else(|| ReducerError::FilterNotFound(local_identifier.clone()))?;
            let target =
                resolve_insert_index(state.filter_context.attribute_filters.len() - 1, index)
                    .ok_or(ReducerError::FilterIndexOutOfRange(i64::from(index)))?;
            let filters = &mut state.filter_context.make_mut(revision).attribute_filters;
            let filter = filters.remove(from);
            filters.insert(target, filter);
        }
        Mutation::ChangeAttributeFilterSelection {
            local_identifier,
            elements,
            negative_selection,
        } => {
            let position = state
                .filter_context
                .index_of(&local_identifier)
                .ok_or(ReducerError::FilterNotFound(local_identifier))?;
            let filter = &mut state.filter_context.make_mut(revision).attribute_filters[position];
            filter.elements = elements;
            filter.negative_selection = negative_selection;
        }
        Mutation::SetAttributeFilterParents {
            local_identifier,
            parents,
        } => {
            let position = state
                .filter_context
                .index_of(&local_identifier)
                .ok_or(ReducerError::FilterNotFound(local_identifier))?;
            state.filter_context.make_mut(revision).attribute_filters[position].parents = parents;
        }
        Mutation::SelectWidget { widget_ref } => {
            state.ui.make_mut(revision).selected_widget = widget_ref;
        }
        Mutation::SetFilterBarExpanded { expanded } => {
            state.ui.make_mut(revision).filter_bar_expanded = expanded;
        }
    }
    Ok(())
}

/// Clears the selected widget once it is no longer part of the layout.
fn drop_stale_selection(state: &mut DashboardState, revision: u64) {
    let stale = match &state.ui.selected_widget {
        Some(selected) => !state
            .layout
            .items()
            .any(|item| item.widget.find(selected).is_some()),
        None => false,
    };
    if stale {
        state.ui.make_mut(revision).selected_widget = None;
    }
}

fn insert_all(items: &mut Vec<Item>, position: usize, incoming: Vec<Item>) {
    let tail = items.split_off(position);
    items.extend(incoming);
    items.extend(tail);
}

fn normalize_date_filter(filter: &mut Option<DateFilter>) {
    if matches!(filter, Some(DateFilter::AllTime)) {
        *filter = None;
    }
}

fn check_section(layout: &Layout, index: usize) -> Result<(), ReducerError> {
    if index < layout.sections.len() {
        Ok(())
    } else {
        Err(ReducerError::SectionOutOfRange {
            index: index as i64,
        })
    }
}

fn check_item(layout: &Layout, section_index: usize, item_index: usize) -> Result<(), ReducerError> {
    check_section(layout, section_index)?;
    if item_index < layout.sections[section_index].items.len() {
        Ok(())
    } else {
        Err(ReducerError::ItemOutOfRange {
            section_index,
            item_index: item_index as i64,
        })
    }
}

/// Drops the section when it lost its last item, unless it is persistent or `eager` is off.
fn remove_if_empty(layout: &mut Layout, section_index: usize, eager: bool) {
    let section = &layout.sections[section_index];
    if eager && section.items.is_empty() && !section.persistent {
        layout.sections.remove(section_index);
    }
}

/// Fails when any incoming widget ref, nested ones included, is already taken.
fn ensure_unique_refs<'a>(
    layout: &Layout,
    incoming: impl Iterator<Item = &'a Item>,
) -> Result<(), ReducerError> {
    let mut taken: HashSet<&ObjRef> = layout
        .items()
        .flat_map(|item| item.widget.all_refs())
        .collect();
    for item in incoming {
        for widget_ref in item.widget.all_refs() {
            if !taken.insert(widget_ref) {
                return Err(ReducerError::DuplicateRef(widget_ref.clone()));
            }
        }
    }
    Ok(())
}

/// Deletes the used stash entries, keeping `keep` when a replace stashed into the entry it consumed.
fn consume_stashes(
    state: &mut DashboardState,
    used: &[StashId],
    keep: Option<&StashId>,
    revision: u64,
) -> Result<(), ReducerError> {
    if used.is_empty() {
        return Ok(());
    }
    for stash in used {
        if !state.stash.contains_key(stash) {
            return Err(ReducerError::MissingStash(stash.clone()));
        }
    }
    let stashes = state.stash.make_mut(revision);
    for stash in used {
        if Some(stash) != keep {
            stashes.remove(stash);
        }
    }
    Ok(())
}

fn widget_mut<'a>(
    state: &'a mut DashboardState,
    widget_ref: &ObjRef,
    revision: u64,
) -> Result<&'a mut Widget, ReducerError> {
    let exists = state
        .layout
        .items()
        .any(|item| item.widget.find(widget_ref).is_some());
    if !exists {
        return Err(ReducerError::WidgetNotFound(widget_ref.clone()));
    }
    state
        .layout
        .make_mut(revision)
        .sections
        .iter_mut()
        .flat_map(|section| section.items.iter_mut())
        .find_map(|item| item.widget.find_mut(widget_ref))
        .ok_or_else(|| ReducerError::WidgetNotFound(widget_ref.clone()))
}

fn unsupported(widget: ObjRef, operation: &str) -> ReducerError {
    ReducerError::UnsupportedWidget {
        widget,
        operation: operation.to_string(),
    }
}

#[cfg(test)]
#[path = "../tests/reducers_tests.rs"]
mod tests;
