use std::collections::HashMap;

use serde::Serialize;
use shared::{
    domain::{Item, Layout, ObjRef, Section, Widget},
    protocol::RelativeIndex,
};

use crate::store::resolve_insert_index;

/// Position of a top-level item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ItemPath {
    pub section_index: usize,
    pub item_index: usize,
}

/// Read-only navigation over a layout snapshot.
///
/// Every widget ref, nested ones included, is indexed up front so lookups by ref are
/// constant time. Out-of-range lookups return `None`.
pub struct LayoutFacade<'a> {
    layout: &'a Layout,
    by_ref: HashMap<&'a ObjRef, ItemPath>,
}

impl<'a> LayoutFacade<'a> {
    pub fn new(layout: &'a Layout) -> Self {
        let mut by_ref = HashMap::new();
        for (section_index, section) in layout.sections.iter().enumerate() {
            for (item_index, item) in section.items.iter().enumerate() {
                let path = ItemPath {
                    section_index,
                    item_index,
                };
                for widget_ref in item.widget.all_refs() {
                    by_ref.entry(widget_ref).or_insert(path);
                }
            }
        }
        Self { layout, by_ref }
    }

    pub fn layout(&self) -> &'a Layout {
        self.layout
    }

    pub fn section_count(&self) -> usize {
        self.layout.sections.len()
    }

    /// Total number of top-level items across all sections.
    pub fn item_count(&self) -> usize {
        self.layout
            .sections
            .iter()
            .map(|section| section.items.len())
            .sum()
    }

    pub fn section_at(&self, index: usize) -> Option<&'a Section> {
        self.layout.sections.get(index)
    }

    pub fn item_at(&self, section_index: usize, item_index: usize) -> Option<&'a Item> {
        self.section_at(section_index)?.items.get(item_index)
    }

    /// Path of the top-level item that holds `widget_ref`, possibly nested inside it.
    pub fn find_by_ref(&self, widget_ref: &ObjRef) -> Option<ItemPath> {
        self.by_ref.get(widget_ref).copied()
    }

    pub fn contains_ref(&self, widget_ref: &ObjRef) -> bool {
        self.by_ref.contains_key(widget_ref)
    }

    pub fn widget_by_ref(&self, widget_ref: &ObjRef) -> Option<&'a Widget> {
        let path = self.find_by_ref(widget_ref)?;
        self.item_at(path.section_index, path.item_index)?
            .widget
            .find(widget_ref)
    }

    /// Every widget ref in layout order, nested refs following their container.
    pub fn widget_refs(&self) -> Vec<&'a ObjRef> {
        self.layout
            .items()
            .flat_map(|item| item.widget.all_refs())
            .collect()
    }

    /// Resolves a relative insertion index into `section_index`, or into the section list
    /// when `section_index` is `None`.
    pub fn resolve_insert_index(
        &self,
        section_index: Option<usize>,
        index: RelativeIndex,
    ) -> Option<usize> {
        let len = match section_index {
            Some(section_index) => self.section_at(section_index)?.items.len(),
            None => self.section_count(),
        };
        resolve_insert_index(len, index)
    }
}

#[cfg(test)]
#[path = "tests/layout_tests.rs"]
mod tests;
