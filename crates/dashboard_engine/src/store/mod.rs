use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    ops::Deref,
    rc::Rc,
};

use serde::{Serialize, Serializer};
use shared::domain::{
    CatalogAttribute, CatalogMeasure, DashboardDefinition, DashboardDescriptor, FilterContext, Item, Layout,
    ObjRef, StashId,
};
use thiserror::Error;
use tracing::trace;

use crate::events::{Listeners, Subscription};

mod mutation;
mod reducers;

pub use mutation::Mutation;
pub(crate) use reducers::resolve_insert_index;

/// Reference-counted subtree stamped with the store revision that last changed it.
///
/// Cloning a state snapshot only bumps reference counts, and an untouched subtree keeps
/// both its allocation and its revision across mutations.
#[derive(Debug, Clone, Default)]
pub struct Slice<T> {
    value: Rc<T>,
    revision: u64,
}

impl<T> Slice<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Rc::new(value),
            revision: 0,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// True when both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

impl<T: Clone> Slice<T> {
    pub(crate) fn make_mut(&mut self, revision: u64) -> &mut T {
        self.revision = revision;
        Rc::make_mut(&mut self.value)
    }

    pub(crate) fn replace(&mut self, value: T, revision: u64) {
        self.value = Rc::new(value);
        self.revision = revision;
    }
}

impl<T> Deref for Slice<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: PartialEq> PartialEq for Slice<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.value == other.value
    }
}

impl<T: Serialize> Serialize for Slice<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

/// Backend metadata resolved so far, keyed by `ObjRef::key()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogCache {
    pub attributes: BTreeMap<String, CatalogAttribute>,
    /// Display form key to owning attribute key.
    pub display_forms: BTreeMap<String, String>,
    pub measures: BTreeMap<String, CatalogMeasure>,
}

impl CatalogCache {
    pub fn from_attributes(attributes: Vec<CatalogAttribute>) -> Self {
        let mut cache = Self::default();
        for attribute in attributes {
            cache.insert(attribute);
        }
        cache
    }

    pub fn insert(&mut self, attribute: CatalogAttribute) {
        let key = attribute.attribute.key();
        for form in std::iter::once(&attribute.default_display_form).chain(&attribute.display_forms)
        {
            self.display_forms.insert(form.key(), key.clone());
        }
        self.attributes.insert(key, attribute);
    }

    pub fn insert_measure(&mut self, measure: CatalogMeasure) {
        self.measures.insert(measure.measure.key(), measure);
    }

    pub fn measure(&self, measure: &ObjRef) -> Option<&CatalogMeasure> {
        self.measures.get(&measure.key())
    }

    pub fn attribute_by_display_form(&self, display_form: &ObjRef) -> Option<&CatalogAttribute> {
        self.display_forms
            .get(&display_form.key())
            .and_then(|key| self.attributes.get(key))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Transient presentation state; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UiState {
    pub selected_widget: Option<ObjRef>,
    pub filter_bar_expanded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardState {
    pub descriptor: Slice<DashboardDescriptor>,
    pub layout: Slice<Layout>,
    pub filter_context: Slice<FilterContext>,
    pub catalog: Slice<CatalogCache>,
    pub ui: Slice<UiState>,
    pub stash: Slice<BTreeMap<StashId, Vec<Item>>>,
    /// Last definition loaded from or saved to the backend.
    #[serde(skip)]
    pub persisted: Slice<Option<DashboardDefinition>>,
}

impl DashboardState {
    /// The persisted part of the dashboard: descriptor, layout and filter context.
    pub fn definition(&self) -> DashboardDefinition {
        DashboardDefinition {
            descriptor: (*self.descriptor).clone(),
            layout: (*self.layout).clone(),
            filter_context: (*self.filter_context).clone(),
        }
    }

    pub fn dashboard_ref(&self) -> Option<&ObjRef> {
        self.descriptor.dashboard_ref.as_ref()
    }

    /// True when the persisted part differs from the last loaded or saved definition.
    pub fn is_dirty(&self) -> bool {
        match self.persisted.as_ref() {
            Some(persisted) => {
                persisted.descriptor != *self.descriptor
                    || persisted.layout != *self.layout
                    || persisted.filter_context != *self.filter_context
            }
            None => true,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReducerError {
    #[error("section {index} does not exist")]
    SectionOutOfRange { index: i64 },
    #[error("item {item_index} of section {section_index} does not exist")]
    ItemOutOfRange {
        section_index: usize,
        item_index: i64,
    },
    #[error("widget ref {0} is already used on this dashboard")]
    DuplicateRef(ObjRef),
    #[error("widget {0} does not exist")]
    WidgetNotFound(ObjRef),
    #[error("widget {widget} does not support {operation}")]
    UnsupportedWidget { widget: ObjRef, operation: String },
    #[error("attribute filter {0} does not exist")]
    FilterNotFound(String),
    #[error("attribute filter {0} already exists")]
    DuplicateFilter(String),
    #[error("filter index {0} is out of range")]
    FilterIndexOutOfRange(i64),
    #[error("stash {0} does not exist")]
    MissingStash(StashId),
    #[error("store mutated while a mutation was being applied")]
    Reentrant,
}

/// Single owner of the dashboard state; mutated only through [`Mutation`]s.
pub struct DashboardStore {
    state: RefCell<DashboardState>,
    revision: Cell<u64>,
    applying: Cell<bool>,
    listeners: Listeners<DashboardState>,
}

impl Default for DashboardStore {
    fn default() -> Self {
        Self::new(DashboardState::default())
    }
}

struct ApplyingGuard<'a>(&'a Cell<bool>);

impl Drop for ApplyingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl DashboardStore {
    pub fn new(initial: DashboardState) -> Self {
        Self {
            state: RefCell::new(initial),
            revision: Cell::new(0),
            applying: Cell::new(false),
            listeners: Listeners::default(),
        }
    }

    pub fn get_state(&self) -> DashboardState {
        self.state.borrow().clone()
    }

    pub fn revision(&self) -> u64 {
        self.revision.get()
    }

    /// Applies `mutation` atomically: on error the state is left untouched.
    /// Listeners run after the new state is in place; mutating from a listener is rejected.
    pub(crate) fn apply(&self, mutation: Mutation) -> Result<(), ReducerError> {
        if self.applying.get() {
            return Err(ReducerError::Reentrant);
        }
        self.applying.set(true);
        let _guard = ApplyingGuard(&self.applying);

        let revision = self.revision.get() + 1;
        let name = mutation.name();
        let mut next = self.get_state();
        reducers::reduce(&mut next, mutation, revision)?;
        *self.state.borrow_mut() = next;
        self.revision.set(revision);
        trace!(mutation = name, revision, "store mutated");

        let snapshot = self.get_state();
        self.listeners.notify(&snapshot);
        Ok(())
    }

    pub fn subscribe(&self, listener: impl Fn(&DashboardState) + 'static) -> Subscription {
        self.listeners.add(listener)
    }
}

#[cfg(test)]
#[path = "../tests/store_tests.rs"]
mod tests;
