use super::*;
use shared::domain::{InsightWidget, Section, Widget};

fn insight_item(id: &str) -> Item {
    Item::new(Widget::Insight(InsightWidget {
        widget_ref: ObjRef::local(id),
        title: id.to_string(),
        description: String::new(),
        insight: ObjRef::identifier(format!("insight-{id}")),
        ignore_filters: Vec::new(),
        date_dataset: None,
        properties: None,
    }))
}

fn hydrated(refs: &[&str]) -> DashboardStore {
    let store = DashboardStore::default();
    let mut definition = DashboardDefinition::default();
    definition.descriptor.title = "Sales".to_string();
    definition.layout.sections.push(Section {
        items: refs.iter().map(|id| insight_item(id)).collect(),
        ..Section::default()
    });
    store
        .apply(Mutation::Hydrate {
            definition,
            attributes: Vec::new(),
        })
        .expect("hydrate");
    store
}

#[test]
fn untouched_slices_keep_their_allocation_and_revision() {
    let store = hydrated(&["a"]);
    let before = store.get_state();

    store
        .apply(Mutation::Rename {
            title: "Revenue".to_string(),
        })
        .expect("rename");
    let after = store.get_state();

    assert_eq!(after.descriptor.title, "Revenue");
    assert!(after.descriptor.revision() > before.descriptor.revision());
    assert!(after.layout.ptr_eq(&before.layout));
    assert_eq!(after.layout.revision(), before.layout.revision());
    assert!(after.filter_context.ptr_eq(&before.filter_context));
}

#[test]
fn snapshots_are_unaffected_by_later_mutations() {
    let store = hydrated(&["a"]);
    let snapshot = store.get_state();

    store
        .apply(Mutation::RemoveItem {
            section_index: 0,
            item_index: 0,
            stash: None,
            eager: true,
        })
        .expect("remove");

    assert_eq!(snapshot.layout.sections.len(), 1);
    assert!(store.get_state().layout.sections.is_empty());
}

#[test]
fn failed_mutation_leaves_state_and_revision_untouched() {
    let store = hydrated(&["a"]);
    let before = store.get_state();
    let revision = store.revision();

    let result = store.apply(Mutation::RemoveSection {
        index: 3,
        stash: None,
    });

    assert_eq!(result, Err(ReducerError::SectionOutOfRange { index: 3 }));
    assert_eq!(store.revision(), revision);
    assert_eq!(store.get_state(), before);
}

#[test]
fn listeners_see_the_committed_state() {
    let store = hydrated(&["a"]);
    let titles = Rc::new(RefCell::new(Vec::new()));
    let subscription = {
        let titles = titles.clone();
        store.subscribe(move |state| titles.borrow_mut().push(state.descriptor.title.clone()))
    };

    store
        .apply(Mutation::Rename {
            title: "Q1".to_string(),
        })
        .expect("rename");
    subscription.unsubscribe();
    store
        .apply(Mutation::Rename {
            title: "Q2".to_string(),
        })
        .expect("rename");

    assert_eq!(*titles.borrow(), vec!["Q1".to_string()]);
}

#[test]
fn mutating_from_a_listener_is_rejected() {
    let store = Rc::new(hydrated(&["a"]));
    let nested = Rc::new(RefCell::new(None));
    let _subscription = {
        let weak = Rc::downgrade(&store);
        let nested = nested.clone();
        store.subscribe(move |_| {
            if let Some(store) = weak.upgrade() {
                *nested.borrow_mut() =
                    Some(store.apply(Mutation::SetFilterBarExpanded { expanded: true }));
            }
        })
    };

    store
        .apply(Mutation::Rename {
            title: "x".to_string(),
        })
        .expect("outer mutation");

    assert_eq!(*nested.borrow(), Some(Err(ReducerError::Reentrant)));
    assert!(!store.get_state().ui.filter_bar_expanded);
}

#[test]
fn dirty_tracking_follows_the_persisted_baseline() {
    let store = hydrated(&["a"]);
    assert!(!store.get_state().is_dirty());

    store
        .apply(Mutation::Rename {
            title: "Edited".to_string(),
        })
        .expect("rename");
    assert!(store.get_state().is_dirty());

    let definition = store.get_state().definition();
    store
        .apply(Mutation::MarkSaved { definition })
        .expect("mark saved");
    assert!(!store.get_state().is_dirty());
}

#[test]
fn reset_restores_the_persisted_definition_and_clears_transient_state() {
    let store = hydrated(&["a", "b"]);
    let persisted = store.get_state().definition();
    store
        .apply(Mutation::RemoveItem {
            section_index: 0,
            item_index: 0,
            stash: Some(StashId::new("s")),
            eager: true,
        })
        .expect("remove");
    store
        .apply(Mutation::SelectWidget {
            widget_ref: Some(ObjRef::local("b")),
        })
        .expect("select");

    store.apply(Mutation::ResetToPersisted).expect("reset");

    let state = store.get_state();
    assert_eq!(state.definition(), persisted);
    assert!(state.stash.is_empty());
    assert_eq!(*state.ui, UiState::default());
}

#[test]
fn catalog_cache_resolves_every_display_form() {
    let cache = CatalogCache::from_attributes(vec![CatalogAttribute {
        attribute: ObjRef::identifier("attr.region"),
        title: "Region".to_string(),
        default_display_form: ObjRef::identifier("label.region"),
        display_forms: vec![ObjRef::identifier("label.region.code")],
    }]);

    assert_eq!(cache.len(), 1);
    for form in ["label.region", "label.region.code"] {
        let attribute = cache
            .attribute_by_display_form(&ObjRef::identifier(form))
            .expect("attribute");
        assert_eq!(attribute.title, "Region");
    }
    assert!(cache
        .attribute_by_display_form(&ObjRef::identifier("label.other"))
        .is_none());
}
