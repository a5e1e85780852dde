use serde_json::Value;
use shared::{
    domain::{
        AttributeFilter, CatalogAttribute, CatalogMeasure, DashboardDefinition, DateFilter, Item,
        KpiComparison, ObjRef, Section, SectionHeader, ShareStatus, StashId,
    },
    protocol::RelativeIndex,
};

/// A pure state transition. Handlers perform all I/O before committing one.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Replaces the whole dashboard; the definition also becomes the persisted baseline.
    Hydrate {
        definition: DashboardDefinition,
        attributes: Vec<CatalogAttribute>,
    },
    /// Merges metadata resolved by backend lookups into the catalog cache.
    CacheCatalog {
        attributes: Vec<CatalogAttribute>,
        measures: Vec<CatalogMeasure>,
    },
    /// Records a successful save: adopts the returned descriptor and moves the baseline.
    MarkSaved { definition: DashboardDefinition },
    ResetToPersisted,
    Rename { title: String },
    ChangeMetadata {
        description: Option<String>,
        tags: Option<Vec<String>>,
        share_status: Option<ShareStatus>,
    },
    AddSection {
        index: RelativeIndex,
        section: Section,
        used_stashes: Vec<StashId>,
    },
    RemoveSection {
        index: usize,
        stash: Option<StashId>,
    },
    MoveSection {
        from_index: usize,
        to_index: RelativeIndex,
    },
    ChangeSectionHeader {
        index: usize,
        header: SectionHeader,
    },
    AddItems {
        section_index: usize,
        item_index: RelativeIndex,
        items: Vec<Item>,
        used_stashes: Vec<StashId>,
    },
    MoveItem {
        section_index: usize,
        item_index: usize,
        to_section_index: usize,
        to_item_index: RelativeIndex,
        eager: bool,
    },
    RemoveItem {
        section_index: usize,
        item_index: usize,
        stash: Option<StashId>,
        eager: bool,
    },
    ReplaceItem {
        section_index: usize,
        item_index: usize,
        items: Vec<Item>,
        stash: Option<StashId>,
        used_stashes: Vec<StashId>,
    },
    ChangeWidgetHeader {
        widget_ref: ObjRef,
        title: String,
    },
    ChangeWidgetDescription {
        widget_ref: ObjRef,
        description: String,
    },
    ChangeWidgetFilterSettings {
        widget_ref: ObjRef,
        ignore_filters: Vec<String>,
        date_dataset: Option<ObjRef>,
    },
    ChangeKpiMeasure {
        widget_ref: ObjRef,
        measure: ObjRef,
        title: String,
    },
    ChangeKpiComparison {
        widget_ref: ObjRef,
        comparison: KpiComparison,
    },
    ChangeInsightProperties {
        widget_ref: ObjRef,
        properties: Option<Value>,
    },
    /// `AllTime` is stored as no date filter.
    SetDateFilter { filter: DateFilter },
    AddAttributeFilter {
        index: RelativeIndex,
        filter: AttributeFilter,
    },
    /// Removes the filters and drops them from every remaining filter's parents.
    RemoveAttributeFilters { local_identifiers: Vec<String> },
    MoveAttributeFilter {
        local_identifier: String,
        index: RelativeIndex,
    },
    ChangeAttributeFilterSelection {
        local_identifier: String,
        elements: Vec<String>,
        negative_selection: bool,
    },
    SetAttributeFilterParents {
        local_identifier: String,
        parents: Vec<String>,
    },
    SelectWidget { widget_ref: Option<ObjRef> },
    SetFilterBarExpanded { expanded: bool },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hydrate { .. } => "hydrate",
            Self::CacheCatalog { .. } => "cache_catalog",
            Self::MarkSaved { .. } => "mark_saved",
            Self::ResetToPersisted => "reset_to_persisted",
            Self::Rename { .. } => "rename",
            Self::ChangeMetadata { .. } => "change_metadata",
            Self::AddSection { .. } => "add_section",
            Self::RemoveSection { .. } => "remove_section",
            Self::MoveSection { .. } => "move_section",
            Self::ChangeSectionHeader { .. } => "change_section_header",
            Self::AddItems { .. } => "add_items",
            Self::MoveItem { .. } => "move_item",
            Self::RemoveItem { .. } => "remove_item",
            Self::ReplaceItem { .. } => "replace_item",
            Self::ChangeWidgetHeader { .. } => "change_widget_header",
            Self::ChangeWidgetDescription { .. } => "change_widget_description",
            Self::ChangeWidgetFilterSettings { .. } => "change_widget_filter_settings",
            Self::ChangeKpiMeasure { .. } => "change_kpi_measure",
            Self::ChangeKpiComparison { .. } => "change_kpi_comparison",
            Self::ChangeInsightProperties { .. } => "change_insight_properties",
            Self::SetDateFilter { .. } => "set_date_filter",
            Self::AddAttributeFilter { .. } => "add_attribute_filter",
            Self::RemoveAttributeFilters { .. } => "remove_attribute_filters",
            Self::MoveAttributeFilter { .. } => "move_attribute_filter",
            Self::ChangeAttributeFilterSelection { .. } => "change_attribute_filter_selection",
            Self::SetAttributeFilterParents { .. } => "set_attribute_filter_parents",
            Self::SelectWidget { .. } => "select_widget",
            Self::SetFilterBarExpanded { .. } => "set_filter_bar_expanded",
        }
    }
}
