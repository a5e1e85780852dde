use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    domain::{
        AttributeFilter, CorrelationId, DashboardDefinition, DashboardDescriptor, DateFilter, Item,
        KpiComparison, ObjRef, Section, SectionHeader, ShareStatus, StashId,
    },
    error::{ApiError, ErrorCode},
};

/// Index accepted by insertion commands; `-1` addresses the end of the sequence.
pub type RelativeIndex = i32;

pub const LAST_INDEX: RelativeIndex = -1;

/// One entry of an add/replace command: a literal item or every item held in a stash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemDefinition {
    Item(Item),
    Stash(StashId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all_fields = "camelCase")]
pub enum CommandKind {
    #[serde(rename = "GDC.DASH/CMD.INITIALIZE")]
    Initialize {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dashboard: Option<ObjRef>,
    },
    #[serde(rename = "GDC.DASH/CMD.SAVE")]
    Save {},
    #[serde(rename = "GDC.DASH/CMD.SAVEAS")]
    SaveAs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default)]
        switch_to_copy: bool,
    },
    #[serde(rename = "GDC.DASH/CMD.RENAME")]
    Rename { title: String },
    #[serde(rename = "GDC.DASH/CMD.CHANGE_METADATA")]
    ChangeMetadata {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tags: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        share_status: Option<ShareStatus>,
    },
    #[serde(rename = "GDC.DASH/CMD.RESET")]
    Reset {},
    #[serde(rename = "GDC.DASH/CMD.FLUID_LAYOUT.ADD_SECTION")]
    AddSection {
        index: RelativeIndex,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header: Option<SectionHeader>,
        #[serde(default)]
        persistent: bool,
        #[serde(default)]
        items: Vec<ItemDefinition>,
    },
    #[serde(rename = "GDC.DASH/CMD.FLUID_LAYOUT.REMOVE_SECTION")]
    RemoveSection {
        index: RelativeIndex,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stash: Option<StashId>,
    },
    #[serde(rename = "GDC.DASH/CMD.FLUID_LAYOUT.MOVE_SECTION")]
    MoveSection {
        section_index: usize,
        to_index: RelativeIndex,
    },
    #[serde(rename = "GDC.DASH/CMD.FLUID_LAYOUT.CHANGE_SECTION_HEADER")]
    ChangeSectionHeader {
        index: usize,
        header: SectionHeader,
        #[serde(default)]
        merge: bool,
    },
    #[serde(rename = "GDC.DASH/CMD.FLUID_LAYOUT.ADD_ITEMS")]
    AddItems {
        section_index: usize,
        item_index: RelativeIndex,
        items: Vec<ItemDefinition>,
    },
    #[serde(rename = "GDC.DASH/CMD.FLUID_LAYOUT.MOVE_ITEM")]
    MoveItem {
        section_index: usize,
        item_index: usize,
        to_section_index: usize,
        to_item_index: RelativeIndex,
        /// Drop the source section when the move empties it.
        #[serde(default = "eager_default")]
        eager: bool,
    },
    #[serde(rename = "GDC.DASH/CMD.FLUID_LAYOUT.REMOVE_ITEM")]
    RemoveItem {
        section_index: usize,
        item_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stash: Option<StashId>,
        #[serde(default = "eager_default")]
        eager: bool,
    },
    #[serde(rename = "GDC.DASH/CMD.FLUID_LAYOUT.REMOVE_ITEM_BY_WIDGET_REF")]
    RemoveItemByWidgetRef {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stash: Option<StashId>,
    },
    #[serde(rename = "GDC.DASH/CMD.FLUID_LAYOUT.REPLACE_ITEM")]
    ReplaceItem {
        section_index: usize,
        item_index: usize,
        items: Vec<ItemDefinition>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stash: Option<StashId>,
    },
    #[serde(rename = "GDC.DASH/CMD.UNDO")]
    Undo {},
    #[serde(rename = "GDC.DASH/CMD.REDO")]
    Redo {},
    #[serde(rename = "GDC.DASH/CMD.WIDGET.CHANGE_HEADER")]
    ChangeWidgetHeader {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        title: String,
    },
    #[serde(rename = "GDC.DASH/CMD.WIDGET.CHANGE_DESCRIPTION")]
    ChangeWidgetDescription {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        description: String,
    },
    #[serde(rename = "GDC.DASH/CMD.WIDGET.CHANGE_FILTER_SETTINGS")]
    ChangeWidgetFilterSettings {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        #[serde(default)]
        ignore_filters: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date_dataset: Option<ObjRef>,
    },
    #[serde(rename = "GDC.DASH/CMD.KPI_WIDGET.CHANGE_MEASURE")]
    ChangeKpiWidgetMeasure {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        measure: ObjRef,
        /// New header; `None` keeps the current one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<KpiTitle>,
    },
    #[serde(rename = "GDC.DASH/CMD.KPI_WIDGET.CHANGE_COMPARISON")]
    ChangeKpiWidgetComparison {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        comparison: KpiComparison,
    },
    #[serde(rename = "GDC.DASH/CMD.INSIGHT_WIDGET.CHANGE_PROPERTIES")]
    ChangeInsightWidgetProperties {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        /// `None` removes the widget's own properties.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<Value>,
    },
    #[serde(rename = "GDC.DASH/CMD.FILTER_CONTEXT.DATE_FILTER.CHANGE_SELECTION")]
    ChangeDateFilterSelection { filter: DateFilter },
    #[serde(rename = "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.ADD")]
    AddAttributeFilter {
        index: RelativeIndex,
        display_form: ObjRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        local_identifier: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default = "negative_selection_default")]
        negative_selection: bool,
        #[serde(default)]
        elements: Vec<String>,
        #[serde(default)]
        parents: Vec<String>,
    },
    #[serde(rename = "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.REMOVE")]
    RemoveAttributeFilters { local_identifiers: Vec<String> },
    #[serde(rename = "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.MOVE")]
    MoveAttributeFilter {
        local_identifier: String,
        index: RelativeIndex,
    },
    #[serde(rename = "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.CHANGE_SELECTION")]
    ChangeAttributeFilterSelection {
        local_identifier: String,
        #[serde(default)]
        elements: Vec<String>,
        negative_selection: bool,
    },
    #[serde(rename = "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.SET_PARENT")]
    SetAttributeFilterParents {
        local_identifier: String,
        #[serde(default)]
        parents: Vec<String>,
    },
    #[serde(rename = "GDC.DASH/CMD.UI.SELECT_WIDGET")]
    SelectWidget {
        #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
        widget_ref: Option<ObjRef>,
    },
    #[serde(rename = "GDC.DASH/CMD.UI.SET_FILTER_BAR_EXPANDED")]
    SetFilterBarExpanded { expanded: bool },
    /// Any type string outside the built-in set; only runs if a handler is registered for `name`.
    #[serde(skip)]
    Custom { name: String, payload: Value },
}

/// Header applied together with a KPI measure change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiTitle {
    Text(String),
    /// Use the measure's catalog title.
    FromMeasure,
}

fn eager_default() -> bool {
    true
}

fn negative_selection_default() -> bool {
    true
}

pub const COMMAND_TYPES: &[&str] = &[
    "GDC.DASH/CMD.INITIALIZE",
    "GDC.DASH/CMD.SAVE",
    "GDC.DASH/CMD.SAVEAS",
    "GDC.DASH/CMD.RENAME",
    "GDC.DASH/CMD.CHANGE_METADATA",
    "GDC.DASH/CMD.RESET",
    "GDC.DASH/CMD.FLUID_LAYOUT.ADD_SECTION",
    "GDC.DASH/CMD.FLUID_LAYOUT.REMOVE_SECTION",
    "GDC.DASH/CMD.FLUID_LAYOUT.MOVE_SECTION",
    "GDC.DASH/CMD.FLUID_LAYOUT.CHANGE_SECTION_HEADER",
    "GDC.DASH/CMD.FLUID_LAYOUT.ADD_ITEMS",
    "GDC.DASH/CMD.FLUID_LAYOUT.MOVE_ITEM",
    "GDC.DASH/CMD.FLUID_LAYOUT.REMOVE_ITEM",
    "GDC.DASH/CMD.FLUID_LAYOUT.REMOVE_ITEM_BY_WIDGET_REF",
    "GDC.DASH/CMD.FLUID_LAYOUT.REPLACE_ITEM",
    "GDC.DASH/CMD.UNDO",
    "GDC.DASH/CMD.REDO",
    "GDC.DASH/CMD.WIDGET.CHANGE_HEADER",
    "GDC.DASH/CMD.WIDGET.CHANGE_DESCRIPTION",
    "GDC.DASH/CMD.WIDGET.CHANGE_FILTER_SETTINGS",
    "GDC.DASH/CMD.KPI_WIDGET.CHANGE_MEASURE",
    "GDC.DASH/CMD.KPI_WIDGET.CHANGE_COMPARISON",
    "GDC.DASH/CMD.INSIGHT_WIDGET.CHANGE_PROPERTIES",
    "GDC.DASH/CMD.FILTER_CONTEXT.DATE_FILTER.CHANGE_SELECTION",
    "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.ADD",
    "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.REMOVE",
    "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.MOVE",
    "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.CHANGE_SELECTION",
    "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.SET_PARENT",
    "GDC.DASH/CMD.UI.SELECT_WIDGET",
    "GDC.DASH/CMD.UI.SET_FILTER_BAR_EXPANDED",
];

impl CommandKind {
    pub fn command_type(&self) -> &str {
        match self {
            Self::Initialize { .. } => "GDC.DASH/CMD.INITIALIZE",
            Self::Save {} => "GDC.DASH/CMD.SAVE",
            Self::SaveAs { .. } => "GDC.DASH/CMD.SAVEAS",
            Self::Rename { .. } => "GDC.DASH/CMD.RENAME",
            Self::ChangeMetadata { .. } => "GDC.DASH/CMD.CHANGE_METADATA",
            Self::Reset {} => "GDC.DASH/CMD.RESET",
            Self::AddSection { .. } => "GDC.DASH/CMD.FLUID_LAYOUT.ADD_SECTION",
            Self::RemoveSection { .. } => "GDC.DASH/CMD.FLUID_LAYOUT.REMOVE_SECTION",
            Self::MoveSection { .. } => "GDC.DASH/CMD.FLUID_LAYOUT.MOVE_SECTION",
            Self::ChangeSectionHeader { .. } => "GDC.DASH/CMD.FLUID_LAYOUT.CHANGE_SECTION_HEADER",
            Self::AddItems { .. } => "GDC.DASH/CMD.FLUID_LAYOUT.ADD_ITEMS",
            Self::MoveItem { .. } => "GDC.DASH/CMD.FLUID_LAYOUT.MOVE_ITEM",
            Self::RemoveItem { .. } => "GDC.DASH/CMD.FLUID_LAYOUT.REMOVE_ITEM",
            Self::RemoveItemByWidgetRef { .. } => {
                "GDC.DASH/CMD.FLUID_LAYOUT.REMOVE_ITEM_BY_WIDGET_REF"
            }
            Self::ReplaceItem { .. } => "GDC.DASH/CMD.FLUID_LAYOUT.REPLACE_ITEM",
            Self::Undo {} => "GDC.DASH/CMD.UNDO",
            Self::Redo {} => "GDC.DASH/CMD.REDO",
            Self::ChangeWidgetHeader { .. } => "GDC.DASH/CMD.WIDGET.CHANGE_HEADER",
            Self::ChangeWidgetDescription { .. } => "GDC.DASH/CMD.WIDGET.CHANGE_DESCRIPTION",
            Self::ChangeWidgetFilterSettings { .. } => "GDC.DASH/CMD.WIDGET.CHANGE_FILTER_SETTINGS",
            Self::ChangeKpiWidgetMeasure { .. } => "GDC.DASH/CMD.KPI_WIDGET.CHANGE_MEASURE",
            Self::ChangeKpiWidgetComparison { .. } => "GDC.DASH/CMD.KPI_WIDGET.CHANGE_COMPARISON",
            Self::ChangeInsightWidgetProperties { .. } => {
                "GDC.DASH/CMD.INSIGHT_WIDGET.CHANGE_PROPERTIES"
            }
            Self::ChangeDateFilterSelection { .. } => {
                "GDC.DASH/CMD.FILTER_CONTEXT.DATE_FILTER.CHANGE_SELECTION"
            }
            Self::AddAttributeFilter { .. } => "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.ADD",
            Self::RemoveAttributeFilters { .. } => {
                "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.REMOVE"
            }
            Self::MoveAttributeFilter { .. } => {
                "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.MOVE"
            }
            Self::ChangeAttributeFilterSelection { .. } => {
                "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.CHANGE_SELECTION"
            }
            Self::SetAttributeFilterParents { .. } => {
                "GDC.DASH/CMD.FILTER_CONTEXT.ATTRIBUTE_FILTER.SET_PARENT"
            }
            Self::SelectWidget { .. } => "GDC.DASH/CMD.UI.SELECT_WIDGET",
            Self::SetFilterBarExpanded { .. } => "GDC.DASH/CMD.UI.SET_FILTER_BAR_EXPANDED",
            Self::Custom { name, .. } => name.as_str(),
        }
    }

    pub fn is_builtin_type(command_type: &str) -> bool {
        COMMAND_TYPES.contains(&command_type)
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("command must be a JSON object")]
    NotAnObject,
    #[error("command has no string `type` field")]
    MissingType,
    #[error("`correlationId` must be a string")]
    InvalidCorrelationId,
    #[error("invalid payload for {command_type}: {message}")]
    InvalidPayload {
        command_type: String,
        message: String,
    },
    #[error("failed to serialize command: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl WireError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Serialize(_) => ErrorCode::Internal,
            _ => ErrorCode::InvalidPayload,
        }
    }
}

impl From<&WireError> for ApiError {
    fn from(value: &WireError) -> Self {
        ApiError::new(value.code(), value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    pub correlation_id: Option<CorrelationId>,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn command_type(&self) -> &str {
        self.kind.command_type()
    }

    /// `{ type, payload, correlationId? }`
    pub fn to_wire(&self) -> Result<Value, WireError> {
        let mut object = match &self.kind {
            CommandKind::Custom { name, payload } => {
                let mut object = Map::new();
                object.insert("type".to_string(), Value::String(name.clone()));
                object.insert("payload".to_string(), payload.clone());
                object
            }
            kind => match serde_json::to_value(kind)? {
                Value::Object(object) => object,
                _ => return Err(WireError::NotAnObject),
            },
        };
        if let Some(correlation_id) = &self.correlation_id {
            object.insert(
                "correlationId".to_string(),
                Value::String(correlation_id.0.clone()),
            );
        }
        Ok(Value::Object(object))
    }

    /// Parses a wire-shaped command. Unknown types become [`CommandKind::Custom`];
    /// a known type whose payload does not match its schema is an error.
    pub fn from_wire(value: Value) -> Result<Self, WireError> {
        let Value::Object(mut object) = value else {
            return Err(WireError::NotAnObject);
        };
        let command_type = match object.remove("type") {
            Some(Value::String(command_type)) => command_type,
            _ => return Err(WireError::MissingType),
        };
        let correlation_id = match object.remove("correlationId") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(CorrelationId(id)),
            Some(_) => return Err(WireError::InvalidCorrelationId),
        };
        let payload = match object.remove("payload") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(payload) => payload,
        };

        let kind = if CommandKind::is_builtin_type(&command_type) {
            let mut tagged = Map::new();
            tagged.insert("type".to_string(), Value::String(command_type.clone()));
            tagged.insert("payload".to_string(), payload);
            serde_json::from_value(Value::Object(tagged)).map_err(|err| {
                WireError::InvalidPayload {
                    command_type: command_type.clone(),
                    message: err.to_string(),
                }
            })?
        } else {
            CommandKind::Custom {
                name: command_type,
                payload,
            }
        };

        Ok(Self {
            kind,
            correlation_id,
        })
    }

    /// Correlation id of a wire command that may otherwise fail to parse.
    pub fn peek_correlation_id(value: &Value) -> Option<CorrelationId> {
        value
            .get("correlationId")
            .and_then(Value::as_str)
            .map(CorrelationId::new)
    }

    pub fn peek_type(value: &Value) -> Option<&str> {
        value.get("type").and_then(Value::as_str)
    }
}

impl From<CommandKind> for Command {
    fn from(kind: CommandKind) -> Self {
        Self::new(kind)
    }
}

pub fn initialize(dashboard: Option<ObjRef>) -> Command {
    CommandKind::Initialize { dashboard }.into()
}

pub fn add_section(index: RelativeIndex, items: Vec<ItemDefinition>) -> Command {
    CommandKind::AddSection {
        index,
        header: None,
        persistent: false,
        items,
    }
    .into()
}

pub fn add_section_item(section_index: usize, item_index: RelativeIndex, item: Item) -> Command {
    CommandKind::AddItems {
        section_index,
        item_index,
        items: vec![ItemDefinition::Item(item)],
    }
    .into()
}

pub fn move_section_item(
    section_index: usize,
    item_index: usize,
    to_section_index: usize,
    to_item_index: RelativeIndex,
) -> Command {
    CommandKind::MoveItem {
        section_index,
        item_index,
        to_section_index,
        to_item_index,
        eager: true,
    }
    .into()
}

pub fn remove_section_item(section_index: usize, item_index: usize) -> Command {
    CommandKind::RemoveItem {
        section_index,
        item_index,
        stash: None,
        eager: true,
    }
    .into()
}

pub fn remove_section_item_by_widget_ref(widget_ref: ObjRef) -> Command {
    CommandKind::RemoveItemByWidgetRef {
        widget_ref,
        stash: None,
    }
    .into()
}

pub fn undo() -> Command {
    CommandKind::Undo {}.into()
}

pub fn redo() -> Command {
    CommandKind::Redo {}.into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all_fields = "camelCase")]
pub enum EventKind {
    #[serde(rename = "GDC.DASH/EVT.COMMAND.STARTED")]
    CommandStarted { command_type: String },
    #[serde(rename = "GDC.DASH/EVT.COMMAND.FAILED")]
    CommandFailed {
        command_type: String,
        error: ApiError,
    },
    #[serde(rename = "GDC.DASH/EVT.COMMAND.REJECTED")]
    CommandRejected {
        command_type: String,
        reason: ApiError,
    },
    #[serde(rename = "GDC.DASH/EVT.COMMAND.CANCELLED")]
    CommandCancelled { command_type: String },
    #[serde(rename = "GDC.DASH/EVT.COMMAND.INVALID_ARGUMENTS")]
    InvalidArgumentsProvided {
        command_type: String,
        message: String,
    },
    #[serde(rename = "GDC.DASH/EVT.INITIALIZED")]
    Initialized {
        dashboard: DashboardDefinition,
        catalog_attributes: usize,
    },
    #[serde(rename = "GDC.DASH/EVT.SAVED")]
    Saved {
        #[serde(rename = "ref")]
        dashboard_ref: ObjRef,
        new_dashboard: bool,
    },
    #[serde(rename = "GDC.DASH/EVT.COPY_SAVED")]
    CopySaved {
        #[serde(rename = "ref")]
        dashboard_ref: ObjRef,
        switched: bool,
    },
    #[serde(rename = "GDC.DASH/EVT.RENAMED")]
    Renamed { title: String },
    #[serde(rename = "GDC.DASH/EVT.METADATA_CHANGED")]
    MetadataChanged { descriptor: DashboardDescriptor },
    #[serde(rename = "GDC.DASH/EVT.RESET")]
    Reset { dashboard: DashboardDefinition },
    #[serde(rename = "GDC.DASH/EVT.FLUID_LAYOUT.SECTION_ADDED")]
    SectionAdded { index: usize, section: Section },
    #[serde(rename = "GDC.DASH/EVT.FLUID_LAYOUT.SECTION_REMOVED")]
    SectionRemoved {
        index: usize,
        section: Section,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stash: Option<StashId>,
    },
    #[serde(rename = "GDC.DASH/EVT.FLUID_LAYOUT.SECTION_MOVED")]
    SectionMoved {
        section: Section,
        from_index: usize,
        to_index: usize,
    },
    #[serde(rename = "GDC.DASH/EVT.FLUID_LAYOUT.SECTION_HEADER_CHANGED")]
    SectionHeaderChanged { index: usize, header: SectionHeader },
    #[serde(rename = "GDC.DASH/EVT.FLUID_LAYOUT.ITEMS_ADDED")]
    ItemsAdded {
        section_index: usize,
        item_index: usize,
        items: Vec<Item>,
        section_created: bool,
    },
    #[serde(rename = "GDC.DASH/EVT.FLUID_LAYOUT.ITEM_MOVED")]
    ItemMoved {
        item: Item,
        from_section_index: usize,
        from_item_index: usize,
        to_section_index: usize,
        to_item_index: usize,
        section_removed: bool,
    },
    #[serde(rename = "GDC.DASH/EVT.FLUID_LAYOUT.ITEM_REMOVED")]
    ItemRemoved {
        section_index: usize,
        item_index: usize,
        item: Item,
        section_removed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stash: Option<StashId>,
    },
    #[serde(rename = "GDC.DASH/EVT.FLUID_LAYOUT.ITEM_REPLACED")]
    ItemReplaced {
        section_index: usize,
        item_index: usize,
        previous: Item,
        items: Vec<Item>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stash: Option<StashId>,
    },
    #[serde(rename = "GDC.DASH/EVT.UNDONE")]
    Undone { command_type: String },
    #[serde(rename = "GDC.DASH/EVT.REDONE")]
    Redone { command_type: String },
    #[serde(rename = "GDC.DASH/EVT.WIDGET.HEADER_CHANGED")]
    WidgetHeaderChanged {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        title: String,
    },
    #[serde(rename = "GDC.DASH/EVT.WIDGET.DESCRIPTION_CHANGED")]
    WidgetDescriptionChanged {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        description: String,
    },
    #[serde(rename = "GDC.DASH/EVT.WIDGET.FILTER_SETTINGS_CHANGED")]
    WidgetFilterSettingsChanged {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        ignore_filters: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date_dataset: Option<ObjRef>,
    },
    #[serde(rename = "GDC.DASH/EVT.KPI_WIDGET.MEASURE_CHANGED")]
    KpiWidgetMeasureChanged {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        measure: ObjRef,
        title: String,
    },
    #[serde(rename = "GDC.DASH/EVT.KPI_WIDGET.COMPARISON_CHANGED")]
    KpiWidgetComparisonChanged {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        comparison: KpiComparison,
    },
    #[serde(rename = "GDC.DASH/EVT.INSIGHT_WIDGET.PROPERTIES_CHANGED")]
    InsightWidgetPropertiesChanged {
        #[serde(rename = "ref")]
        widget_ref: ObjRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<Value>,
    },
    #[serde(rename = "GDC.DASH/EVT.FILTER_CONTEXT.DATE_FILTER.SELECTION_CHANGED")]
    DateFilterSelectionChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<DateFilter>,
    },
    #[serde(rename = "GDC.DASH/EVT.FILTER_CONTEXT.ATTRIBUTE_FILTER.ADDED")]
    AttributeFilterAdded { index: usize, filter: AttributeFilter },
    #[serde(rename = "GDC.DASH/EVT.FILTER_CONTEXT.ATTRIBUTE_FILTER.REMOVED")]
    AttributeFilterRemoved { removed: Vec<AttributeFilter> },
    #[serde(rename = "GDC.DASH/EVT.FILTER_CONTEXT.ATTRIBUTE_FILTER.MOVED")]
    AttributeFilterMoved {
        local_identifier: String,
        from_index: usize,
        to_index: usize,
    },
    #[serde(rename = "GDC.DASH/EVT.FILTER_CONTEXT.ATTRIBUTE_FILTER.SELECTION_CHANGED")]
    AttributeFilterSelectionChanged {
        local_identifier: String,
        elements: Vec<String>,
        negative_selection: bool,
    },
    #[serde(rename = "GDC.DASH/EVT.FILTER_CONTEXT.ATTRIBUTE_FILTER.PARENT_CHANGED")]
    AttributeFilterParentChanged {
        local_identifier: String,
        parents: Vec<String>,
    },
    #[serde(rename = "GDC.DASH/EVT.UI.WIDGET_SELECTED")]
    WidgetSelected {
        #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
        widget_ref: Option<ObjRef>,
    },
    #[serde(rename = "GDC.DASH/EVT.UI.FILTER_BAR_EXPANDED_CHANGED")]
    FilterBarExpandedChanged { expanded: bool },
    /// Success event of a custom handler.
    #[serde(skip)]
    Custom { name: String, payload: Value },
}

impl EventKind {
    pub fn event_type(&self) -> &str {
        match self {
            Self::CommandStarted { .. } => "GDC.DASH/EVT.COMMAND.STARTED",
            Self::CommandFailed { .. } => "GDC.DASH/EVT.COMMAND.FAILED",
            Self::CommandRejected { .. } => "GDC.DASH/EVT.COMMAND.REJECTED",
            Self::CommandCancelled { .. } => "GDC.DASH/EVT.COMMAND.CANCELLED",
            Self::InvalidArgumentsProvided { .. } => "GDC.DASH/EVT.COMMAND.INVALID_ARGUMENTS",
            Self::Initialized { .. } => "GDC.DASH/EVT.INITIALIZED",
            Self::Saved { .. } => "GDC.DASH/EVT.SAVED",
            Self::CopySaved { .. } => "GDC.DASH/EVT.COPY_SAVED",
            Self::Renamed { .. } => "GDC.DASH/EVT.RENAMED",
            Self::MetadataChanged { .. } => "GDC.DASH/EVT.METADATA_CHANGED",
            Self::Reset { .. } => "GDC.DASH/EVT.RESET",
            Self::SectionAdded { .. } => "GDC.DASH/EVT.FLUID_LAYOUT.SECTION_ADDED",
            Self::SectionRemoved { .. } => "GDC.DASH/EVT.FLUID_LAYOUT.SECTION_REMOVED",
            Self::SectionMoved { .. } => "GDC.DASH/EVT.FLUID_LAYOUT.SECTION_MOVED",
            Self::SectionHeaderChanged { .. } => "GDC.DASH/EVT.FLUID_LAYOUT.SECTION_HEADER_CHANGED",
            Self::ItemsAdded { .. } => "GDC.DASH/EVT.FLUID_LAYOUT.ITEMS_ADDED",
            Self::ItemMoved { .. } => "GDC.DASH/EVT.FLUID_LAYOUT.ITEM_MOVED",
            Self::ItemRemoved { .. } => "GDC.DASH/EVT.FLUID_LAYOUT.ITEM_REMOVED",
            Self::ItemReplaced { .. } => "GDC.DASH/EVT.FLUID_LAYOUT.ITEM_REPLACED",
            Self::Undone { .. } => "GDC.DASH/EVT.UNDONE",
            Self::Redone { .. } => "GDC.DASH/EVT.REDONE",
            Self::WidgetHeaderChanged { .. } => "GDC.DASH/EVT.WIDGET.HEADER_CHANGED",
            Self::WidgetDescriptionChanged { .. } => "GDC.DASH/EVT.WIDGET.DESCRIPTION_CHANGED",
            Self::WidgetFilterSettingsChanged { .. } => {
                "GDC.DASH/EVT.WIDGET.FILTER_SETTINGS_CHANGED"
            }
            Self::KpiWidgetMeasureChanged { .. } => "GDC.DASH/EVT.KPI_WIDGET.MEASURE_CHANGED",
            Self::KpiWidgetComparisonChanged { .. } => "GDC.DASH/EVT.KPI_WIDGET.COMPARISON_CHANGED",
            Self::InsightWidgetPropertiesChanged { .. } => {
                "GDC.DASH/EVT.INSIGHT_WIDGET.PROPERTIES_CHANGED"
            }
            Self::DateFilterSelectionChanged { .. } => {
                "GDC.DASH/EVT.FILTER_CONTEXT.DATE_FILTER.SELECTION_CHANGED"
            }
            Self::AttributeFilterAdded { .. } => {
                "GDC.DASH/EVT.FILTER_CONTEXT.ATTRIBUTE_FILTER.ADDED"
            }
            Self::AttributeFilterRemoved { .. } => {
                "GDC.DASH/EVT.FILTER_CONTEXT.ATTRIBUTE_FILTER.REMOVED"
            }
            Self::AttributeFilterMoved { .. } => {
                "GDC.DASH/EVT.FILTER_CONTEXT.ATTRIBUTE_FILTER.MOVED"
            }
            Self::AttributeFilterSelectionChanged { .. } => {
                "GDC.DASH/EVT.FILTER_CONTEXT.ATTRIBUTE_FILTER.SELECTION_CHANGED"
            }
            Self::AttributeFilterParentChanged { .. } => {
                "GDC.DASH/EVT.FILTER_CONTEXT.ATTRIBUTE_FILTER.PARENT_CHANGED"
            }
            Self::WidgetSelected { .. } => "GDC.DASH/EVT.UI.WIDGET_SELECTED",
            Self::FilterBarExpandedChanged { .. } => "GDC.DASH/EVT.UI.FILTER_BAR_EXPANDED_CHANGED",
            Self::Custom { name, .. } => name.as_str(),
        }
    }

    /// Every event except `COMMAND.STARTED` ends its command.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::CommandStarted { .. })
    }

    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            Self::CommandStarted { .. }
                | Self::CommandFailed { .. }
                | Self::CommandRejected { .. }
                | Self::CommandCancelled { .. }
                | Self::InvalidArgumentsProvided { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    pub workspace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_ref: Option<ObjRef>,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardEvent {
    pub kind: EventKind,
    pub correlation_id: CorrelationId,
    pub ctx: EventContext,
}

impl DashboardEvent {
    pub fn event_type(&self) -> &str {
        self.kind.event_type()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// `{ type, payload, correlationId, ctx }`
    pub fn to_wire(&self) -> Result<Value, WireError> {
        let mut object = match &self.kind {
            EventKind::Custom { name, payload } => {
                let mut object = Map::new();
                object.insert("type".to_string(), Value::String(name.clone()));
                object.insert("payload".to_string(), payload.clone());
                object
            }
            kind => match serde_json::to_value(kind)? {
                Value::Object(object) => object,
                _ => return Err(WireError::NotAnObject),
            },
        };
        object.insert(
            "correlationId".to_string(),
            Value::String(self.correlation_id.0.clone()),
        );
        object.insert("ctx".to_string(), serde_json::to_value(&self.ctx)?);
        Ok(Value::Object(object))
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
