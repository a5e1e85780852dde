use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(CorrelationId);
string_id!(StashId);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Id of the `sequence`-th command delegated from this one.
    pub fn derive(&self, sequence: u32) -> Self {
        Self(format!("{}.{sequence}", self.0))
    }
}

/// Reference to a backend object or a not-yet-persisted local widget.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjRef {
    Identifier(String),
    Uri(String),
    Local(String),
}

impl ObjRef {
    pub fn identifier(value: impl Into<String>) -> Self {
        Self::Identifier(value.into())
    }

    pub fn uri(value: impl Into<String>) -> Self {
        Self::Uri(value.into())
    }

    pub fn local(value: impl Into<String>) -> Self {
        Self::Local(value.into())
    }

    /// Stable string key, used wherever refs index a map.
    pub fn key(&self) -> String {
        match self {
            Self::Identifier(id) => format!("id:{id}"),
            Self::Uri(uri) => format!("uri:{uri}"),
            Self::Local(id) => format!("local:{id}"),
        }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareStatus {
    #[default]
    Private,
    Shared,
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DashboardDescriptor {
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub dashboard_ref: Option<ObjRef>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub share_status: ShareStatus,
    #[serde(default)]
    pub is_locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiComparison {
    #[default]
    None,
    PreviousPeriod,
    PreviousYear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightWidget {
    #[serde(rename = "ref")]
    pub widget_ref: ObjRef,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub insight: ObjRef,
    #[serde(default)]
    pub ignore_filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_dataset: Option<ObjRef>,
    /// Visualization properties overriding the insight's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiWidget {
    #[serde(rename = "ref")]
    pub widget_ref: ObjRef,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub measure: ObjRef,
    #[serde(default)]
    pub comparison: KpiComparison,
    #[serde(default)]
    pub ignore_filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_dataset: Option<ObjRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichTextWidget {
    #[serde(rename = "ref")]
    pub widget_ref: ObjRef,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationSwitcherWidget {
    #[serde(rename = "ref")]
    pub widget_ref: ObjRef,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub visualizations: Vec<InsightWidget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutWidget {
    #[serde(rename = "ref")]
    pub widget_ref: ObjRef,
    #[serde(default)]
    pub layout: Layout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Widget {
    Insight(InsightWidget),
    Kpi(KpiWidget),
    RichText(RichTextWidget),
    VisualizationSwitcher(VisualizationSwitcherWidget),
    Layout(LayoutWidget),
}

impl Widget {
    pub fn widget_ref(&self) -> &ObjRef {
        match self {
            Self::Insight(w) => &w.widget_ref,
            Self::Kpi(w) => &w.widget_ref,
            Self::RichText(w) => &w.widget_ref,
            Self::VisualizationSwitcher(w) => &w.widget_ref,
            Self::Layout(w) => &w.widget_ref,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Insight(w) => Some(&w.title),
            Self::Kpi(w) => Some(&w.title),
            Self::VisualizationSwitcher(w) => Some(&w.title),
            Self::RichText(_) | Self::Layout(_) => None,
        }
    }

    /// Returns false when the widget kind has no header.
    pub fn set_title(&mut self, title: String) -> bool {
        match self {
            Self::Insight(w) => w.title = title,
            Self::Kpi(w) => w.title = title,
            Self::VisualizationSwitcher(w) => w.title = title,
            Self::RichText(_) | Self::Layout(_) => return false,
        }
        true
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Insight(w) => Some(&w.description),
            Self::Kpi(w) => Some(&w.description),
            _ => None,
        }
    }

    pub fn set_description(&mut self, description: String) -> bool {
        match self {
            Self::Insight(w) => w.description = description,
            Self::Kpi(w) => w.description = description,
            _ => return false,
        }
        true
    }

    pub fn filter_settings(&self) -> Option<(&[String], Option<&ObjRef>)> {
        match self {
            Self::Insight(w) => Some((&w.ignore_filters, w.date_dataset.as_ref())),
            Self::Kpi(w) => Some((&w.ignore_filters, w.date_dataset.as_ref())),
            _ => None,
        }
    }

    pub fn set_filter_settings(
        &mut self,
        ignore_filters: Vec<String>,
        date_dataset: Option<ObjRef>,
    ) -> bool {
        match self {
            Self::Insight(w) => {
                w.ignore_filters = ignore_filters;
                w.date_dataset = date_dataset;
            }
            Self::Kpi(w) => {
                w.ignore_filters = ignore_filters;
                w.date_dataset = date_dataset;
            }
            _ => return false,
        }
        true
    }

    /// Insight refs this widget renders, including switcher alternatives and nested layouts.
    pub fn insight_refs(&self) -> Vec<&ObjRef> {
        let mut refs = Vec::new();
        self.collect_insights(&mut refs);
        refs
    }

    fn collect_insights<'a>(&'a self, out: &mut Vec<&'a ObjRef>) {
        match self {
            Self::Insight(w) => out.push(&w.insight),
            Self::VisualizationSwitcher(w) => {
                out.extend(w.visualizations.iter().map(|v| &v.insight));
            }
            Self::Layout(w) => {
                for item in w.layout.items() {
                    item.widget.collect_insights(out);
                }
            }
            Self::Kpi(_) | Self::RichText(_) => {}
        }
    }

    /// This widget's ref followed by the refs of every widget nested inside it.
    pub fn all_refs(&self) -> Vec<&ObjRef> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a ObjRef>) {
        out.push(self.widget_ref());
        match self {
            Self::VisualizationSwitcher(w) => {
                out.extend(w.visualizations.iter().map(|v| &v.widget_ref));
            }
            Self::Layout(w) => {
                for item in w.layout.items() {
                    item.widget.collect_refs(out);
                }
            }
            _ => {}
        }
    }

    pub fn find(&self, widget_ref: &ObjRef) -> Option<&Widget> {
        if self.widget_ref() == widget_ref {
            return Some(self);
        }
        match self {
            Self::Layout(w) => w.layout.items().find_map(|item| item.widget.find(widget_ref)),
            _ => None,
        }
    }

    pub fn find_mut(&mut self, widget_ref: &ObjRef) -> Option<&mut Widget> {
        if self.widget_ref() == widget_ref {
            return Some(self);
        }
        match self {
            Self::Layout(w) => w
                .layout
                .sections
                .iter_mut()
                .flat_map(|section| section.items.iter_mut())
                .find_map(|item| item.widget.find_mut(widget_ref)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSize {
    pub grid_width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_height: Option<u32>,
}

impl Default for ItemSize {
    fn default() -> Self {
        Self {
            grid_width: 6,
            grid_height: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub size: ItemSize,
    pub widget: Widget,
}

impl Item {
    pub fn new(widget: Widget) -> Self {
        Self {
            size: ItemSize::default(),
            widget,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectionHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SectionHeader {
    /// Fields present in `other` win; missing ones keep the current value.
    pub fn merged_with(&self, other: &SectionHeader) -> SectionHeader {
        SectionHeader {
            title: other.title.clone().or_else(|| self.title.clone()),
            description: other
                .description
                .clone()
                .or_else(|| self.description.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub header: SectionHeader,
    /// Persistent sections survive losing their last item.
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Layout {
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.sections.iter().flat_map(|section| section.items.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateGranularity {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DateFilter {
    AllTime,
    Relative {
        granularity: DateGranularity,
        from: i32,
        to: i32,
    },
    Absolute {
        from: NaiveDate,
        to: NaiveDate,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub local_identifier: String,
    pub display_form: ObjRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default = "default_negative_selection")]
    pub negative_selection: bool,
    #[serde(default)]
    pub elements: Vec<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

fn default_negative_selection() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_filter: Option<DateFilter>,
    #[serde(default)]
    pub attribute_filters: Vec<AttributeFilter>,
}

impl FilterContext {
    pub fn index_of(&self, local_identifier: &str) -> Option<usize> {
        self.attribute_filters
            .iter()
            .position(|filter| filter.local_identifier == local_identifier)
    }

    pub fn attribute_filter(&self, local_identifier: &str) -> Option<&AttributeFilter> {
        self.attribute_filters
            .iter()
            .find(|filter| filter.local_identifier == local_identifier)
    }
}

/// The persisted part of a dashboard: what `save` sends to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DashboardDefinition {
    pub descriptor: DashboardDescriptor,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub filter_context: FilterContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "ref")]
    pub insight_ref: ObjRef,
    pub title: String,
    pub visualization_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogAttribute {
    pub attribute: ObjRef,
    pub title: String,
    pub default_display_form: ObjRef,
    #[serde(default)]
    pub display_forms: Vec<ObjRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMeasure {
    pub measure: ObjRef,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl CatalogAttribute {
    pub fn has_display_form(&self, display_form: &ObjRef) -> bool {
        &self.default_display_form == display_form || self.display_forms.contains(display_form)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDefinition {
    #[serde(default)]
    pub measures: Vec<ObjRef>,
    #[serde(default)]
    pub attributes: Vec<ObjRef>,
    #[serde(default)]
    pub filters: Vec<AttributeFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub headers: Vec<String>,
    pub data: Vec<Vec<f64>>,
}
