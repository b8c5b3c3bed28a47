//! Layout Snapshot Model
//!
//! Typed view of a declarative workspace snapshot: the analytics model
//! (metrics, visualizations, dashboards, filter contexts) and the logical
//! data model. Object `content` is kept as raw JSON so it can be stored
//! verbatim; typed views over it are decoded on demand. Explicit `null`
//! reads the same as an absent field.

pub mod traversal;
pub mod widget;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub use traversal::{walk, LayoutWidget, TraversalConfig, Widgets};
pub use widget::{
    DashboardContent, IgnoredFilter, InsightWidget, Item, Layout, NestedLayout, OtherWidget,
    PluginLink, RichTextWidget, Section, SwitcherWidget, Tab, Widget, WidgetFilterSettings,
};

/// `null` and absent both decode to the field's default
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A workspace layout snapshot (`{"analytics": {...}, "ldm": {...}}`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutSnapshot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub analytics: AnalyticsModel,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ldm: LogicalModel,
}

/// Analytics part of a snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsModel {
    #[serde(default, deserialize_with = "null_as_default")]
    pub metrics: Vec<MetricObject>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub analytical_dashboards: Vec<DashboardObject>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub visualization_objects: Vec<VisualizationObject>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filter_contexts: Vec<FilterContextObject>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dashboard_plugins: Vec<PluginObject>,
}

// =============================================================================
// References
// =============================================================================

/// `{"id": "...", "type": "..."}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// `{"identifier": {...}}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    #[serde(default, deserialize_with = "null_as_default")]
    pub identifier: Identifier,
}

impl ObjectRef {
    pub fn id(&self) -> Option<&str> {
        let id = self.identifier.id.as_str();
        (!id.is_empty()).then_some(id)
    }

    pub fn kind(&self) -> Option<&str> {
        self.identifier.kind.as_deref()
    }
}

// =============================================================================
// Analytics objects
// =============================================================================

/// Metric as it appears in the analytics model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricObject {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: MetricContent,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_hidden: bool,
    /// Authoritative validity, absent in layout snapshots
    #[serde(default)]
    pub are_relations_valid: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricContent {
    #[serde(default)]
    pub maql: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// Visualization (insight) as it appears in the analytics model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationObject {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_hidden: bool,
    #[serde(default)]
    pub are_relations_valid: Option<bool>,
}

impl VisualizationObject {
    /// Typed buckets and filters. Undecodable content yields an empty definition.
    pub fn definition(&self) -> VisualizationDefinition {
        self.decode_definition().unwrap_or_default()
    }

    /// Strict variant of [`definition`](Self::definition); `null` content is empty
    pub fn decode_definition(&self) -> Result<VisualizationDefinition, serde_json::Error> {
        decode_definition(&self.content)
    }
}

/// Decode a visualization `content` value
pub fn decode_definition(content: &Value) -> Result<VisualizationDefinition, serde_json::Error> {
    if content.is_null() {
        return Ok(VisualizationDefinition::default());
    }
    serde_json::from_value(content.clone())
}

/// Dashboard as it appears in the analytics model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardObject {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_hidden: bool,
    #[serde(default)]
    pub are_relations_valid: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub permissions: Vec<DashboardPermission>,
}

impl DashboardObject {
    /// Decode the layout tree once for traversal
    pub fn decode(&self) -> Result<Dashboard, serde_json::Error> {
        let content = if self.content.is_null() {
            DashboardContent::default()
        } else {
            serde_json::from_value(self.content.clone())?
        };
        Ok(Dashboard {
            id: self.id.clone(),
            content,
        })
    }
}

/// Dashboard id plus its decoded content, the unit of traversal
#[derive(Debug, Clone, Default)]
pub struct Dashboard {
    pub id: String,
    pub content: DashboardContent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardPermission {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub assignee: Option<Identifier>,
    #[serde(default)]
    pub assignee_rule: Option<AssigneeRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssigneeRule {
    #[serde(default, rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterContextObject {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginObject {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default)]
    pub content: Value,
}

// =============================================================================
// Visualization definition
// =============================================================================

/// Reference-bearing parts of a visualization's content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationDefinition {
    #[serde(default)]
    pub visualization_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub buckets: Vec<Bucket>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filters: Vec<VisualizationFilter>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attribute_filter_configs: BTreeMap<String, AttributeFilterConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    #[serde(default)]
    pub local_identifier: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<BucketItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketItem {
    #[serde(default)]
    pub measure: Option<Measure>,
    #[serde(default)]
    pub attribute: Option<AttributeItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    #[serde(default)]
    pub local_identifier: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub definition: Option<MeasureDefinition>,
}

impl Measure {
    /// Object a simple measure aggregates. Arithmetic and derived measures have none.
    pub fn item(&self) -> Option<&ObjectRef> {
        self.definition
            .as_ref()?
            .measure_definition
            .as_ref()?
            .item
            .as_ref()
    }

    pub fn label(&self) -> Option<&str> {
        self.alias
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.title.as_deref().filter(|s| !s.is_empty()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureDefinition {
    #[serde(default)]
    pub measure_definition: Option<SimpleMeasure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimpleMeasure {
    #[serde(default)]
    pub item: Option<ObjectRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeItem {
    #[serde(default)]
    pub local_identifier: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub display_form: Option<ObjectRef>,
}

/// One entry of `filters`; only attribute filters carry label references
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationFilter {
    #[serde(default)]
    pub positive_attribute_filter: Option<AttributeFilter>,
    #[serde(default)]
    pub negative_attribute_filter: Option<AttributeFilter>,
}

impl VisualizationFilter {
    pub fn display_form(&self) -> Option<&ObjectRef> {
        self.positive_attribute_filter
            .as_ref()
            .or(self.negative_attribute_filter.as_ref())
            .and_then(|f| f.display_form.as_ref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeFilter {
    #[serde(default)]
    pub display_form: Option<ObjectRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeFilterConfig {
    #[serde(default)]
    pub display_as_label: Option<ObjectRef>,
}

// =============================================================================
// Logical data model
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalModel {
    #[serde(default, deserialize_with = "null_as_default")]
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub grain: Vec<Identifier>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attributes: Vec<LdmAttribute>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub facts: Vec<LdmFact>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub references: Vec<LdmReference>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub workspace_data_filter_columns: Vec<WorkspaceDataFilterColumn>,
    #[serde(default)]
    pub data_source_table_id: Option<DataSourceTable>,
    #[serde(default)]
    pub sql: Option<SqlSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdmAttribute {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_column: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_column_data_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<LdmLabel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdmLabel {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_column: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_column_data_type: String,
    #[serde(default)]
    pub value_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdmFact {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_column: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_column_data_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdmReference {
    #[serde(default, deserialize_with = "null_as_default")]
    pub identifier: Identifier,
    #[serde(default, deserialize_with = "null_as_default")]
    pub multivalue: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sources: Vec<ReferenceSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub column: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDataFilterColumn {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceTable {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data_source_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlSource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub statement: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data_source_id: String,
}
