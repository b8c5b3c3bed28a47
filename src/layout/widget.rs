//! Dashboard layout tree
//!
//! Widgets are a closed set of variants. The `type` discriminator is read
//! once per node; a widget whose body does not match its declared shape
//! degrades to [`Widget::Other`] instead of failing the dashboard.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::ObjectRef;

/// Decoded dashboard `content`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardContent {
    /// Legacy single layout
    #[serde(default)]
    pub layout: Option<Layout>,
    /// Tabbed layout, takes precedence when non-empty
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub tabs: Vec<Tab>,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub plugins: Vec<PluginLink>,
    #[serde(default)]
    pub filter_context_ref: Option<ObjectRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    #[serde(default)]
    pub local_identifier: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub layout: Layout,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Layout {
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Section {
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Item {
    #[serde(default, deserialize_with = "non_empty_widget")]
    pub widget: Option<Widget>,
}

/// `plugins[]` entry on a dashboard
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginLink {
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub plugin: ObjectRef,
}

// =============================================================================
// Widgets
// =============================================================================

/// A layout widget
#[derive(Debug, Clone, PartialEq)]
pub enum Widget {
    /// Single insight
    Insight(InsightWidget),
    /// Several insights shown one at a time
    VisualizationSwitcher(SwitcherWidget),
    /// Free-text body that may embed reference tokens
    RichText(RichTextWidget),
    /// Container with its own sections (`IDashboardLayout`)
    NestedLayout(NestedLayout),
    /// KPI, plugin and any other widget type
    Other(OtherWidget),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightWidget {
    #[serde(default)]
    pub local_identifier: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub insight: Option<ObjectRef>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(flatten)]
    pub filters: WidgetFilterSettings,
}

impl InsightWidget {
    pub fn insight_id(&self) -> Option<&str> {
        self.insight.as_ref().and_then(ObjectRef::id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitcherWidget {
    #[serde(default)]
    pub local_identifier: Option<String>,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub visualizations: Vec<InsightWidget>,
    #[serde(default)]
    pub content: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RichTextWidget {
    #[serde(default)]
    pub local_identifier: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedLayout {
    #[serde(default)]
    pub local_identifier: Option<String>,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OtherWidget {
    pub widget_type: Option<String>,
    pub local_identifier: Option<String>,
    pub content: Option<Value>,
    pub filters: WidgetFilterSettings,
}

/// Widget-level filter configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetFilterSettings {
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub ignore_dashboard_filters: Vec<IgnoredFilter>,
    #[serde(default)]
    pub date_data_set: Option<ObjectRef>,
}

/// `ignoreDashboardFilters[]` entry
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnoredFilter {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub display_form: Option<ObjectRef>,
    #[serde(default)]
    pub data_set: Option<ObjectRef>,
}

impl IgnoredFilter {
    pub fn target(&self) -> Option<&ObjectRef> {
        self.display_form.as_ref().or(self.data_set.as_ref())
    }
}

impl Widget {
    /// Decode a widget node, reading its `type` once
    pub fn from_value(value: Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
        let decoded = match kind.as_deref() {
            Some("insight") => serde_json::from_value(value.clone()).map(Widget::Insight),
            None if value.get("insight").is_some() => {
                serde_json::from_value(value.clone()).map(Widget::Insight)
            }
            Some("visualizationSwitcher") => {
                serde_json::from_value(value.clone()).map(Widget::VisualizationSwitcher)
            }
            Some("richText") => serde_json::from_value(value.clone()).map(Widget::RichText),
            Some("IDashboardLayout") => {
                serde_json::from_value(value.clone()).map(Widget::NestedLayout)
            }
            _ => return Widget::Other(OtherWidget::from_value(kind, &value)),
        };
        decoded.unwrap_or_else(|_| Widget::Other(OtherWidget::from_value(kind, &value)))
    }

    /// Type name as declared in the layout
    pub fn type_name(&self) -> &str {
        match self {
            Widget::Insight(_) => "insight",
            Widget::VisualizationSwitcher(_) => "visualizationSwitcher",
            Widget::RichText(_) => "richText",
            Widget::NestedLayout(_) => "IDashboardLayout",
            Widget::Other(other) => other.widget_type.as_deref().unwrap_or("unknown"),
        }
    }

    pub fn local_identifier(&self) -> Option<&str> {
        match self {
            Widget::Insight(w) => w.local_identifier.as_deref(),
            Widget::VisualizationSwitcher(w) => w.local_identifier.as_deref(),
            Widget::RichText(w) => w.local_identifier.as_deref(),
            Widget::NestedLayout(w) => w.local_identifier.as_deref(),
            Widget::Other(w) => w.local_identifier.as_deref(),
        }
    }

    /// The `content` field when it is a string
    pub fn text_content(&self) -> Option<&str> {
        let content = match self {
            Widget::Insight(w) => w.content.as_ref(),
            Widget::VisualizationSwitcher(w) => w.content.as_ref(),
            Widget::RichText(w) => w.content.as_ref(),
            Widget::NestedLayout(_) => None,
            Widget::Other(w) => w.content.as_ref(),
        };
        content.and_then(Value::as_str)
    }

    pub fn filter_settings(&self) -> Option<&WidgetFilterSettings> {
        match self {
            Widget::Insight(w) => Some(&w.filters),
            Widget::Other(w) => Some(&w.filters),
            _ => None,
        }
    }
}

impl OtherWidget {
    fn from_value(widget_type: Option<String>, value: &Value) -> Self {
        Self {
            widget_type,
            local_identifier: value
                .get("localIdentifier")
                .and_then(Value::as_str)
                .map(str::to_owned),
            content: value.get("content").cloned(),
            filters: serde_json::from_value(value.clone()).unwrap_or_default(),
        }
    }
}

impl<'de> Deserialize<'de> for Widget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Widget::from_value)
    }
}

/// Absent, null, empty or non-object widgets are skipped
fn non_empty_widget<'de, D>(deserializer: D) -> Result<Option<Widget>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) if !map.is_empty() => Some(Widget::from_value(Value::Object(map))),
        _ => None,
    })
}
