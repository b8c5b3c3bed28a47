//! Entity Processing
//!
//! Flattens snapshot objects into table rows. Rows serialize to the CSV
//! columns directly; raw JSON `content` is kept for the database only.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::layout::{
    Dataset, DashboardObject, FilterContextObject, LogicalModel, MetricObject, PluginObject,
    VisualizationObject,
};

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceRow {
    pub workspace_id: String,
    pub workspace_name: String,
    pub is_parent: bool,
    pub parent_workspace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub metric_id: String,
    pub workspace_id: String,
    pub title: String,
    pub description: String,
    pub tags: String,
    pub maql: Option<String>,
    pub format: Option<String>,
    /// `None` until computed by enrichment
    pub is_valid: Option<bool>,
    pub is_hidden: bool,
    #[serde(skip_serializing)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualizationRow {
    pub visualization_id: String,
    pub workspace_id: String,
    pub title: String,
    pub description: String,
    pub tags: String,
    pub visualization_url: Option<String>,
    pub is_valid: Option<bool>,
    pub is_hidden: bool,
    #[serde(skip_serializing)]
    pub content: Option<String>,
}

/// Measure of a visualization, `label` is the alias or title shown
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct VisualizationMetricRow {
    pub visualization_id: String,
    pub metric_id: String,
    pub workspace_id: String,
    pub label: Option<String>,
}

/// Attribute display form of a visualization
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct VisualizationAttributeRow {
    pub visualization_id: String,
    pub attribute_id: String,
    pub workspace_id: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardRow {
    pub dashboard_id: String,
    pub workspace_id: String,
    pub title: String,
    pub description: String,
    pub tags: String,
    pub is_valid: Option<bool>,
    pub is_hidden: bool,
    pub filter_context_id: Option<String>,
    #[serde(skip_serializing)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DashboardPermissionRow {
    pub dashboard_id: String,
    pub workspace_id: String,
    pub assignee_id: String,
    /// `user`, `userGroup`, or `rule` for assignee rules
    pub assignee_type: String,
    pub permission_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginRow {
    pub plugin_id: String,
    pub workspace_id: String,
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub version: Option<String>,
    #[serde(skip_serializing)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LdmDatasetRow {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    pub description: String,
    pub tags: String,
    pub attributes_count: usize,
    pub facts_count: usize,
    pub references_count: usize,
    pub workspace_data_filter_columns_count: usize,
    pub total_columns: usize,
    pub data_source_id: String,
    pub source_table: String,
    pub source_table_path: String,
}

/// One LDM column: `attribute`, `fact`, `reference` or `workspace_data_filter`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LdmColumnRow {
    pub dataset_id: String,
    pub dataset_name: String,
    pub title: String,
    pub description: String,
    pub id: String,
    pub tags: String,
    pub data_type: String,
    pub source_column: String,
    #[serde(rename = "type")]
    pub column_type: String,
    /// `Yes` when the attribute is part of the dataset grain
    pub grain: String,
    pub reference_to_id: String,
    pub reference_to_title: String,
    pub workspace_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LdmLabelRow {
    pub label_id: String,
    pub attribute_id: String,
    pub dataset_id: String,
    pub title: String,
    pub description: String,
    pub tags: String,
    pub source_column: String,
    pub data_type: String,
    pub value_type: Option<String>,
    pub workspace_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterContextRow {
    pub filter_context_id: String,
    pub workspace_id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing)]
    pub content: Option<String>,
}

/// One filter of a filter context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterContextFieldRow {
    pub filter_context_id: String,
    pub workspace_id: String,
    pub filter_index: usize,
    /// `dateFilter` or `attributeFilter`
    pub filter_type: String,
    pub local_identifier: Option<String>,
    pub display_form_id: Option<String>,
    pub title: Option<String>,
    pub negative_selection: Option<bool>,
    pub selection_mode: Option<String>,
    pub date_granularity: Option<String>,
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
    pub date_type: Option<String>,
    pub attribute_elements_count: Option<usize>,
}

/// Rows of one workspace snapshot
#[derive(Debug, Clone, Default)]
pub struct EntityRows {
    pub metrics: Vec<MetricRow>,
    pub visualizations: Vec<VisualizationRow>,
    pub visualization_metrics: Vec<VisualizationMetricRow>,
    pub visualization_attributes: Vec<VisualizationAttributeRow>,
    pub dashboards: Vec<DashboardRow>,
    pub dashboard_permissions: Vec<DashboardPermissionRow>,
    pub plugins: Vec<PluginRow>,
    pub ldm_datasets: Vec<LdmDatasetRow>,
    pub ldm_columns: Vec<LdmColumnRow>,
    pub ldm_labels: Vec<LdmLabelRow>,
    pub filter_contexts: Vec<FilterContextRow>,
    pub filter_context_fields: Vec<FilterContextFieldRow>,
}

impl EntityRows {
    pub fn extend(&mut self, other: EntityRows) {
        self.metrics.extend(other.metrics);
        self.visualizations.extend(other.visualizations);
        self.visualization_metrics.extend(other.visualization_metrics);
        self.visualization_attributes.extend(other.visualization_attributes);
        self.dashboards.extend(other.dashboards);
        self.dashboard_permissions.extend(other.dashboard_permissions);
        self.plugins.extend(other.plugins);
        self.ldm_datasets.extend(other.ldm_datasets);
        self.ldm_columns.extend(other.ldm_columns);
        self.ldm_labels.extend(other.ldm_labels);
        self.filter_contexts.extend(other.filter_contexts);
        self.filter_context_fields.extend(other.filter_context_fields);
    }
}

// =============================================================================
// Processing
// =============================================================================

/// Tags sorted and rendered as a JSON array
pub fn sort_tags(tags: &[String]) -> String {
    let mut sorted: Vec<&str> = tags.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn content_json<T: Serialize>(value: &T, store: bool) -> Result<Option<String>> {
    if !store {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(value)?))
}

pub fn process_metrics(metrics: &[MetricObject], workspace_id: &str, store_content: bool) -> Result<Vec<MetricRow>> {
    metrics
        .iter()
        .map(|m| {
            Ok(MetricRow {
                metric_id: m.id.clone(),
                workspace_id: workspace_id.to_string(),
                title: m.title.clone(),
                description: m.description.clone(),
                tags: sort_tags(&m.tags),
                maql: m.content.maql.clone(),
                format: m.content.format.clone(),
                is_valid: m.are_relations_valid,
                is_hidden: m.is_hidden,
                content: content_json(m, store_content)?,
            })
        })
        .collect()
}

pub fn process_visualizations(
    visualizations: &[VisualizationObject],
    workspace_id: &str,
    store_content: bool,
) -> Result<Vec<VisualizationRow>> {
    visualizations
        .iter()
        .map(|v| {
            Ok(VisualizationRow {
                visualization_id: v.id.clone(),
                workspace_id: workspace_id.to_string(),
                title: v.title.clone(),
                description: v.description.clone(),
                tags: sort_tags(&v.tags),
                visualization_url: v
                    .content
                    .get("visualizationUrl")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                is_valid: v.are_relations_valid,
                is_hidden: v.is_hidden,
                content: content_json(v, store_content)?,
            })
        })
        .collect()
}

/// Distinct measure items per visualization; the first occurrence's label wins
pub fn process_visualization_metrics(visualizations: &[VisualizationObject], workspace_id: &str) -> Vec<VisualizationMetricRow> {
    let mut unique: BTreeMap<(String, String), Option<String>> = BTreeMap::new();

    for viz in visualizations {
        for bucket in viz.definition().buckets {
            for item in bucket.items {
                let Some(measure) = item.measure else {
                    continue;
                };
                if let Some(metric_id) = measure.item().and_then(|r| r.id()) {
                    unique
                        .entry((viz.id.clone(), metric_id.to_string()))
                        .or_insert_with(|| measure.label().map(str::to_owned));
                }
            }
        }
    }

    unique
        .into_iter()
        .map(|((visualization_id, metric_id), label)| VisualizationMetricRow {
            visualization_id,
            metric_id,
            workspace_id: workspace_id.to_string(),
            label,
        })
        .collect()
}

/// Distinct attribute display forms per visualization
pub fn process_visualization_attributes(
    visualizations: &[VisualizationObject],
    workspace_id: &str,
) -> Vec<VisualizationAttributeRow> {
    let mut unique: BTreeMap<(String, String), Option<String>> = BTreeMap::new();

    for viz in visualizations {
        for bucket in viz.definition().buckets {
            for item in bucket.items {
                let Some(attribute) = item.attribute else {
                    continue;
                };
                if let Some(attribute_id) = attribute.display_form.as_ref().and_then(|r| r.id()) {
                    unique
                        .entry((viz.id.clone(), attribute_id.to_string()))
                        .or_insert_with(|| attribute.alias.clone().filter(|a| !a.is_empty()));
                }
            }
        }
    }

    unique
        .into_iter()
        .map(|((visualization_id, attribute_id), label)| VisualizationAttributeRow {
            visualization_id,
            attribute_id,
            workspace_id: workspace_id.to_string(),
            label,
        })
        .collect()
}

pub fn process_dashboards(dashboards: &[DashboardObject], workspace_id: &str, store_content: bool) -> Result<Vec<DashboardRow>> {
    dashboards
        .iter()
        .map(|d| {
            Ok(DashboardRow {
                dashboard_id: d.id.clone(),
                workspace_id: workspace_id.to_string(),
                title: d.title.clone(),
                description: d.description.clone(),
                tags: sort_tags(&d.tags),
                is_valid: d.are_relations_valid,
                is_hidden: d.is_hidden,
                filter_context_id: d
                    .content
                    .pointer("/filterContextRef/identifier/id")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                content: content_json(&d.content, store_content)?,
            })
        })
        .collect()
}

/// Direct assignees and assignee rules, sorted by dashboard, type and assignee
pub fn process_dashboard_permissions(dashboards: &[DashboardObject], workspace_id: &str) -> Vec<DashboardPermissionRow> {
    let mut rows = Vec::new();

    for dashboard in dashboards.iter().filter(|d| !d.id.is_empty()) {
        for permission in &dashboard.permissions {
            let row = |assignee_id: &str, assignee_type: &str| DashboardPermissionRow {
                dashboard_id: dashboard.id.clone(),
                workspace_id: workspace_id.to_string(),
                assignee_id: assignee_id.to_string(),
                assignee_type: assignee_type.to_string(),
                permission_name: permission.name.clone(),
            };

            match (&permission.assignee, &permission.assignee_rule) {
                (Some(assignee), _) if !assignee.id.is_empty() => {
                    rows.push(row(&assignee.id, assignee.kind.as_deref().unwrap_or_default()));
                }
                (_, Some(rule)) if !rule.kind.is_empty() => rows.push(row(&rule.kind, "rule")),
                _ => {}
            }
        }
    }

    rows.sort_by(|a, b| {
        (&a.dashboard_id, &a.assignee_type, &a.assignee_id).cmp(&(&b.dashboard_id, &b.assignee_type, &b.assignee_id))
    });
    rows
}

pub fn process_plugins(plugins: &[PluginObject], workspace_id: &str, store_content: bool) -> Result<Vec<PluginRow>> {
    plugins
        .iter()
        .map(|p| {
            let field = |name: &str| p.content.get(name).and_then(Value::as_str).map(str::to_owned);
            Ok(PluginRow {
                plugin_id: p.id.clone(),
                workspace_id: workspace_id.to_string(),
                title: p.title.clone(),
                description: p.description.clone(),
                url: field("url"),
                version: field("version"),
                content: content_json(&p.content, store_content)?,
            })
        })
        .collect()
}

/// Datasets, their columns and attribute labels
pub fn process_ldm(
    ldm: &LogicalModel,
    workspace_id: &str,
) -> (Vec<LdmDatasetRow>, Vec<LdmColumnRow>, Vec<LdmLabelRow>) {
    let titles: BTreeMap<&str, &str> = ldm
        .datasets
        .iter()
        .map(|d| (d.id.as_str(), d.title.as_str()))
        .collect();

    let datasets = ldm.datasets.iter().map(|d| dataset_row(d, workspace_id)).collect();
    let mut columns = Vec::new();
    let mut labels = Vec::new();

    for dataset in &ldm.datasets {
        let column = |id: &str, title: &str, column_type: &str| LdmColumnRow {
            dataset_id: dataset.id.clone(),
            dataset_name: dataset.title.clone(),
            title: title.to_string(),
            description: String::new(),
            id: id.to_string(),
            tags: String::new(),
            data_type: String::new(),
            source_column: String::new(),
            column_type: column_type.to_string(),
            grain: "No".to_string(),
            reference_to_id: String::new(),
            reference_to_title: String::new(),
            workspace_id: workspace_id.to_string(),
        };

        for attr in &dataset.attributes {
            let in_grain = dataset.grain.iter().any(|g| g.id == attr.id);
            columns.push(LdmColumnRow {
                description: attr.description.clone(),
                tags: sort_tags(&attr.tags),
                data_type: attr.source_column_data_type.clone(),
                source_column: attr.source_column.clone(),
                grain: if in_grain { "Yes" } else { "No" }.to_string(),
                ..column(&attr.id, &attr.title, "attribute")
            });

            for label in &attr.labels {
                labels.push(LdmLabelRow {
                    label_id: label.id.clone(),
                    attribute_id: attr.id.clone(),
                    dataset_id: dataset.id.clone(),
                    title: label.title.clone(),
                    description: label.description.clone(),
                    tags: sort_tags(&label.tags),
                    source_column: label.source_column.clone(),
                    data_type: label.source_column_data_type.clone(),
                    value_type: label.value_type.clone(),
                    workspace_id: workspace_id.to_string(),
                });
            }
        }

        for fact in &dataset.facts {
            columns.push(LdmColumnRow {
                description: fact.description.clone(),
                tags: sort_tags(&fact.tags),
                data_type: fact.source_column_data_type.clone(),
                source_column: fact.source_column.clone(),
                ..column(&fact.id, &fact.title, "fact")
            });
        }

        for reference in &dataset.references {
            let target = reference.identifier.id.as_str();
            let source = reference.sources.first();
            let source_column = source.map(|s| s.column.as_str()).unwrap_or_default();
            columns.push(LdmColumnRow {
                data_type: source.map(|s| s.data_type.clone()).unwrap_or_default(),
                source_column: source_column.to_string(),
                reference_to_id: target.to_string(),
                reference_to_title: titles.get(target).map(|t| t.to_string()).unwrap_or_default(),
                ..column(source_column, target, "reference")
            });
        }

        for wdf in &dataset.workspace_data_filter_columns {
            columns.push(LdmColumnRow {
                data_type: wdf.data_type.clone(),
                source_column: wdf.name.clone(),
                ..column(&wdf.name, &wdf.name, "workspace_data_filter")
            });
        }
    }

    (datasets, columns, labels)
}

fn dataset_row(dataset: &Dataset, workspace_id: &str) -> LdmDatasetRow {
    let attributes_count = dataset.attributes.len();
    let facts_count = dataset.facts.len();
    let references_count = dataset.references.len();
    let wdf_count = dataset.workspace_data_filter_columns.len();

    let (data_source_id, source_table, source_table_path) = match (&dataset.data_source_table_id, &dataset.sql) {
        (Some(table), _) => (
            table.data_source_id.clone(),
            table.id.clone(),
            serde_json::to_string(&table.path).unwrap_or_default(),
        ),
        (None, Some(sql)) => (sql.data_source_id.clone(), sql.statement.clone(), "SQL Query".to_string()),
        (None, None) => (String::new(), String::new(), "SQL Query".to_string()),
    };

    LdmDatasetRow {
        id: dataset.id.clone(),
        workspace_id: workspace_id.to_string(),
        title: dataset.title.clone(),
        description: dataset.description.clone(),
        tags: sort_tags(&dataset.tags),
        attributes_count,
        facts_count,
        references_count,
        workspace_data_filter_columns_count: wdf_count,
        total_columns: attributes_count + facts_count + references_count + wdf_count,
        data_source_id,
        source_table,
        source_table_path,
    }
}

pub fn process_filter_contexts(
    filter_contexts: &[FilterContextObject],
    workspace_id: &str,
    store_content: bool,
) -> Result<Vec<FilterContextRow>> {
    filter_contexts
        .iter()
        .map(|fc| {
            Ok(FilterContextRow {
                filter_context_id: fc.id.clone(),
                workspace_id: workspace_id.to_string(),
                title: fc.title.clone(),
                description: fc.description.clone(),
                content: content_json(&fc.content, store_content)?,
            })
        })
        .collect()
}

/// One row per date or attribute filter, indexed by position
pub fn process_filter_context_fields(filter_contexts: &[FilterContextObject], workspace_id: &str) -> Vec<FilterContextFieldRow> {
    let mut rows = Vec::new();

    for fc in filter_contexts {
        let filters = fc
            .content
            .get("filters")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for (filter_index, filter) in filters.iter().enumerate() {
            let base = FilterContextFieldRow {
                filter_context_id: fc.id.clone(),
                workspace_id: workspace_id.to_string(),
                filter_index,
                filter_type: String::new(),
                local_identifier: None,
                display_form_id: None,
                title: None,
                negative_selection: None,
                selection_mode: None,
                date_granularity: None,
                date_from: None,
                date_to: None,
                date_type: None,
                attribute_elements_count: None,
            };

            if let Some(date) = filter.get("dateFilter") {
                rows.push(FilterContextFieldRow {
                    filter_type: "dateFilter".to_string(),
                    local_identifier: str_field(date, "localIdentifier"),
                    date_granularity: str_field(date, "granularity"),
                    date_from: int_field(date, "from"),
                    date_to: int_field(date, "to"),
                    date_type: str_field(date, "type"),
                    ..base
                });
            } else if let Some(attr) = filter.get("attributeFilter") {
                let elements = attr.get("attributeElements");
                let elements_count = ["uris", "values"]
                    .iter()
                    .find_map(|key| elements.and_then(|e| e.get(*key)).and_then(Value::as_array))
                    .map_or(0, Vec::len);

                rows.push(FilterContextFieldRow {
                    filter_type: "attributeFilter".to_string(),
                    local_identifier: str_field(attr, "localIdentifier"),
                    display_form_id: attr
                        .pointer("/displayForm/identifier/id")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    title: str_field(attr, "title"),
                    negative_selection: attr.get("negativeSelection").and_then(Value::as_bool),
                    selection_mode: str_field(attr, "selectionMode"),
                    attribute_elements_count: Some(elements_count),
                    ..base
                });
            }
        }
    }

    rows
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Relative date offsets arrive as numbers or numeric strings
fn int_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutSnapshot;
    use serde_json::json;

    fn snapshot() -> LayoutSnapshot {
        serde_json::from_value(json!({
            "analytics": {
                "metrics": [
                    {"id": "m1", "title": "M1", "tags": ["b", "a"], "content": {"maql": "SELECT 1", "format": "#,##0"}}
                ],
                "visualizationObjects": [{
                    "id": "v1",
                    "title": "V1",
                    "content": {
                        "visualizationUrl": "local:table",
                        "buckets": [{"items": [
                            {"measure": {"localIdentifier": "x", "alias": "Revenue!", "definition": {"measureDefinition": {"item": {"identifier": {"id": "m1", "type": "metric"}}}}}},
                            {"measure": {"localIdentifier": "y", "title": "Again", "definition": {"measureDefinition": {"item": {"identifier": {"id": "m1", "type": "metric"}}}}}},
                            {"attribute": {"localIdentifier": "z", "displayForm": {"identifier": {"id": "region.name", "type": "label"}}}}
                        ]}]
                    }
                }],
                "analyticalDashboards": [{
                    "id": "d1",
                    "title": "D1",
                    "content": {"filterContextRef": {"identifier": {"id": "fc1", "type": "filterContext"}}},
                    "permissions": [
                        {"name": "VIEW", "assigneeRule": {"type": "allWorkspaceUsers"}},
                        {"name": "EDIT", "assignee": {"id": "bob", "type": "user"}},
                        {"name": "SHARE", "assignee": {"id": "admins", "type": "userGroup"}}
                    ]
                }],
                "filterContexts": [{
                    "id": "fc1",
                    "content": {"filters": [
                        {"dateFilter": {"granularity": "GDC.time.year", "from": "-1", "to": 0, "type": "relative"}},
                        {"attributeFilter": {"localIdentifier": "af", "displayForm": {"identifier": {"id": "region.name"}}, "negativeSelection": true, "attributeElements": {"uris": ["a", "b"]}}}
                    ]}
                }]
            },
            "ldm": {"datasets": [
                {
                    "id": "orders", "title": "Orders",
                    "grain": [{"id": "order_id", "type": "attribute"}],
                    "attributes": [{"id": "order_id", "title": "Order", "sourceColumn": "ORDER_ID", "sourceColumnDataType": "STRING",
                                    "labels": [{"id": "order_id.name", "title": "Name", "sourceColumn": "NAME", "sourceColumnDataType": "STRING"}]}],
                    "facts": [{"id": "amount", "title": "Amount", "sourceColumn": "AMOUNT", "sourceColumnDataType": "NUMERIC"}],
                    "references": [{"identifier": {"id": "customers", "type": "dataset"}, "multivalue": false,
                                    "sources": [{"column": "CUSTOMER_ID", "dataType": "STRING"}]}],
                    "dataSourceTableId": {"id": "ORDERS", "dataSourceId": "dwh", "path": ["public", "ORDERS"]}
                },
                {"id": "customers", "title": "Customers", "sql": {"statement": "SELECT 1", "dataSourceId": "dwh"},
                 "workspaceDataFilterColumns": [{"name": "TENANT", "dataType": "STRING"}]}
            ]}
        }))
        .unwrap()
    }

    #[test]
    fn test_tags_sorted() {
        assert_eq!(sort_tags(&["b".to_string(), "a".to_string()]), r#"["a","b"]"#);
        assert_eq!(sort_tags(&[]), "[]");
    }

    #[test]
    fn test_metric_rows_keep_missing_validity() {
        let s = snapshot();
        let rows = process_metrics(&s.analytics.metrics, "ws", false).unwrap();
        assert_eq!(rows[0].is_valid, None);
        assert_eq!(rows[0].tags, r#"["a","b"]"#);
        assert_eq!(rows[0].content, None);
    }

    #[test]
    fn test_visualization_links_first_label_wins() {
        let s = snapshot();
        let metrics = process_visualization_metrics(&s.analytics.visualization_objects, "ws");
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].label.as_deref(), Some("Revenue!"));

        let attributes = process_visualization_attributes(&s.analytics.visualization_objects, "ws");
        assert_eq!(attributes[0].attribute_id, "region.name");
        assert_eq!(attributes[0].label, None);

        let rows = process_visualizations(&s.analytics.visualization_objects, "ws", true).unwrap();
        assert_eq!(rows[0].visualization_url.as_deref(), Some("local:table"));
        assert!(rows[0].content.is_some());
    }

    #[test]
    fn test_dashboard_permissions_sorted_with_rules() {
        let s = snapshot();
        let rows = process_dashboard_permissions(&s.analytics.analytical_dashboards, "ws");
        let got: Vec<_> = rows
            .iter()
            .map(|r| (r.assignee_type.as_str(), r.assignee_id.as_str(), r.permission_name.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("rule", "allWorkspaceUsers", "VIEW"),
                ("user", "bob", "EDIT"),
                ("userGroup", "admins", "SHARE"),
            ]
        );

        let dashboards = process_dashboards(&s.analytics.analytical_dashboards, "ws", false).unwrap();
        assert_eq!(dashboards[0].filter_context_id.as_deref(), Some("fc1"));
    }

    #[test]
    fn test_ldm_columns_and_labels() {
        let s = snapshot();
        let (datasets, columns, labels) = process_ldm(&s.ldm, "ws");

        assert_eq!(datasets[0].total_columns, 3);
        assert_eq!(datasets[0].source_table_path, r#"["public","ORDERS"]"#);
        assert_eq!(datasets[1].source_table, "SELECT 1");
        assert_eq!(datasets[1].source_table_path, "SQL Query");

        let kinds: Vec<_> = columns.iter().map(|c| (c.id.as_str(), c.column_type.as_str(), c.grain.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                ("order_id", "attribute", "Yes"),
                ("amount", "fact", "No"),
                ("CUSTOMER_ID", "reference", "No"),
                ("TENANT", "workspace_data_filter", "No"),
            ]
        );
        assert_eq!(columns[2].reference_to_title, "Customers");
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].attribute_id, "order_id");
    }

    #[test]
    fn test_filter_context_fields() {
        let s = snapshot();
        let rows = process_filter_context_fields(&s.analytics.filter_contexts, "ws");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].filter_type, "dateFilter");
        assert_eq!(rows[0].date_from, Some(-1));
        assert_eq!(rows[0].date_to, Some(0));
        assert_eq!(rows[1].filter_index, 1);
        assert_eq!(rows[1].display_form_id.as_deref(), Some("region.name"));
        assert_eq!(rows[1].negative_selection, Some(true));
        assert_eq!(rows[1].attribute_elements_count, Some(2));
    }
}
