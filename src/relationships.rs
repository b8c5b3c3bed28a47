//! Dashboard Relationships
//!
//! Merges structural references (insight widgets, visualization switchers,
//! plugins, widget filters) with references recovered from rich text into
//! deduplicated, sorted rows. Dashboards are processed in parallel; rows
//! are merged in input order and then sorted, so the result does not depend
//! on scheduling.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::diagnostics::ExtractionObserver;
use crate::extract::{ReferenceResolver, TargetKind};
use crate::layout::{walk, Dashboard, InsightWidget, LayoutWidget, TraversalConfig, Widget, WidgetFilterSettings};

// =============================================================================
// Rows
// =============================================================================

/// `dashboards_visualizations` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardVisualization {
    pub dashboard_id: String,
    pub visualization_id: String,
    /// Tab `localIdentifier`, `None` on legacy dashboards
    pub tab_id: Option<String>,
    pub from_rich_text: bool,
    pub widget_local_identifier: Option<String>,
    pub widget_type: String,
    /// Title override set on the widget
    pub widget_title: Option<String>,
    pub widget_description: Option<String>,
    /// Enclosing switcher for visualizations shown in a switcher
    pub switcher_local_identifier: Option<String>,
    pub workspace_id: String,
}

/// `dashboards_metrics` row, metrics named in rich text
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DashboardMetric {
    pub dashboard_id: String,
    pub metric_id: String,
    pub workspace_id: String,
}

/// `dashboards_plugins` row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DashboardPlugin {
    pub dashboard_id: String,
    pub plugin_id: String,
    pub workspace_id: String,
}

/// `dashboards_widget_filters` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetFilter {
    pub dashboard_id: String,
    /// Insight shown by the widget, `None` for other widget types
    pub visualization_id: Option<String>,
    pub tab_id: Option<String>,
    pub widget_local_identifier: Option<String>,
    /// `ignoreDashboardFilters` or `dateDataSet`
    pub filter_type: String,
    pub reference_type: Option<String>,
    pub reference_id: String,
    pub reference_object_type: Option<String>,
    pub workspace_id: String,
}

/// Everything extracted from a set of dashboards
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardRelationships {
    pub visualizations: Vec<DashboardVisualization>,
    pub metrics: Vec<DashboardMetric>,
    pub plugins: Vec<DashboardPlugin>,
    pub widget_filters: Vec<WidgetFilter>,
}

// =============================================================================
// Context
// =============================================================================

/// Known identifiers, built from every loaded workspace
#[derive(Debug, Clone, Default)]
pub struct KnownIdentifiers {
    pub insights: HashSet<String>,
    pub metrics: HashSet<String>,
}

/// Inputs shared by every dashboard of one workspace
pub struct ExtractionContext<'a> {
    pub workspace_id: &'a str,
    /// Scan rich text and widget content for references
    pub rich_text: bool,
    pub known: &'a KnownIdentifiers,
    pub resolver: &'a ReferenceResolver,
    pub traversal: TraversalConfig,
    pub observer: &'a dyn ExtractionObserver,
}

type VisualizationKey = (String, Option<String>, String, bool);
type FilterKey = (String, Option<String>, String, String);

/// Per-dashboard rows, keyed for deduplication
#[derive(Default)]
struct Partial {
    visualizations: BTreeMap<VisualizationKey, DashboardVisualization>,
    metrics: BTreeMap<(String, String), DashboardMetric>,
    plugins: BTreeMap<(String, String), DashboardPlugin>,
    widget_filters: BTreeMap<FilterKey, WidgetFilter>,
}

impl Partial {
    /// Keep rows of `self`, add rows of `other` not seen yet
    fn merge(mut self, other: Partial) -> Partial {
        for (key, row) in other.visualizations {
            self.visualizations.entry(key).or_insert(row);
        }
        for (key, row) in other.metrics {
            self.metrics.entry(key).or_insert(row);
        }
        for (key, row) in other.plugins {
            self.plugins.entry(key).or_insert(row);
        }
        for (key, row) in other.widget_filters {
            self.widget_filters.entry(key).or_insert(row);
        }
        self
    }

    fn add_visualization(&mut self, row: DashboardVisualization) {
        let key = (
            row.dashboard_id.clone(),
            row.tab_id.clone(),
            row.visualization_id.clone(),
            row.from_rich_text,
        );
        self.visualizations.entry(key).or_insert(row);
    }

    fn add_widget_filter(&mut self, row: WidgetFilter) {
        let key = (
            row.dashboard_id.clone(),
            row.widget_local_identifier.clone(),
            row.filter_type.clone(),
            row.reference_id.clone(),
        );
        self.widget_filters.entry(key).or_insert(row);
    }
}

// =============================================================================
// Aggregation
// =============================================================================

/// Extract all relationship rows of `dashboards` belonging to one workspace
pub fn aggregate(dashboards: &[Dashboard], ctx: &ExtractionContext<'_>) -> DashboardRelationships {
    let partials: Vec<Partial> = dashboards
        .par_iter()
        .map(|dashboard| extract_dashboard(dashboard, ctx))
        .collect();

    let merged = partials.into_iter().fold(Partial::default(), Partial::merge);

    let mut visualizations: Vec<_> = merged.visualizations.into_values().collect();
    visualizations.sort_by(|a, b| {
        (&a.dashboard_id, &a.visualization_id, a.from_rich_text, &a.tab_id)
            .cmp(&(&b.dashboard_id, &b.visualization_id, b.from_rich_text, &b.tab_id))
    });

    let mut widget_filters: Vec<_> = merged.widget_filters.into_values().collect();
    widget_filters.sort_by(|a, b| {
        (&a.dashboard_id, &a.tab_id, &a.widget_local_identifier, &a.filter_type, &a.reference_id).cmp(&(
            &b.dashboard_id,
            &b.tab_id,
            &b.widget_local_identifier,
            &b.filter_type,
            &b.reference_id,
        ))
    });

    DashboardRelationships {
        visualizations,
        metrics: merged.metrics.into_values().collect(),
        plugins: merged.plugins.into_values().collect(),
        widget_filters,
    }
}

fn extract_dashboard(dashboard: &Dashboard, ctx: &ExtractionContext<'_>) -> Partial {
    let mut partial = Partial::default();

    for plugin in &dashboard.content.plugins {
        if let Some(plugin_id) = plugin.plugin.id() {
            partial.plugins.insert(
                (dashboard.id.clone(), plugin_id.to_string()),
                DashboardPlugin {
                    dashboard_id: dashboard.id.clone(),
                    plugin_id: plugin_id.to_string(),
                    workspace_id: ctx.workspace_id.to_string(),
                },
            );
        }
    }

    for found in walk(std::slice::from_ref(dashboard), ctx.traversal, ctx.observer) {
        match found.widget {
            Widget::Insight(insight) => {
                add_insight(&mut partial, &found, insight, "insight", None, ctx);
            }
            Widget::VisualizationSwitcher(switcher) => {
                for member in &switcher.visualizations {
                    add_insight(
                        &mut partial,
                        &found,
                        member,
                        "visualizationSwitcher",
                        switcher.local_identifier.as_deref(),
                        ctx,
                    );
                }
            }
            Widget::Other(other) => {
                add_filters(&mut partial, &found, None, other.local_identifier.as_deref(), &other.filters, ctx);
            }
            Widget::RichText(_) | Widget::NestedLayout(_) => {}
        }

        if ctx.rich_text {
            scan_text(&mut partial, &found, ctx);
        }
    }

    partial
}

fn add_insight(
    partial: &mut Partial,
    found: &LayoutWidget<'_>,
    insight: &InsightWidget,
    widget_type: &str,
    switcher: Option<&str>,
    ctx: &ExtractionContext<'_>,
) {
    let Some(visualization_id) = insight.insight_id() else {
        return;
    };

    partial.add_visualization(DashboardVisualization {
        dashboard_id: found.dashboard_id.to_string(),
        visualization_id: visualization_id.to_string(),
        tab_id: found.tab_id.map(str::to_owned),
        from_rich_text: false,
        widget_local_identifier: insight.local_identifier.clone(),
        widget_type: widget_type.to_string(),
        widget_title: non_empty(insight.title.as_deref()),
        widget_description: non_empty(insight.description.as_deref()),
        switcher_local_identifier: switcher.map(str::to_owned),
        workspace_id: ctx.workspace_id.to_string(),
    });

    add_filters(
        partial,
        found,
        Some(visualization_id),
        insight.local_identifier.as_deref(),
        &insight.filters,
        ctx,
    );
}

fn add_filters(
    partial: &mut Partial,
    found: &LayoutWidget<'_>,
    visualization_id: Option<&str>,
    local_identifier: Option<&str>,
    settings: &WidgetFilterSettings,
    ctx: &ExtractionContext<'_>,
) {
    let row = |filter_type: &str, reference_type: Option<&str>, reference_id: &str, object_type: Option<&str>| {
        WidgetFilter {
            dashboard_id: found.dashboard_id.to_string(),
            visualization_id: visualization_id.map(str::to_owned),
            tab_id: found.tab_id.map(str::to_owned),
            widget_local_identifier: local_identifier.map(str::to_owned),
            filter_type: filter_type.to_string(),
            reference_type: reference_type.map(str::to_owned),
            reference_id: reference_id.to_string(),
            reference_object_type: object_type.map(str::to_owned),
            workspace_id: ctx.workspace_id.to_string(),
        }
    };

    for ignored in &settings.ignore_dashboard_filters {
        let Some(target) = ignored.target() else {
            continue;
        };
        if let Some(reference_id) = target.id() {
            partial.add_widget_filter(row(
                "ignoreDashboardFilters",
                ignored.kind.as_deref(),
                reference_id,
                target.kind(),
            ));
        }
    }

    if let Some(data_set) = settings.date_data_set.as_ref() {
        if let Some(reference_id) = data_set.id() {
            partial.add_widget_filter(row("dateDataSet", Some("dataset"), reference_id, data_set.kind()));
        }
    }
}

/// Rich-text bodies always; other widgets when their content mentions a
/// reference keyword
fn scan_text(partial: &mut Partial, found: &LayoutWidget<'_>, ctx: &ExtractionContext<'_>) {
    let Some(text) = found.widget.text_content() else {
        return;
    };
    let is_rich_text = matches!(found.widget, Widget::RichText(_));

    if is_rich_text || TargetKind::Insight.is_triggered_by(text) {
        let refs = ctx.resolver.resolve_for(
            found.dashboard_id,
            text,
            TargetKind::Insight,
            Some(&ctx.known.insights),
            ctx.observer,
        );
        for reference in refs {
            partial.add_visualization(DashboardVisualization {
                dashboard_id: reference.dashboard_id,
                visualization_id: reference.target_id,
                tab_id: found.tab_id.map(str::to_owned),
                from_rich_text: true,
                widget_local_identifier: found.widget.local_identifier().map(str::to_owned),
                widget_type: found.widget.type_name().to_string(),
                widget_title: None,
                widget_description: None,
                switcher_local_identifier: None,
                workspace_id: ctx.workspace_id.to_string(),
            });
        }
    }

    if is_rich_text || TargetKind::Metric.is_triggered_by(text) {
        let refs = ctx.resolver.resolve_for(
            found.dashboard_id,
            text,
            TargetKind::Metric,
            Some(&ctx.known.metrics),
            ctx.observer,
        );
        for reference in refs {
            partial.metrics.insert(
                (reference.dashboard_id.clone(), reference.target_id.clone()),
                DashboardMetric {
                    dashboard_id: reference.dashboard_id,
                    metric_id: reference.target_id,
                    workspace_id: ctx.workspace_id.to_string(),
                },
            );
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_owned)
}
