//! Validity & Ancestry
//!
//! Offline validity of metrics and visualizations, resolved against the
//! exported schema of the same workspace, plus metric ancestry edges and
//! usage flags. Everything here is a pure function of table contents; the
//! enrichment batch reads the tables, calls into this module and writes the
//! results back.
//!
//! Resolution rules:
//! - `metric` resolves against the metrics of the workspace
//! - `fact` and `attribute` resolve against LDM columns of that type
//! - `label` resolves against LDM labels or attribute columns

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::layout::{ObjectRef, VisualizationDefinition};
use crate::maql::{MaqlReference, ReferenceType};

// =============================================================================
// Schema Index
// =============================================================================

/// Identifiers that exist in one workspace
#[derive(Debug, Clone, Default)]
pub struct WorkspaceSchema {
    pub metrics: HashSet<String>,
    pub facts: HashSet<String>,
    pub attributes: HashSet<String>,
    pub labels: HashSet<String>,
}

impl WorkspaceSchema {
    pub fn resolves(&self, kind: ReferenceType, id: &str) -> bool {
        match kind {
            ReferenceType::Metric => self.metrics.contains(id),
            ReferenceType::Fact => self.facts.contains(id),
            ReferenceType::Attribute => self.attributes.contains(id),
            ReferenceType::Label => self.labels.contains(id) || self.attributes.contains(id),
        }
    }
}

/// Existing identifiers per workspace
#[derive(Debug, Clone, Default)]
pub struct SchemaIndex {
    workspaces: HashMap<String, WorkspaceSchema>,
}

impl SchemaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_metric(&mut self, workspace_id: &str, metric_id: &str) {
        self.entry(workspace_id).metrics.insert(metric_id.to_string());
    }

    /// Register an LDM column. Only `fact` and `attribute` columns take part
    /// in resolution.
    pub fn add_column(&mut self, workspace_id: &str, column_id: &str, column_type: &str) {
        let schema = self.entry(workspace_id);
        match column_type {
            "fact" => {
                schema.facts.insert(column_id.to_string());
            }
            "attribute" => {
                schema.attributes.insert(column_id.to_string());
            }
            _ => {}
        }
    }

    pub fn add_label(&mut self, workspace_id: &str, label_id: &str) {
        self.entry(workspace_id).labels.insert(label_id.to_string());
    }

    pub fn workspace(&self, workspace_id: &str) -> Option<&WorkspaceSchema> {
        self.workspaces.get(workspace_id)
    }

    pub fn resolves(&self, workspace_id: &str, kind: ReferenceType, id: &str) -> bool {
        self.workspace(workspace_id)
            .is_some_and(|schema| schema.resolves(kind, id))
    }

    fn entry(&mut self, workspace_id: &str) -> &mut WorkspaceSchema {
        self.workspaces.entry(workspace_id.to_string()).or_default()
    }
}

// =============================================================================
// Metrics
// =============================================================================

/// Metric identity and its current validity flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricState {
    pub metric_id: String,
    pub workspace_id: String,
    /// `Some` when the source supplied an authoritative flag
    pub is_valid: Option<bool>,
}

/// Computed flag for one entity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ValidityFlag {
    pub id: String,
    pub workspace_id: String,
    pub is_valid: bool,
}

/// Validity for every metric without an authoritative flag
pub fn metric_validity(
    metrics: &[MetricState],
    references: &[MaqlReference],
    schema: &SchemaIndex,
) -> Vec<ValidityFlag> {
    let mut by_source: HashMap<(&str, &str), Vec<&MaqlReference>> = HashMap::new();
    for reference in references {
        by_source
            .entry((
                reference.source_metric_id.as_str(),
                reference.source_workspace_id.as_str(),
            ))
            .or_default()
            .push(reference);
    }

    let mut flags: Vec<ValidityFlag> = metrics
        .iter()
        .filter(|m| m.is_valid.is_none())
        .map(|m| {
            let is_valid = by_source
                .get(&(m.metric_id.as_str(), m.workspace_id.as_str()))
                .map_or(true, |refs| {
                    refs.iter().all(|r| {
                        schema.resolves(&m.workspace_id, r.reference_type, &r.referenced_id)
                    })
                });
            ValidityFlag {
                id: m.metric_id.clone(),
                workspace_id: m.workspace_id.clone(),
                is_valid,
            }
        })
        .collect();

    flags.sort();
    flags
}

/// Direct metric to metric dependency
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AncestryEdge {
    pub metric_id: String,
    pub ancestor_metric_id: String,
    pub workspace_id: String,
}

/// Ancestry edges from `metric` reference rows, sorted
pub fn ancestry(references: &[MaqlReference]) -> Vec<AncestryEdge> {
    references
        .iter()
        .filter(|r| r.reference_type == ReferenceType::Metric)
        .map(|r| AncestryEdge {
            metric_id: r.source_metric_id.clone(),
            ancestor_metric_id: r.referenced_id.clone(),
            workspace_id: r.source_workspace_id.clone(),
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// `(workspace_id, metric_id)` of metrics referenced as `metric` by another
/// metric of the same workspace
pub fn used_metrics(references: &[MaqlReference]) -> BTreeSet<(String, String)> {
    references
        .iter()
        .filter(|r| r.reference_type == ReferenceType::Metric && r.referenced_id != r.source_metric_id)
        .map(|r| (r.source_workspace_id.clone(), r.referenced_id.clone()))
        .collect()
}

// =============================================================================
// Visualizations
// =============================================================================

/// A reference held by a visualization definition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VisualizationReference {
    pub id: String,
    /// `None` for a type the resolver does not know
    pub kind: Option<ReferenceType>,
}

/// Every reference in buckets, filters and attribute filter configs
pub fn visualization_references(definition: &VisualizationDefinition) -> Vec<VisualizationReference> {
    let mut refs = Vec::new();

    let as_label = |r: &ObjectRef| {
        r.id().map(|id| VisualizationReference {
            id: id.to_string(),
            kind: Some(ReferenceType::Label),
        })
    };

    for bucket in &definition.buckets {
        for item in &bucket.items {
            if let Some(target) = item.measure.as_ref().and_then(|m| m.item()) {
                if let Some(id) = target.id() {
                    refs.push(VisualizationReference {
                        id: id.to_string(),
                        kind: target.kind().and_then(ReferenceType::parse),
                    });
                }
            }
            if let Some(display_form) = item.attribute.as_ref().and_then(|a| a.display_form.as_ref()) {
                refs.extend(as_label(display_form));
            }
        }
    }

    for filter in &definition.filters {
        if let Some(display_form) = filter.display_form() {
            refs.extend(as_label(display_form));
        }
    }

    for config in definition.attribute_filter_configs.values() {
        if let Some(label) = config.display_as_label.as_ref() {
            refs.extend(as_label(label));
        }
    }

    refs
}

/// Visualization identity, decoded definition and current flag
#[derive(Debug, Clone)]
pub struct VisualizationState {
    pub visualization_id: String,
    pub workspace_id: String,
    /// `None` when the stored content could not be decoded
    pub definition: Option<VisualizationDefinition>,
    pub is_valid: Option<bool>,
}

/// Validity for every visualization without an authoritative flag.
/// An undecodable definition is invalid.
pub fn visualization_validity(visualizations: &[VisualizationState], schema: &SchemaIndex) -> Vec<ValidityFlag> {
    let mut flags: Vec<ValidityFlag> = visualizations
        .iter()
        .filter(|v| v.is_valid.is_none())
        .map(|v| {
            let is_valid = v.definition.as_ref().is_some_and(|definition| {
                visualization_references(definition)
                    .iter()
                    .all(|r| r.kind.is_some_and(|kind| schema.resolves(&v.workspace_id, kind, &r.id)))
            });
            ValidityFlag {
                id: v.visualization_id.clone(),
                workspace_id: v.workspace_id.clone(),
                is_valid,
            }
        })
        .collect();

    flags.sort();
    flags
}

/// Unresolved references per decoded visualization without an authoritative flag
pub fn unresolved_visualization_references<'a>(
    visualizations: &'a [VisualizationState],
    schema: &SchemaIndex,
) -> BTreeMap<&'a str, Vec<VisualizationReference>> {
    visualizations
        .iter()
        .filter(|v| v.is_valid.is_none())
        .filter_map(|v| {
            let missing: Vec<_> = visualization_references(v.definition.as_ref()?)
                .into_iter()
                .filter(|r| !r.kind.is_some_and(|kind| schema.resolves(&v.workspace_id, kind, &r.id)))
                .collect();
            (!missing.is_empty()).then_some((v.visualization_id.as_str(), missing))
        })
        .collect()
}
