//! Export Pipeline
//!
//! Loads one or more workspace layout snapshots, flattens them into table
//! rows, extracts dashboard relationships and writes SQLite (plus CSV when
//! configured). The enrichment batch runs last, over the finished tables.
//!
//! With several snapshots the primary workspace is the one matching the
//! configured workspace id, or the first by path. Known identifiers are
//! shared across all snapshots; rich text is only scanned in the primary.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ExportConfig;
use crate::diagnostics::{DiagnosticCode, DiagnosticItem, ExtractionObserver, TracingObserver};
use crate::enrich::{self, Manifest, RunOptions, StepReport};
use crate::error::{ExportError, Result};
use crate::extract::ReferenceResolver;
use crate::layout::{Dashboard, LayoutSnapshot};
use crate::process::{
    process_dashboard_permissions, process_dashboards, process_filter_context_fields, process_filter_contexts,
    process_ldm, process_metrics, process_plugins, process_visualization_attributes, process_visualization_metrics,
    process_visualizations, EntityRows, WorkspaceRow,
};
use crate::relationships::{aggregate, ExtractionContext, KnownIdentifiers};
use crate::store::{self, Store, Tables, WriteSummary};

// =============================================================================
// Loading
// =============================================================================

/// One workspace's snapshot
#[derive(Debug, Clone)]
pub struct WorkspaceSnapshot {
    pub workspace_id: String,
    pub source: Option<PathBuf>,
    pub snapshot: LayoutSnapshot,
}

/// Snapshots of a run plus a hash over their bytes
#[derive(Debug, Clone)]
pub struct LoadedLayouts {
    pub workspaces: Vec<WorkspaceSnapshot>,
    pub snapshot_hash: String,
}

/// Load a snapshot file, or every `*.json` below a directory sorted by path.
///
/// Workspace ids are the file stems. A single file takes `workspace_id`
/// instead when one is given.
pub fn load_layouts(path: &Path, workspace_id: Option<&str>) -> Result<LoadedLayouts> {
    let files = if path.is_dir() {
        let mut files: Vec<PathBuf> = WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        files
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        return Err(ExportError::NoSnapshot(path.display().to_string()));
    };

    if files.is_empty() {
        return Err(ExportError::NoSnapshot(path.display().to_string()));
    }

    let single = files.len() == 1;
    let mut hasher = Sha256::new();
    let mut workspaces = Vec::with_capacity(files.len());

    for file in files {
        let content = fs::read_to_string(&file)?;
        hasher.update(content.as_bytes());

        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let id = match workspace_id {
            Some(id) if single => id.to_string(),
            _ => stem,
        };

        let snapshot = parse_snapshot(&content, &file)?;
        debug!(workspace = %id, path = %file.display(), "loaded snapshot");
        workspaces.push(WorkspaceSnapshot {
            workspace_id: id,
            source: Some(file),
            snapshot,
        });
    }

    Ok(LoadedLayouts {
        workspaces,
        snapshot_hash: format!("{:x}", hasher.finalize()),
    })
}

/// Decode snapshot JSON, warning about missing top-level sections
pub fn parse_snapshot(content: &str, path: &Path) -> Result<LayoutSnapshot> {
    let invalid = |message: String| ExportError::InvalidSnapshot {
        path: path.display().to_string(),
        message,
    };

    let json: Value = serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;
    if !json.is_object() {
        return Err(invalid("top level is not an object".to_string()));
    }
    for key in ["analytics", "ldm"] {
        if json.get(key).map_or(true, Value::is_null) {
            warn!(path = %path.display(), "snapshot has no '{key}' section, nothing exported from it");
        }
    }

    serde_json::from_value(json).map_err(|e| invalid(e.to_string()))
}

// =============================================================================
// Processing
// =============================================================================

/// Index of the primary workspace
pub fn primary_index(workspaces: &[WorkspaceSnapshot], workspace_id: Option<&str>) -> usize {
    workspace_id
        .and_then(|id| workspaces.iter().position(|w| w.workspace_id == id))
        .unwrap_or(0)
}

/// Visualization and metric ids of every workspace
pub fn known_identifiers(workspaces: &[WorkspaceSnapshot]) -> KnownIdentifiers {
    let mut known = KnownIdentifiers::default();
    for workspace in workspaces {
        let analytics = &workspace.snapshot.analytics;
        known
            .insights
            .extend(analytics.visualization_objects.iter().map(|v| v.id.clone()));
        known.metrics.extend(analytics.metrics.iter().map(|m| m.id.clone()));
    }
    known
}

/// Flatten every workspace into the tables of one export
pub fn build_tables(
    workspaces: &[WorkspaceSnapshot],
    config: &ExportConfig,
    observer: &dyn ExtractionObserver,
) -> Result<Tables> {
    let resolver = ReferenceResolver::new(config.extraction.resolver())?;
    let known = known_identifiers(workspaces);
    let primary = primary_index(workspaces, config.export.workspace_id.as_deref());
    let primary_id = workspaces.get(primary).map(|w| w.workspace_id.clone());
    let store_content = config.export.store_content;

    let mut tables = Tables::default();

    for (idx, workspace) in workspaces.iter().enumerate() {
        let ws = workspace.workspace_id.as_str();
        let analytics = &workspace.snapshot.analytics;
        let is_primary = idx == primary;

        tables.workspaces.push(WorkspaceRow {
            workspace_id: ws.to_string(),
            workspace_name: format!("Local Layout ({ws})"),
            is_parent: is_primary,
            parent_workspace_id: if is_primary { None } else { primary_id.clone() },
        });

        let (ldm_datasets, ldm_columns, ldm_labels) = process_ldm(&workspace.snapshot.ldm, ws);
        tables.entities.extend(EntityRows {
            metrics: process_metrics(&analytics.metrics, ws, store_content)?,
            visualizations: process_visualizations(&analytics.visualization_objects, ws, store_content)?,
            visualization_metrics: process_visualization_metrics(&analytics.visualization_objects, ws),
            visualization_attributes: process_visualization_attributes(&analytics.visualization_objects, ws),
            dashboards: process_dashboards(&analytics.analytical_dashboards, ws, store_content)?,
            dashboard_permissions: process_dashboard_permissions(&analytics.analytical_dashboards, ws),
            plugins: process_plugins(&analytics.dashboard_plugins, ws, store_content)?,
            ldm_datasets,
            ldm_columns,
            ldm_labels,
            filter_contexts: process_filter_contexts(&analytics.filter_contexts, ws, store_content)?,
            filter_context_fields: process_filter_context_fields(&analytics.filter_contexts, ws),
        });

        let dashboards = decode_dashboards(workspace, observer);
        let ctx = ExtractionContext {
            workspace_id: ws,
            rich_text: config.rich_text_for(is_primary, workspaces.len()),
            known: &known,
            resolver: &resolver,
            traversal: config.extraction.traversal(),
            observer,
        };
        let relationships = aggregate(&dashboards, &ctx);
        debug!(
            workspace = ws,
            rich_text = ctx.rich_text,
            visualizations = relationships.visualizations.len(),
            metrics = relationships.metrics.len(),
            "extracted dashboard relationships"
        );

        tables.relationships.visualizations.extend(relationships.visualizations);
        tables.relationships.metrics.extend(relationships.metrics);
        tables.relationships.plugins.extend(relationships.plugins);
        tables.relationships.widget_filters.extend(relationships.widget_filters);
    }

    Ok(tables)
}

/// Dashboards whose content decodes; the rest are reported and skipped
fn decode_dashboards(workspace: &WorkspaceSnapshot, observer: &dyn ExtractionObserver) -> Vec<Dashboard> {
    workspace
        .snapshot
        .analytics
        .analytical_dashboards
        .iter()
        .filter_map(|object| match object.decode() {
            Ok(dashboard) => Some(dashboard),
            Err(e) => {
                observer.report(
                    DiagnosticItem::new(
                        object.id.as_str(),
                        DiagnosticCode::UndecodableLayout,
                        format!("dashboard layout not decodable: {e}"),
                    )
                    .with_context(workspace.workspace_id.as_str()),
                );
                None
            }
        })
        .collect()
}

// =============================================================================
// Export
// =============================================================================

/// What an export produced
#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub primary_workspace_id: String,
    pub workspaces: usize,
    pub tables: WriteSummary,
    pub csv_files: usize,
    pub enrichment: Vec<StepReport>,
}

/// Export the snapshots under `layout` with diagnostics sent to `tracing`
pub fn run_export(layout: &Path, config: &ExportConfig) -> Result<ExportSummary> {
    let loaded = load_layouts(layout, config.export.workspace_id.as_deref())?;
    export_layouts(&loaded, config, &TracingObserver)
}

/// Write already loaded snapshots to the configured outputs
pub fn export_layouts(
    loaded: &LoadedLayouts,
    config: &ExportConfig,
    observer: &dyn ExtractionObserver,
) -> Result<ExportSummary> {
    let workspaces = &loaded.workspaces;
    let primary = workspaces
        .get(primary_index(workspaces, config.export.workspace_id.as_deref()))
        .ok_or_else(|| ExportError::NoSnapshot("no workspace snapshots loaded".to_string()))?;
    info!(
        workspaces = workspaces.len(),
        primary = %primary.workspace_id,
        "exporting layout snapshots"
    );

    let tables = build_tables(workspaces, config, observer)?;

    let mut store = Store::open(&config.export.db_path)?;
    let written = store.write(&tables)?;
    store.record_export(&primary.workspace_id, &loaded.snapshot_hash)?;

    let csv_files = match &config.export.csv_dir {
        Some(dir) => store::csv::write_tables(dir, &tables)?.len(),
        None => 0,
    };

    let enrichment = if config.enrichment.enabled {
        let manifest = Manifest::load(config.enrichment.manifest.as_deref())?;
        let options = RunOptions {
            values: config.enrichment_values(&primary.workspace_id),
            workspace_id: config.enrichment_scope(&primary.workspace_id, workspaces.len()),
            observer,
        };
        let reports = enrich::run_with(store.connection_mut(), &manifest, &options)?;
        if config.enrichment.vacuum {
            store.vacuum()?;
        }
        reports
    } else {
        debug!("enrichment disabled");
        Vec::new()
    };

    Ok(ExportSummary {
        primary_workspace_id: primary.workspace_id.clone(),
        workspaces: workspaces.len(),
        tables: written,
        csv_files,
        enrichment,
    })
}
