//! SQLite Store
//!
//! Owns the export database. Every export recreates the primary tables from
//! `sql/schema.sql` and writes all rows in one transaction, so a failed run
//! leaves the previous tables untouched. `dictionary_metadata` survives
//! across runs and is upserted key by key.

pub mod csv;

use chrono::Utc;
use rusqlite::{params, Connection, Transaction};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;
use crate::process::{EntityRows, WorkspaceRow};
use crate::relationships::DashboardRelationships;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Everything written by one export
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub workspaces: Vec<WorkspaceRow>,
    pub entities: EntityRows,
    pub relationships: DashboardRelationships,
}

/// Row counts per table, in write order
pub type WriteSummary = Vec<(&'static str, usize)>;

#[derive(Debug)]
pub struct Store {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the database file, creating its parent directory
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened database");
        Ok(Self {
            conn,
            db_path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Drop and recreate the primary tables and every derived artifact
    pub fn reset_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Recreate the schema and write all rows atomically
    pub fn write(&mut self, tables: &Tables) -> Result<WriteSummary> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(SCHEMA_SQL)?;

        let entities = &tables.entities;
        let relationships = &tables.relationships;
        let summary = vec![
            ("workspaces", insert_workspaces(&tx, &tables.workspaces)?),
            ("metrics", insert_metrics(&tx, entities)?),
            ("visualizations", insert_visualizations(&tx, entities)?),
            ("visualizations_metrics", insert_visualization_links(&tx, entities)?),
            ("visualizations_attributes", insert_visualization_attributes(&tx, entities)?),
            ("dashboards", insert_dashboards(&tx, entities)?),
            ("dashboards_permissions", insert_dashboard_permissions(&tx, entities)?),
            ("plugins", insert_plugins(&tx, entities)?),
            ("ldm_datasets", insert_ldm_datasets(&tx, entities)?),
            ("ldm_columns", insert_ldm_columns(&tx, entities)?),
            ("ldm_labels", insert_ldm_labels(&tx, entities)?),
            ("filter_contexts", insert_filter_contexts(&tx, entities)?),
            ("filter_context_fields", insert_filter_context_fields(&tx, entities)?),
            ("dashboards_visualizations", insert_dashboard_visualizations(&tx, relationships)?),
            ("dashboards_metrics", insert_dashboard_metrics(&tx, relationships)?),
            ("dashboards_plugins", insert_dashboard_plugins(&tx, relationships)?),
            ("dashboards_widget_filters", insert_widget_filters(&tx, relationships)?),
        ];

        tx.commit()?;
        for (table, count) in &summary {
            info!(table, rows = count, "wrote table");
        }
        Ok(summary)
    }

    /// Upsert `dictionary_metadata` entries; `None` is stored as an empty string
    pub fn upsert_metadata(&self, entries: &[(&str, Option<&str>)]) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS dictionary_metadata (key TEXT PRIMARY KEY, value TEXT)",
            [],
        )?;
        for (key, value) in entries {
            self.conn.execute(
                "INSERT OR REPLACE INTO dictionary_metadata (key, value) VALUES (?1, ?2)",
                params![key, value.unwrap_or_default()],
            )?;
        }
        Ok(())
    }

    /// Record when and from what the database was produced
    pub fn record_export(&self, workspace_id: &str, snapshot_hash: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.upsert_metadata(&[
            ("last_updated", Some(now.as_str())),
            ("workspace_id", Some(workspace_id)),
            ("export_mode", Some("local")),
            ("snapshot_hash", Some(snapshot_hash)),
            ("exporter_version", Some(env!("CARGO_PKG_VERSION"))),
        ])
    }

    /// Reclaim space left by dropped tables and views
    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }

    pub fn metadata(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM dictionary_metadata WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Inserts
// =============================================================================

fn insert_workspaces(tx: &Transaction<'_>, rows: &[WorkspaceRow]) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO workspaces (workspace_id, workspace_name, is_parent, parent_workspace_id)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for row in rows {
        stmt.execute(params![row.workspace_id, row.workspace_name, row.is_parent, row.parent_workspace_id])?;
    }
    Ok(rows.len())
}

fn insert_metrics(tx: &Transaction<'_>, entities: &EntityRows) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO metrics
           (metric_id, workspace_id, title, description, tags, maql, format, is_valid, is_hidden, content)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for row in &entities.metrics {
        stmt.execute(params![
            row.metric_id,
            row.workspace_id,
            row.title,
            row.description,
            row.tags,
            row.maql,
            row.format,
            row.is_valid,
            row.is_hidden,
            row.content,
        ])?;
    }
    Ok(entities.metrics.len())
}

fn insert_visualizations(tx: &Transaction<'_>, entities: &EntityRows) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO visualizations
           (visualization_id, workspace_id, title, description, tags, visualization_url, is_valid, is_hidden, content)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for row in &entities.visualizations {
        stmt.execute(params![
            row.visualization_id,
            row.workspace_id,
            row.title,
            row.description,
            row.tags,
            row.visualization_url,
            row.is_valid,
            row.is_hidden,
            row.content,
        ])?;
    }
    Ok(entities.visualizations.len())
}

fn insert_visualization_links(tx: &Transaction<'_>, entities: &EntityRows) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO visualizations_metrics (visualization_id, metric_id, workspace_id, label)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for row in &entities.visualization_metrics {
        stmt.execute(params![row.visualization_id, row.metric_id, row.workspace_id, row.label])?;
    }
    Ok(entities.visualization_metrics.len())
}

fn insert_visualization_attributes(tx: &Transaction<'_>, entities: &EntityRows) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO visualizations_attributes (visualization_id, attribute_id, workspace_id, label)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for row in &entities.visualization_attributes {
        stmt.execute(params![row.visualization_id, row.attribute_id, row.workspace_id, row.label])?;
    }
    Ok(entities.visualization_attributes.len())
}

fn insert_dashboards(tx: &Transaction<'_>, entities: &EntityRows) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO dashboards
           (dashboard_id, workspace_id, title, description, tags, is_valid, is_hidden, filter_context_id, content)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for row in &entities.dashboards {
        stmt.execute(params![
            row.dashboard_id,
            row.workspace_id,
            row.title,
            row.description,
            row.tags,
            row.is_valid,
            row.is_hidden,
            row.filter_context_id,
            row.content,
        ])?;
    }
    Ok(entities.dashboards.len())
}

fn insert_dashboard_permissions(tx: &Transaction<'_>, entities: &EntityRows) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO dashboards_permissions
           (dashboard_id, workspace_id, assignee_id, assignee_type, permission_name)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for row in &entities.dashboard_permissions {
        stmt.execute(params![
            row.dashboard_id,
            row.workspace_id,
            row.assignee_id,
            row.assignee_type,
            row.permission_name,
        ])?;
    }
    Ok(entities.dashboard_permissions.len())
}

fn insert_plugins(tx: &Transaction<'_>, entities: &EntityRows) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO plugins (plugin_id, workspace_id, title, description, url, version, content)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for row in &entities.plugins {
        stmt.execute(params![
            row.plugin_id,
            row.workspace_id,
            row.title,
            row.description,
            row.url,
            row.version,
            row.content,
        ])?;
    }
    Ok(entities.plugins.len())
}

fn insert_ldm_datasets(tx: &Transaction<'_>, entities: &EntityRows) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO ldm_datasets
           (id, workspace_id, title, description, tags, attributes_count, facts_count, references_count,
            workspace_data_filter_columns_count, total_columns, data_source_id, source_table, source_table_path)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?;
    for row in &entities.ldm_datasets {
        stmt.execute(params![
            row.id,
            row.workspace_id,
            row.title,
            row.description,
            row.tags,
            row.attributes_count as i64,
            row.facts_count as i64,
            row.references_count as i64,
            row.workspace_data_filter_columns_count as i64,
            row.total_columns as i64,
            row.data_source_id,
            row.source_table,
            row.source_table_path,
        ])?;
    }
    Ok(entities.ldm_datasets.len())
}

fn insert_ldm_columns(tx: &Transaction<'_>, entities: &EntityRows) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT INTO ldm_columns
           (dataset_id, dataset_name, title, description, id, tags, data_type, source_column, type, grain,
            reference_to_id, reference_to_title, workspace_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?;
    for row in &entities.ldm_columns {
        stmt.execute(params![
            row.dataset_id,
            row.dataset_name,
            row.title,
            row.description,
            row.id,
            row.tags,
            row.data_type,
            row.source_column,
            row.column_type,
            row.grain,
            row.reference_to_id,
            row.reference_to_title,
            row.workspace_id,
        ])?;
    }
    Ok(entities.ldm_columns.len())
}

fn insert_ldm_labels(tx: &Transaction<'_>, entities: &EntityRows) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT INTO ldm_labels
           (label_id, attribute_id, dataset_id, title, description, tags, source_column, data_type, value_type,
            workspace_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for row in &entities.ldm_labels {
        stmt.execute(params![
            row.label_id,
            row.attribute_id,
            row.dataset_id,
            row.title,
            row.description,
            row.tags,
            row.source_column,
            row.data_type,
            row.value_type,
            row.workspace_id,
        ])?;
    }
    Ok(entities.ldm_labels.len())
}

fn insert_filter_contexts(tx: &Transaction<'_>, entities: &EntityRows) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO filter_contexts (filter_context_id, workspace_id, title, description, content)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for row in &entities.filter_contexts {
        stmt.execute(params![row.filter_context_id, row.workspace_id, row.title, row.description, row.content])?;
    }
    Ok(entities.filter_contexts.len())
}

fn insert_filter_context_fields(tx: &Transaction<'_>, entities: &EntityRows) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO filter_context_fields
           (filter_context_id, workspace_id, filter_index, filter_type, local_identifier, display_form_id, title,
            negative_selection, selection_mode, date_granularity, date_from, date_to, date_type,
            attribute_elements_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
    )?;
    for row in &entities.filter_context_fields {
        stmt.execute(params![
            row.filter_context_id,
            row.workspace_id,
            row.filter_index as i64,
            row.filter_type,
            row.local_identifier,
            row.display_form_id,
            row.title,
            row.negative_selection,
            row.selection_mode,
            row.date_granularity,
            row.date_from,
            row.date_to,
            row.date_type,
            row.attribute_elements_count.map(|n| n as i64),
        ])?;
    }
    Ok(entities.filter_context_fields.len())
}

fn insert_dashboard_visualizations(tx: &Transaction<'_>, relationships: &DashboardRelationships) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO dashboards_visualizations
           (dashboard_id, visualization_id, tab_id, from_rich_text, widget_local_identifier, widget_type,
            widget_title, widget_description, switcher_local_identifier, workspace_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for row in &relationships.visualizations {
        stmt.execute(params![
            row.dashboard_id,
            row.visualization_id,
            row.tab_id,
            row.from_rich_text as i64,
            row.widget_local_identifier,
            row.widget_type,
            row.widget_title,
            row.widget_description,
            row.switcher_local_identifier,
            row.workspace_id,
        ])?;
    }
    Ok(relationships.visualizations.len())
}

fn insert_dashboard_metrics(tx: &Transaction<'_>, relationships: &DashboardRelationships) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO dashboards_metrics (dashboard_id, metric_id, workspace_id) VALUES (?1, ?2, ?3)",
    )?;
    for row in &relationships.metrics {
        stmt.execute(params![row.dashboard_id, row.metric_id, row.workspace_id])?;
    }
    Ok(relationships.metrics.len())
}

fn insert_dashboard_plugins(tx: &Transaction<'_>, relationships: &DashboardRelationships) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO dashboards_plugins (dashboard_id, plugin_id, workspace_id) VALUES (?1, ?2, ?3)",
    )?;
    for row in &relationships.plugins {
        stmt.execute(params![row.dashboard_id, row.plugin_id, row.workspace_id])?;
    }
    Ok(relationships.plugins.len())
}

fn insert_widget_filters(tx: &Transaction<'_>, relationships: &DashboardRelationships) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO dashboards_widget_filters
           (dashboard_id, visualization_id, tab_id, widget_local_identifier, filter_type, reference_type,
            reference_id, reference_object_type, workspace_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for row in &relationships.widget_filters {
        stmt.execute(params![
            row.dashboard_id,
            row.visualization_id,
            row.tab_id,
            row.widget_local_identifier,
            row.filter_type,
            row.reference_type,
            row.reference_id,
            row.reference_object_type,
            row.workspace_id,
        ])?;
    }
    Ok(relationships.widget_filters.len())
}
