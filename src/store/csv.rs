//! CSV Export
//!
//! One `gooddata_<table>.csv` file per table. Columns follow the row
//! structs' field order; raw `content` JSON is not written.

use csv::Writer;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::store::Tables;

/// Serialize `rows` to `dir/file`, returning the row count.
///
/// An empty slice produces an empty file.
pub fn write_rows<T: Serialize>(dir: &Path, file: &str, rows: &[T]) -> Result<usize> {
    let path = dir.join(file);
    let mut writer = Writer::from_path(&path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(rows.len())
}

/// Write every table of an export into `dir`
pub fn write_tables(dir: &Path, tables: &Tables) -> Result<Vec<(PathBuf, usize)>> {
    fs::create_dir_all(dir)?;

    let entities = &tables.entities;
    let relationships = &tables.relationships;
    let written = [
        ("gooddata_workspaces.csv", write_rows(dir, "gooddata_workspaces.csv", &tables.workspaces)?),
        ("gooddata_metrics.csv", write_rows(dir, "gooddata_metrics.csv", &entities.metrics)?),
        (
            "gooddata_visualizations.csv",
            write_rows(dir, "gooddata_visualizations.csv", &entities.visualizations)?,
        ),
        (
            "gooddata_visualizations_metrics.csv",
            write_rows(dir, "gooddata_visualizations_metrics.csv", &entities.visualization_metrics)?,
        ),
        (
            "gooddata_visualizations_attributes.csv",
            write_rows(dir, "gooddata_visualizations_attributes.csv", &entities.visualization_attributes)?,
        ),
        ("gooddata_dashboards.csv", write_rows(dir, "gooddata_dashboards.csv", &entities.dashboards)?),
        (
            "gooddata_dashboards_permissions.csv",
            write_rows(dir, "gooddata_dashboards_permissions.csv", &entities.dashboard_permissions)?,
        ),
        (
            "gooddata_dashboards_visualizations.csv",
            write_rows(dir, "gooddata_dashboards_visualizations.csv", &relationships.visualizations)?,
        ),
        (
            "gooddata_dashboards_metrics.csv",
            write_rows(dir, "gooddata_dashboards_metrics.csv", &relationships.metrics)?,
        ),
        (
            "gooddata_dashboards_plugins.csv",
            write_rows(dir, "gooddata_dashboards_plugins.csv", &relationships.plugins)?,
        ),
        (
            "gooddata_dashboards_widget_filters.csv",
            write_rows(dir, "gooddata_dashboards_widget_filters.csv", &relationships.widget_filters)?,
        ),
        ("gooddata_plugins.csv", write_rows(dir, "gooddata_plugins.csv", &entities.plugins)?),
        ("gooddata_ldm_datasets.csv", write_rows(dir, "gooddata_ldm_datasets.csv", &entities.ldm_datasets)?),
        ("gooddata_ldm_columns.csv", write_rows(dir, "gooddata_ldm_columns.csv", &entities.ldm_columns)?),
        ("gooddata_ldm_labels.csv", write_rows(dir, "gooddata_ldm_labels.csv", &entities.ldm_labels)?),
        (
            "gooddata_filter_contexts.csv",
            write_rows(dir, "gooddata_filter_contexts.csv", &entities.filter_contexts)?,
        ),
        (
            "gooddata_filter_context_fields.csv",
            write_rows(dir, "gooddata_filter_context_fields.csv", &entities.filter_context_fields)?,
        ),
    ];

    info!(dir = %dir.display(), files = written.len(), "wrote CSV export");
    Ok(written
        .into_iter()
        .map(|(file, count)| (dir.join(file), count))
        .collect())
}
