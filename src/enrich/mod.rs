//! Post-Export Enrichment
//!
//! A manifest of named artifacts (tables, views, updates, procedures) that
//! derive relationships and validity from the exported tables. Artifacts
//! declare dependencies and run in the order computed by
//! [`plan::execution_order`], all inside one transaction.
//!
//! Two kinds of step exist:
//! - `builtin` steps implemented in Rust on top of [`crate::maql`] and
//!   [`crate::validity`]
//! - `sql_file` steps, a script executed as one batch after its
//!   `{name}` placeholders are substituted (see [`params`])
//!
//! Built-in steps can be scoped to one workspace through [`RunOptions`].
//! The default manifest and its scripts are embedded from `sql/`.

pub mod params;
pub mod plan;

use include_dir::{include_dir, Dir};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::diagnostics::{DiagnosticCode, DiagnosticItem, ExtractionObserver, NoopObserver};
use crate::error::{ExportError, Result};
use crate::layout::{decode_definition, VisualizationDefinition};
use crate::maql::{MaqlReference, MaqlScanner, ReferenceType};
use crate::validity::{
    ancestry, metric_validity, unresolved_visualization_references, used_metrics, visualization_validity,
    MetricState, SchemaIndex, ValidityFlag, VisualizationState,
};

pub use params::substitute_parameters;
pub use plan::execution_order;

static SQL_DIR: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/sql");

const MANIFEST_FILE: &str = "enrichment.toml";

// =============================================================================
// Manifest
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Table,
    View,
    Update,
    Procedure,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Table => "TABLE",
            Self::View => "VIEW",
            Self::Update => "UPDATE",
            Self::Procedure => "PROCEDURE",
        };
        f.write_str(name)
    }
}

/// Column an update step needs on its target table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredColumn {
    pub name: String,
    pub sql_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Script relative to the manifest
    #[serde(default)]
    pub sql_file: Option<String>,
    /// Name of a Rust step
    #[serde(default)]
    pub builtin: Option<String>,
    /// Table receiving `required_columns`
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub required_columns: Vec<RequiredColumn>,
    /// Placeholder name to value spec, applied to `sql_file` scripts
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "artifact")]
    pub artifacts: Vec<Artifact>,

    /// Directory scripts are read from; embedded scripts when `None`
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Manifest {
    /// The manifest compiled into the binary
    pub fn builtin() -> Result<Self> {
        let text = SQL_DIR
            .get_file(MANIFEST_FILE)
            .and_then(|f| f.contents_utf8())
            .ok_or_else(|| ExportError::InvalidManifest(format!("embedded {MANIFEST_FILE} is missing")))?;
        Self::parse(text, None)
    }

    /// Load a manifest file; its scripts resolve relative to its directory
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&text, Some(base_dir))
    }

    /// `path` when given, the embedded manifest otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Self::builtin(),
        }
    }

    pub fn parse(text: &str, base_dir: Option<PathBuf>) -> Result<Self> {
        let mut manifest: Manifest = toml::from_str(text)?;
        manifest.base_dir = base_dir;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for artifact in &self.artifacts {
            if !seen.insert(artifact.name.as_str()) {
                return Err(ExportError::InvalidManifest(format!(
                    "artifact '{}' is declared twice",
                    artifact.name
                )));
            }
            match (&artifact.sql_file, &artifact.builtin) {
                (Some(_), None) => {}
                (None, Some(step)) if BuiltinStep::parse(step).is_some() => {}
                (None, Some(step)) => {
                    return Err(ExportError::InvalidManifest(format!(
                        "artifact '{}' names unknown builtin '{step}'",
                        artifact.name
                    )))
                }
                _ => {
                    return Err(ExportError::InvalidManifest(format!(
                        "artifact '{}' needs exactly one of sql_file or builtin",
                        artifact.name
                    )))
                }
            }
            if !artifact.required_columns.is_empty() && artifact.table.is_none() {
                return Err(ExportError::InvalidManifest(format!(
                    "artifact '{}' lists required_columns without a table",
                    artifact.name
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    /// Artifacts in execution order
    pub fn plan(&self) -> Result<Vec<&Artifact>> {
        let items: BTreeMap<String, Vec<String>> = self
            .artifacts
            .iter()
            .map(|a| (a.name.clone(), a.dependencies.clone()))
            .collect();

        Ok(execution_order(&items)?
            .iter()
            .filter_map(|name| self.get(name))
            .collect())
    }

    fn sql_text(&self, file: &str) -> Result<String> {
        match &self.base_dir {
            Some(dir) => Ok(fs::read_to_string(dir.join(file))?),
            None => SQL_DIR
                .get_file(file)
                .and_then(|f| f.contents_utf8())
                .map(str::to_owned)
                .ok_or_else(|| ExportError::InvalidManifest(format!("embedded script {file} is missing"))),
        }
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Outcome of one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub kind: ArtifactKind,
    /// Rows written or updated; zero for scripts
    pub rows: usize,
}

/// Inputs shared by every step of a run
pub struct RunOptions<'a> {
    /// Values `{{KEY}}` parameter specs resolve against
    pub values: BTreeMap<String, String>,
    /// Limit built-in steps to one workspace; all workspaces when `None`
    pub workspace_id: Option<String>,
    pub observer: &'a dyn ExtractionObserver,
}

impl Default for RunOptions<'_> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            workspace_id: None,
            observer: &NoopObserver,
        }
    }
}

impl fmt::Debug for RunOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("values", &self.values)
            .field("workspace_id", &self.workspace_id)
            .finish_non_exhaustive()
    }
}

/// [`run_with`] over every workspace, without parameters or diagnostics
pub fn run(conn: &mut Connection, manifest: &Manifest) -> Result<Vec<StepReport>> {
    run_with(conn, manifest, &RunOptions::default())
}

/// Run every artifact in dependency order inside one transaction.
///
/// Planning errors are raised before anything executes. A failing step
/// rolls the whole batch back and is reported as [`ExportError::StepFailed`].
pub fn run_with(conn: &mut Connection, manifest: &Manifest, options: &RunOptions<'_>) -> Result<Vec<StepReport>> {
    let order = manifest.plan()?;
    debug!(steps = order.len(), workspace = ?options.workspace_id, "enrichment plan ready");

    let tx = conn.transaction()?;
    let mut reports = Vec::with_capacity(order.len());

    for artifact in order {
        debug!(name = %artifact.name, kind = %artifact.kind, deps = ?artifact.dependencies, "running artifact");
        let rows = run_artifact(&tx, manifest, artifact, options).map_err(|e| ExportError::StepFailed {
            name: artifact.name.clone(),
            message: e.to_string(),
        })?;
        reports.push(StepReport {
            name: artifact.name.clone(),
            kind: artifact.kind,
            rows,
        });
    }

    tx.commit()?;

    let views = reports.iter().filter(|r| r.kind == ArtifactKind::View).count();
    info!(
        artifacts = reports.len(),
        views,
        "enrichment completed"
    );
    Ok(reports)
}

fn run_artifact(
    tx: &Transaction<'_>,
    manifest: &Manifest,
    artifact: &Artifact,
    options: &RunOptions<'_>,
) -> Result<usize> {
    if let Some(table) = &artifact.table {
        ensure_columns_exist(tx, table, &artifact.required_columns)?;
    }

    if let Some(file) = &artifact.sql_file {
        let sql = substitute_parameters(&manifest.sql_text(file)?, &artifact.parameters, &options.values);
        tx.execute_batch(&sql)?;
        return Ok(0);
    }

    let step = artifact
        .builtin
        .as_deref()
        .and_then(BuiltinStep::parse)
        .ok_or_else(|| ExportError::InvalidManifest(format!("artifact '{}' has nothing to run", artifact.name)))?;
    step.run(tx, options)
}

/// Add any of `columns` missing from `table`
pub fn ensure_columns_exist(conn: &Connection, table: &str, columns: &[RequiredColumn]) -> Result<()> {
    if columns.is_empty() {
        return Ok(());
    }

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: BTreeSet<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<_, _>>()?;

    for column in columns.iter().filter(|c| !existing.contains(&c.name)) {
        debug!(table, column = %column.name, "adding column");
        conn.execute_batch(&format!(
            "ALTER TABLE {table} ADD COLUMN {} {}",
            column.name, column.sql_type
        ))?;
    }
    Ok(())
}

// =============================================================================
// Built-in Steps
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltinStep {
    MetricsReferences,
    MetricsAncestry,
    MetricsIsUsedMaql,
    MetricsIsValid,
    VisualizationsIsValid,
}

impl BuiltinStep {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "metrics_references" => Some(Self::MetricsReferences),
            "metrics_ancestry" => Some(Self::MetricsAncestry),
            "metrics_is_used_maql" => Some(Self::MetricsIsUsedMaql),
            "metrics_is_valid" => Some(Self::MetricsIsValid),
            "visualizations_is_valid" => Some(Self::VisualizationsIsValid),
            _ => None,
        }
    }

    fn run(self, tx: &Transaction<'_>, options: &RunOptions<'_>) -> Result<usize> {
        let scope = options.workspace_id.as_deref();
        match self {
            Self::MetricsReferences => build_metrics_references(tx, scope),
            Self::MetricsAncestry => build_metrics_ancestry(tx),
            Self::MetricsIsUsedMaql => update_is_used_maql(tx, scope),
            Self::MetricsIsValid => update_metric_validity(tx, scope),
            Self::VisualizationsIsValid => update_visualization_validity(tx, scope, options.observer),
        }
    }
}

/// Matches every row when the scope is `NULL`
const IN_SCOPE: &str = "(?1 IS NULL OR workspace_id = ?1)";

fn build_metrics_references(tx: &Transaction<'_>, scope: Option<&str>) -> Result<usize> {
    tx.execute_batch(
        "DROP TABLE IF EXISTS metrics_references;
         CREATE TABLE metrics_references (
             source_metric_id TEXT,
             source_workspace_id TEXT,
             referenced_id TEXT,
             reference_type TEXT,
             PRIMARY KEY (source_metric_id, source_workspace_id, referenced_id, reference_type)
         );",
    )?;

    let scanner = MaqlScanner::new()?;
    let mut stmt = tx.prepare(&format!("SELECT metric_id, workspace_id, maql FROM metrics WHERE {IN_SCOPE}"))?;
    let metrics = stmt
        .query_map([scope], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut insert = tx.prepare(
        "INSERT OR IGNORE INTO metrics_references
           (source_metric_id, source_workspace_id, referenced_id, reference_type)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut count = 0;
    for (metric_id, workspace_id, maql) in &metrics {
        for reference in scanner.metric_references(metric_id, workspace_id, maql.as_deref()) {
            count += insert.execute(params![
                reference.source_metric_id,
                reference.source_workspace_id,
                reference.referenced_id,
                reference.reference_type.as_str(),
            ])?;
        }
    }
    Ok(count)
}

fn load_references(tx: &Transaction<'_>) -> Result<Vec<MaqlReference>> {
    let mut stmt = tx.prepare(
        "SELECT source_metric_id, source_workspace_id, referenced_id, reference_type FROM metrics_references",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter_map(|(source_metric_id, source_workspace_id, referenced_id, kind)| {
            Some(MaqlReference {
                source_metric_id,
                source_workspace_id,
                referenced_id,
                reference_type: ReferenceType::parse(&kind)?,
            })
        })
        .collect())
}

fn build_metrics_ancestry(tx: &Transaction<'_>) -> Result<usize> {
    tx.execute_batch(
        "DROP TABLE IF EXISTS metrics_ancestry;
         CREATE TABLE metrics_ancestry (
             metric_id TEXT,
             ancestor_metric_id TEXT,
             workspace_id TEXT,
             PRIMARY KEY (metric_id, ancestor_metric_id, workspace_id)
         );",
    )?;

    let edges = ancestry(&load_references(tx)?);
    let mut insert = tx.prepare(
        "INSERT INTO metrics_ancestry (metric_id, ancestor_metric_id, workspace_id) VALUES (?1, ?2, ?3)",
    )?;
    for edge in &edges {
        insert.execute(params![edge.metric_id, edge.ancestor_metric_id, edge.workspace_id])?;
    }
    Ok(edges.len())
}

fn update_is_used_maql(tx: &Transaction<'_>, scope: Option<&str>) -> Result<usize> {
    let used = used_metrics(&load_references(tx)?);
    tx.execute(&format!("UPDATE metrics SET is_used_maql = 0 WHERE {IN_SCOPE}"), [scope])?;

    let mut update = tx.prepare("UPDATE metrics SET is_used_maql = 1 WHERE workspace_id = ?1 AND metric_id = ?2")?;
    let mut count = 0;
    for (workspace_id, metric_id) in &used {
        count += update.execute(params![workspace_id, metric_id])?;
    }
    Ok(count)
}

/// Metrics, fact/attribute columns and labels of every workspace
fn load_schema(tx: &Transaction<'_>) -> Result<SchemaIndex> {
    let mut schema = SchemaIndex::new();

    let mut stmt = tx.prepare("SELECT workspace_id, metric_id FROM metrics")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        schema.add_metric(&row.get::<_, String>(0)?, &row.get::<_, String>(1)?);
    }

    let mut stmt = tx.prepare("SELECT workspace_id, id, type FROM ldm_columns")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        schema.add_column(
            &row.get::<_, String>(0)?,
            &row.get::<_, String>(1)?,
            &row.get::<_, String>(2)?,
        );
    }

    let mut stmt = tx.prepare("SELECT workspace_id, label_id FROM ldm_labels")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        schema.add_label(&row.get::<_, String>(0)?, &row.get::<_, String>(1)?);
    }

    Ok(schema)
}

fn write_flags(tx: &Transaction<'_>, sql: &str, flags: &[ValidityFlag]) -> Result<usize> {
    let mut update = tx.prepare(sql)?;
    let mut count = 0;
    for flag in flags {
        count += update.execute(params![flag.is_valid, flag.id, flag.workspace_id])?;
    }
    Ok(count)
}

fn update_metric_validity(tx: &Transaction<'_>, scope: Option<&str>) -> Result<usize> {
    let schema = load_schema(tx)?;
    let references = load_references(tx)?;

    let mut stmt = tx.prepare(&format!("SELECT metric_id, workspace_id, is_valid FROM metrics WHERE {IN_SCOPE}"))?;
    let metrics = stmt
        .query_map([scope], |row| {
            Ok(MetricState {
                metric_id: row.get(0)?,
                workspace_id: row.get(1)?,
                is_valid: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let flags = metric_validity(&metrics, &references, &schema);
    write_flags(
        tx,
        "UPDATE metrics SET is_valid = ?1 WHERE metric_id = ?2 AND workspace_id = ?3",
        &flags,
    )
}

fn update_visualization_validity(
    tx: &Transaction<'_>,
    scope: Option<&str>,
    observer: &dyn ExtractionObserver,
) -> Result<usize> {
    let schema = load_schema(tx)?;

    let mut stmt = tx.prepare(&format!(
        "SELECT visualization_id, workspace_id, is_valid, content FROM visualizations
         WHERE is_valid IS NULL AND {IN_SCOPE}
         ORDER BY workspace_id, visualization_id"
    ))?;
    let rows = stmt
        .query_map([scope], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<bool>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut visualizations = Vec::with_capacity(rows.len());
    for (visualization_id, workspace_id, is_valid, content) in rows {
        let Some(content) = content else {
            debug!(visualization_id = %visualization_id, "no stored content, validity left unset");
            continue;
        };
        let definition = match stored_definition(&content) {
            Ok(definition) => Some(definition),
            Err(e) => {
                observer.report(
                    DiagnosticItem::new(
                        &visualization_id,
                        DiagnosticCode::UndecodableVisualization,
                        "stored visualization content could not be decoded, marked invalid",
                    )
                    .with_context(e.to_string()),
                );
                None
            }
        };
        visualizations.push(VisualizationState {
            visualization_id,
            workspace_id,
            definition,
            is_valid,
        });
    }

    for (visualization_id, missing) in unresolved_visualization_references(&visualizations, &schema) {
        let item = missing.iter().fold(
            DiagnosticItem::new(
                visualization_id,
                DiagnosticCode::UnresolvedVisualizationReference,
                format!("{} unresolved reference(s)", missing.len()),
            ),
            |item, reference| {
                let kind = reference.kind.map_or("unknown", |k| k.as_str());
                item.with_context(format!("{kind} {}", reference.id))
            },
        );
        observer.report(item);
    }

    let flags = visualization_validity(&visualizations, &schema);
    write_flags(
        tx,
        "UPDATE visualizations SET is_valid = ?1 WHERE visualization_id = ?2 AND workspace_id = ?3",
        &flags,
    )
}

/// Definition inside a stored visualization object
fn stored_definition(content: &str) -> std::result::Result<VisualizationDefinition, serde_json::Error> {
    let object: Value = serde_json::from_str(content)?;
    decode_definition(object.get("content").unwrap_or(&Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingObserver;
    use crate::store::Store;

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.reset_schema().unwrap();
        store
            .connection()
            .execute_batch(
                r#"
                INSERT INTO metrics (metric_id, workspace_id, title, maql, is_valid, is_hidden) VALUES
                    ('revenue', 'ws', 'Revenue', 'SELECT SUM({fact/amount})', NULL, 0),
                    ('avg', 'ws', 'Avg', 'SELECT {metric/revenue} / COUNT({attr/order_id})', NULL, 0),
                    ('broken', 'ws', 'Broken', 'SELECT {metric/gone} # {metric/revenue}', NULL, 0),
                    ('trusted', 'ws', 'Trusted', 'SELECT {fact/nope}', 1, 0);
                INSERT INTO ldm_columns (dataset_id, id, type, workspace_id) VALUES
                    ('orders', 'amount', 'fact', 'ws'),
                    ('orders', 'order_id', 'attribute', 'ws');
                INSERT INTO visualizations (visualization_id, workspace_id, title, is_valid, is_hidden, content) VALUES
                    ('v_ok', 'ws', 'Ok', NULL, 0,
                     '{"id":"v_ok","content":{"buckets":[{"items":[{"measure":{"definition":{"measureDefinition":{"item":{"identifier":{"id":"avg","type":"metric"}}}}}},{"attribute":{"displayForm":{"identifier":{"id":"order_id","type":"label"}}}}]}]}}'),
                    ('v_bad', 'ws', 'Bad', NULL, 0,
                     '{"id":"v_bad","content":{"buckets":[{"items":[{"measure":{"definition":{"measureDefinition":{"item":{"identifier":{"id":"x","type":"dataset"}}}}}}]}]}}');
                "#,
            )
            .unwrap();
        store
    }

    fn query_pairs(conn: &Connection, sql: &str) -> Vec<(String, String)> {
        let mut stmt = conn.prepare(sql).unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_builtin_manifest_plan() {
        let manifest = Manifest::builtin().unwrap();
        let names: Vec<_> = manifest.plan().unwrap().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "metrics_references",
                "metrics_ancestry",
                "metrics_is_used_maql",
                "metrics_is_valid",
                "v_metrics_duplicates",
                "v_metrics_relationships",
                "v_metrics_relationships_root",
                "v_visualizations_duplicates",
                "visualizations_is_valid",
            ]
        );
    }

    #[test]
    fn test_run_derives_references_and_flags() {
        let mut store = seeded();
        let manifest = Manifest::builtin().unwrap();
        let reports = run(store.connection_mut(), &manifest).unwrap();
        assert_eq!(reports.len(), 9);

        let conn = store.connection();
        let refs = query_pairs(
            conn,
            "SELECT source_metric_id, referenced_id FROM metrics_references ORDER BY 1, 2",
        );
        assert_eq!(
            refs,
            vec![
                ("avg".to_string(), "order_id".to_string()),
                ("avg".to_string(), "revenue".to_string()),
                ("broken".to_string(), "gone".to_string()),
                ("revenue".to_string(), "amount".to_string()),
                ("trusted".to_string(), "nope".to_string()),
            ]
        );

        let ancestry = query_pairs(conn, "SELECT metric_id, ancestor_metric_id FROM metrics_ancestry ORDER BY 1");
        assert_eq!(
            ancestry,
            vec![
                ("avg".to_string(), "revenue".to_string()),
                ("broken".to_string(), "gone".to_string()),
            ]
        );

        let validity: Vec<(String, Option<bool>, bool)> = conn
            .prepare("SELECT metric_id, is_valid, is_used_maql FROM metrics ORDER BY metric_id")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(
            validity,
            vec![
                ("avg".to_string(), Some(true), false),
                ("broken".to_string(), Some(false), false),
                ("revenue".to_string(), Some(true), true),
                ("trusted".to_string(), Some(true), false),
            ]
        );

        let visualizations = query_pairs(
            conn,
            "SELECT visualization_id, CAST(is_valid AS TEXT) FROM visualizations ORDER BY 1",
        );
        assert_eq!(
            visualizations,
            vec![
                ("v_bad".to_string(), "0".to_string()),
                ("v_ok".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_views() {
        let mut store = seeded();
        run(store.connection_mut(), &Manifest::builtin().unwrap()).unwrap();
        let conn = store.connection();

        let statuses = query_pairs(
            conn,
            "SELECT source_metric_id || '->' || referenced_metric_id, reference_status
             FROM v_metrics_relationships ORDER BY 1",
        );
        assert_eq!(
            statuses,
            vec![
                ("avg->revenue".to_string(), "EXISTS".to_string()),
                ("broken->gone".to_string(), "NOT_FOUND".to_string()),
            ]
        );

        let roots = query_pairs(
            conn,
            "SELECT metric_id, workspace_id FROM v_metrics_relationships_root ORDER BY 1",
        );
        let roots: Vec<_> = roots.into_iter().map(|(id, _)| id).collect();
        assert_eq!(roots, vec!["revenue", "trusted"]);
    }

    #[test]
    fn test_root_view_keeps_base_metric_drops_derived() {
        let mut store = Store::open_in_memory().unwrap();
        store.reset_schema().unwrap();
        store
            .connection()
            .execute_batch(
                "INSERT INTO metrics (metric_id, workspace_id, title, maql) VALUES
                    ('metric_total_revenue', 'ws', 'Total Revenue', 'SELECT SUM({fact/amount})'),
                    ('metric_avg_order_value', 'ws', 'Avg Order Value', 'SELECT {metric/metric_total_revenue} / 2');",
            )
            .unwrap();
        run(store.connection_mut(), &Manifest::builtin().unwrap()).unwrap();

        let roots: Vec<String> = store
            .connection()
            .prepare("SELECT metric_id FROM v_metrics_relationships_root")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert!(roots.contains(&"metric_total_revenue".to_string()));
        assert!(!roots.contains(&"metric_avg_order_value".to_string()));
    }

    #[test]
    fn test_duplicate_views() {
        let mut store = seeded();
        store
            .connection()
            .execute_batch(
                r#"
                INSERT INTO metrics (metric_id, workspace_id, title, maql) VALUES
                    ('revenue_copy', 'ws', 'Revenue (copy)', '  SELECT SUM({fact/amount})'),
                    ('revenue_elsewhere', 'other', 'Revenue', 'SELECT SUM({fact/amount})'),
                    ('empty_a', 'ws', 'A', ''),
                    ('empty_b', 'ws', 'B', '');
                INSERT INTO visualizations (visualization_id, workspace_id, title, content) VALUES
                    ('v_ok_copy', 'ws', 'Ok copy',
                     '{"id":"v_ok_copy","title":"Ok copy","content":{"buckets":[{"items":[{"measure":{"definition":{"measureDefinition":{"item":{"identifier":{"id":"avg","type":"metric"}}}}}},{"attribute":{"displayForm":{"identifier":{"id":"order_id","type":"label"}}}}]}]}}');
                "#,
            )
            .unwrap();
        run(store.connection_mut(), &Manifest::builtin().unwrap()).unwrap();
        let conn = store.connection();

        let metrics = query_pairs(conn, "SELECT metric_id, duplicate_metric_id FROM v_metrics_duplicates");
        assert_eq!(metrics, vec![("revenue".to_string(), "revenue_copy".to_string())]);

        let visualizations = query_pairs(
            conn,
            "SELECT visualization_id, duplicate_visualization_id FROM v_visualizations_duplicates",
        );
        assert_eq!(visualizations, vec![("v_ok".to_string(), "v_ok_copy".to_string())]);
    }

    #[test]
    fn test_undecodable_visualization_flagged_not_fatal() {
        let mut store = seeded();
        store
            .connection()
            .execute_batch(
                r#"
                INSERT INTO visualizations (visualization_id, workspace_id, title, content) VALUES
                    ('v_truncated', 'ws', 'Truncated', '{"id":"v_truncated","content":{"buck'),
                    ('v_wrong_shape', 'ws', 'Wrong shape', '{"id":"v_wrong_shape","content":{"buckets":"not a list"}}');
                "#,
            )
            .unwrap();

        let observer = CollectingObserver::new();
        let options = RunOptions {
            observer: &observer,
            ..Default::default()
        };
        run_with(store.connection_mut(), &Manifest::builtin().unwrap(), &options).unwrap();

        let flags = query_pairs(
            store.connection(),
            "SELECT visualization_id, CAST(is_valid AS TEXT) FROM visualizations
             WHERE visualization_id IN ('v_truncated', 'v_wrong_shape') ORDER BY 1",
        );
        assert_eq!(
            flags,
            vec![
                ("v_truncated".to_string(), "0".to_string()),
                ("v_wrong_shape".to_string(), "0".to_string()),
            ]
        );

        let diagnostics = observer.take();
        let undecodable: Vec<_> = diagnostics
            .with_code(DiagnosticCode::UndecodableVisualization)
            .map(|d| d.subject.as_str())
            .collect();
        assert_eq!(undecodable, vec!["v_truncated", "v_wrong_shape"]);
    }

    #[test]
    fn test_unresolved_visualization_references_reported() {
        let mut store = seeded();
        let observer = CollectingObserver::new();
        let options = RunOptions {
            observer: &observer,
            ..Default::default()
        };
        run_with(store.connection_mut(), &Manifest::builtin().unwrap(), &options).unwrap();

        let diagnostics = observer.take();
        let unresolved: Vec<_> = diagnostics
            .with_code(DiagnosticCode::UnresolvedVisualizationReference)
            .collect();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].subject, "v_bad");
        assert_eq!(unresolved[0].context, vec!["unknown x".to_string()]);
    }

    #[test]
    fn test_scoped_run_leaves_other_workspaces_alone() {
        let mut store = seeded();
        store
            .connection()
            .execute_batch(
                "INSERT INTO metrics (metric_id, workspace_id, title, maql) VALUES
                    ('child_metric', 'child', 'Child', 'SELECT {metric/revenue}');
                 INSERT INTO visualizations (visualization_id, workspace_id, title, content) VALUES
                    ('child_viz', 'child', 'Child', '{\"id\":\"child_viz\",\"content\":{}}');",
            )
            .unwrap();

        let options = RunOptions {
            workspace_id: Some("ws".to_string()),
            ..Default::default()
        };
        run_with(store.connection_mut(), &Manifest::builtin().unwrap(), &options).unwrap();
        let conn = store.connection();

        let child_refs: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM metrics_references WHERE source_workspace_id = 'child'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(child_refs, 0);

        let child_flags: (Option<bool>, Option<bool>) = conn
            .query_row(
                "SELECT is_valid, is_used_maql FROM metrics WHERE metric_id = 'child_metric'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(child_flags, (None, None));

        let child_viz: Option<bool> = conn
            .query_row(
                "SELECT is_valid FROM visualizations WHERE visualization_id = 'child_viz'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(child_viz, None);

        let parent: Option<bool> = conn
            .query_row("SELECT is_valid FROM metrics WHERE metric_id = 'avg'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(parent, Some(true));
    }

    #[test]
    fn test_script_parameters_substituted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("labels.sql"),
            "DROP TABLE IF EXISTS export_labels;
             CREATE TABLE export_labels AS
             SELECT '{workspace_id}' AS workspace_id, '{owner}' AS owner, '{token}' AS token, '{unset}' AS unset;",
        )
        .unwrap();
        fs::write(
            dir.path().join("enrichment.toml"),
            r#"
            [[artifact]]
            name = "export_labels"
            kind = "table"
            sql_file = "labels.sql"
            parameters = { workspace_id = "{{WORKSPACE_ID}}", owner = "analytics", token = "$${TOKEN}", unset = "{{NOT_SET}}" }
            "#,
        )
        .unwrap();

        let mut store = seeded();
        let manifest = Manifest::from_path(&dir.path().join("enrichment.toml")).unwrap();
        let options = RunOptions {
            values: [("WORKSPACE_ID".to_string(), "ws".to_string())].into_iter().collect(),
            ..Default::default()
        };
        run_with(store.connection_mut(), &manifest, &options).unwrap();

        let row: (String, String, String, String) = store
            .connection()
            .query_row("SELECT workspace_id, owner, token, unset FROM export_labels", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .unwrap();
        assert_eq!(
            row,
            (
                "ws".to_string(),
                "analytics".to_string(),
                "${TOKEN}".to_string(),
                "{unset}".to_string()
            )
        );
    }

    #[test]
    fn test_run_is_repeatable() {
        let mut store = seeded();
        let manifest = Manifest::builtin().unwrap();
        run(store.connection_mut(), &manifest).unwrap();
        run(store.connection_mut(), &manifest).unwrap();

        let count: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM metrics_references", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_failed_step_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.sql"), "CREATE TABLE side_effect (x INTEGER); SELECT * FROM nowhere;").unwrap();
        fs::write(
            dir.path().join("enrichment.toml"),
            r#"
            [[artifact]]
            name = "metrics_references"
            kind = "table"
            builtin = "metrics_references"

            [[artifact]]
            name = "z_bad"
            kind = "procedure"
            dependencies = ["metrics_references"]
            sql_file = "bad.sql"
            "#,
        )
        .unwrap();

        let mut store = seeded();
        let manifest = Manifest::from_path(&dir.path().join("enrichment.toml")).unwrap();
        let err = run(store.connection_mut(), &manifest).unwrap_err();
        match err {
            ExportError::StepFailed { name, .. } => assert_eq!(name, "z_bad"),
            other => panic!("unexpected error: {other}"),
        }

        let tables: i64 = store
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name IN ('side_effect', 'metrics_references')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn test_manifest_errors_before_running() {
        let missing = Manifest::parse(
            r#"
            [[artifact]]
            name = "a"
            kind = "view"
            dependencies = ["b"]
            sql_file = "a.sql"
            "#,
            None,
        )
        .unwrap();
        assert!(matches!(missing.plan(), Err(ExportError::MissingDependency { .. })));

        let both = Manifest::parse(
            r#"
            [[artifact]]
            name = "a"
            kind = "view"
            sql_file = "a.sql"
            builtin = "metrics_references"
            "#,
            None,
        );
        assert!(matches!(both, Err(ExportError::InvalidManifest(_))));

        let unknown = Manifest::parse(
            r#"
            [[artifact]]
            name = "a"
            kind = "update"
            builtin = "not_a_step"
            "#,
            None,
        );
        assert!(matches!(unknown, Err(ExportError::InvalidManifest(_))));
    }

    #[test]
    fn test_ensure_columns_exist_adds_once() {
        let store = seeded();
        let columns = vec![RequiredColumn {
            name: "is_used_maql".to_string(),
            sql_type: "BOOLEAN".to_string(),
        }];
        ensure_columns_exist(store.connection(), "metrics", &columns).unwrap();
        ensure_columns_exist(store.connection(), "metrics", &columns).unwrap();

        let present: i64 = store
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('metrics') WHERE name = 'is_used_maql'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(present, 1);
    }
}
