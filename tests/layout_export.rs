//! End-to-end Export Tests
//!
//! Exports the sample snapshot into a temporary database and checks the
//! primary tables, dashboard relationships and enrichment results.

use std::fs;
use std::path::{Path, PathBuf};

use gooddata_export::diagnostics::{CollectingObserver, DiagnosticCode, Severity};
use gooddata_export::export::{export_layouts, load_layouts};
use gooddata_export::{ExportConfig, ExportSummary};
use rusqlite::Connection;
use tempfile::TempDir;

const SAMPLE_LAYOUT: &str = include_str!("fixtures/sample_layout.json");

struct Exported {
    _dir: TempDir,
    layout: PathBuf,
    db: PathBuf,
    csv_dir: PathBuf,
    summary: ExportSummary,
    observer: CollectingObserver,
}

fn export_sample(configure: impl FnOnce(&mut ExportConfig)) -> Exported {
    let dir = tempfile::tempdir().unwrap();
    let layout = dir.path().join("sales.json");
    fs::write(&layout, SAMPLE_LAYOUT).unwrap();

    let db = dir.path().join("out/db/export.db");
    let csv_dir = dir.path().join("out/csv");
    let mut config = ExportConfig::default();
    config.export.db_path = db.clone();
    config.export.csv_dir = Some(csv_dir.clone());
    configure(&mut config);

    let loaded = load_layouts(&layout, config.export.workspace_id.as_deref()).unwrap();
    let observer = CollectingObserver::new();
    let summary = export_layouts(&loaded, &config, &observer).unwrap();

    Exported {
        _dir: dir,
        layout,
        db,
        csv_dir,
        summary,
        observer,
    }
}

fn open(db: &Path) -> Connection {
    Connection::open(db).unwrap()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}

fn strings(conn: &Connection, sql: &str) -> Vec<String> {
    let mut stmt = conn.prepare(sql).unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn pairs(conn: &Connection, sql: &str) -> Vec<(String, String)> {
    let mut stmt = conn.prepare(sql).unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

// =============================================================================
// Primary Tables
// =============================================================================

#[test]
fn test_primary_tables_populated() {
    let exported = export_sample(|_| {});
    let conn = open(&exported.db);

    assert_eq!(exported.summary.primary_workspace_id, "sales");
    assert_eq!(count(&conn, "workspaces"), 1);
    assert_eq!(count(&conn, "metrics"), 5);
    assert_eq!(count(&conn, "visualizations"), 3);
    assert_eq!(count(&conn, "dashboards"), 2);
    assert_eq!(count(&conn, "dashboards_permissions"), 2);
    assert_eq!(count(&conn, "plugins"), 1);
    assert_eq!(count(&conn, "ldm_datasets"), 2);
    assert_eq!(count(&conn, "ldm_columns"), 5);
    assert_eq!(count(&conn, "ldm_labels"), 2);
    assert_eq!(count(&conn, "filter_contexts"), 1);
    assert_eq!(count(&conn, "filter_context_fields"), 2);

    let tags = strings(&conn, "SELECT tags FROM metrics WHERE metric_id = 'metric_total_revenue'");
    assert_eq!(tags, vec![r#"["finance","sales"]"#]);

    let filter_context = strings(&conn, "SELECT filter_context_id FROM dashboards WHERE dashboard_id = 'dash_tabbed'");
    assert_eq!(filter_context, vec!["fc_main"]);
}

#[test]
fn test_run_metadata_recorded() {
    let exported = export_sample(|_| {});
    let conn = open(&exported.db);

    let metadata = pairs(&conn, "SELECT key, value FROM dictionary_metadata ORDER BY key");
    let keys: Vec<_> = metadata.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        keys,
        vec!["export_mode", "exporter_version", "last_updated", "snapshot_hash", "workspace_id"]
    );
    assert!(metadata.contains(&("export_mode".to_string(), "local".to_string())));
    assert!(metadata.contains(&("workspace_id".to_string(), "sales".to_string())));
}

// =============================================================================
// Dashboard Relationships
// =============================================================================

#[test]
fn test_dashboard_visualizations_tabs_switchers_and_rich_text() {
    let exported = export_sample(|_| {});
    let conn = open(&exported.db);

    let mut stmt = conn
        .prepare(
            "SELECT dashboard_id, visualization_id, tab_id, from_rich_text, widget_type, switcher_local_identifier
             FROM dashboards_visualizations
             ORDER BY dashboard_id, visualization_id, from_rich_text",
        )
        .unwrap();
    let rows: Vec<(String, String, Option<String>, i64, String, Option<String>)> = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    let expected = vec![
        ("dash_legacy", "viz_orders_table", None, 0, "visualizationSwitcher", Some("w_switch")),
        ("dash_legacy", "viz_revenue_trend", None, 0, "visualizationSwitcher", Some("w_switch")),
        ("dash_tabbed", "viz_broken", Some("tab_details"), 1, "richText", None),
        ("dash_tabbed", "viz_orders_table", Some("tab_overview"), 0, "insight", None),
        ("dash_tabbed", "viz_revenue_trend", Some("tab_overview"), 0, "insight", None),
    ];
    let expected: Vec<_> = expected
        .into_iter()
        .map(|(d, v, t, r, w, s)| {
            (
                d.to_string(),
                v.to_string(),
                t.map(str::to_string),
                r,
                w.to_string(),
                s.map(str::to_string),
            )
        })
        .collect();
    assert_eq!(rows, expected);
}

#[test]
fn test_dashboard_metrics_plugins_and_widget_filters() {
    let exported = export_sample(|_| {});
    let conn = open(&exported.db);

    assert_eq!(
        pairs(&conn, "SELECT dashboard_id, metric_id FROM dashboards_metrics"),
        vec![("dash_tabbed".to_string(), "metric_avg_order_value".to_string())]
    );
    assert_eq!(
        pairs(&conn, "SELECT dashboard_id, plugin_id FROM dashboards_plugins"),
        vec![("dash_tabbed".to_string(), "plugin_export".to_string())]
    );
    assert_eq!(
        pairs(
            &conn,
            "SELECT filter_type, reference_id FROM dashboards_widget_filters ORDER BY filter_type"
        ),
        vec![
            ("dateDataSet".to_string(), "orders_date".to_string()),
            ("ignoreDashboardFilters".to_string(), "customer_id.name".to_string()),
        ]
    );
}

#[test]
fn test_rich_text_disabled() {
    let exported = export_sample(|config| config.export.enable_rich_text_extraction = false);
    let conn = open(&exported.db);

    assert_eq!(count(&conn, "dashboards_metrics"), 0);
    let rich: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM dashboards_visualizations WHERE from_rich_text = 1",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(rich, 0);
    assert_eq!(count(&conn, "dashboards_visualizations"), 4);
}

// =============================================================================
// Enrichment
// =============================================================================

#[test]
fn test_metrics_references_strip_comments_and_self_references() {
    let exported = export_sample(|_| {});
    let conn = open(&exported.db);

    let refs = strings(
        &conn,
        "SELECT source_metric_id || ' -> ' || reference_type || ':' || referenced_id
         FROM metrics_references ORDER BY 1",
    );
    assert_eq!(
        refs,
        vec![
            "metric_avg_order_value -> attribute:order_id",
            "metric_avg_order_value -> metric:metric_total_revenue",
            "metric_broken -> metric:metric_missing",
            "metric_margin -> metric:metric_total_revenue",
            "metric_order_count -> attribute:order_id",
            "metric_total_revenue -> fact:revenue",
        ]
    );

    let ancestry = pairs(
        &conn,
        "SELECT metric_id, ancestor_metric_id FROM metrics_ancestry ORDER BY metric_id",
    );
    assert_eq!(
        ancestry,
        vec![
            ("metric_avg_order_value".to_string(), "metric_total_revenue".to_string()),
            ("metric_broken".to_string(), "metric_missing".to_string()),
            ("metric_margin".to_string(), "metric_total_revenue".to_string()),
        ]
    );
}

#[test]
fn test_usage_and_validity_flags() {
    let exported = export_sample(|_| {});
    let conn = open(&exported.db);

    let used = strings(&conn, "SELECT metric_id FROM metrics WHERE is_used_maql = 1");
    assert_eq!(used, vec!["metric_total_revenue"]);

    let invalid_metrics = strings(&conn, "SELECT metric_id FROM metrics WHERE is_valid = 0");
    assert_eq!(invalid_metrics, vec!["metric_broken"]);
    assert_eq!(
        strings(&conn, "SELECT metric_id FROM metrics WHERE is_valid IS NULL"),
        Vec::<String>::new()
    );

    let invalid_visualizations = strings(&conn, "SELECT visualization_id FROM visualizations WHERE is_valid = 0");
    assert_eq!(invalid_visualizations, vec!["viz_broken"]);
    let valid_visualizations = strings(
        &conn,
        "SELECT visualization_id FROM visualizations WHERE is_valid = 1 ORDER BY visualization_id",
    );
    assert_eq!(valid_visualizations, vec!["viz_orders_table", "viz_revenue_trend"]);
}

#[test]
fn test_relationship_views() {
    let exported = export_sample(|_| {});
    let conn = open(&exported.db);

    let statuses = pairs(
        &conn,
        "SELECT source_metric_id || '->' || referenced_metric_id, reference_status
         FROM v_metrics_relationships ORDER BY 1",
    );
    assert_eq!(
        statuses,
        vec![
            ("metric_avg_order_value->metric_total_revenue".to_string(), "EXISTS".to_string()),
            ("metric_broken->metric_missing".to_string(), "NOT_FOUND".to_string()),
            ("metric_margin->metric_total_revenue".to_string(), "EXISTS".to_string()),
        ]
    );

    let roots = strings(&conn, "SELECT metric_id FROM v_metrics_relationships_root ORDER BY metric_id");
    assert_eq!(roots, vec!["metric_order_count", "metric_total_revenue"]);
    assert_eq!(count(&conn, "v_metrics_duplicates"), 0);
}

#[test]
fn test_skip_enrichment_leaves_flags_unset() {
    let exported = export_sample(|config| config.enrichment.enabled = false);
    let conn = open(&exported.db);

    assert!(exported.summary.enrichment.is_empty());
    let unflagged = strings(&conn, "SELECT metric_id FROM metrics WHERE is_valid IS NULL");
    assert_eq!(unflagged.len(), 5);
    let derived: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'metrics_references'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(derived, 0);
}

// =============================================================================
// Outputs
// =============================================================================

#[test]
fn test_csv_files_written() {
    let exported = export_sample(|_| {});
    assert_eq!(exported.summary.csv_files, 17);

    let metrics = fs::read_to_string(exported.csv_dir.join("gooddata_metrics.csv")).unwrap();
    let mut lines = metrics.lines();
    assert_eq!(
        lines.next(),
        Some("metric_id,workspace_id,title,description,tags,maql,format,is_valid,is_hidden")
    );
    assert_eq!(lines.count(), 5);

    let relationships = fs::read_to_string(exported.csv_dir.join("gooddata_dashboards_visualizations.csv")).unwrap();
    assert!(relationships.starts_with("dashboard_id,visualization_id,tab_id,from_rich_text,"));
}

#[test]
fn test_export_is_repeatable() {
    let first = export_sample(|_| {});
    let conn = open(&first.db);
    let before = strings(
        &conn,
        "SELECT dashboard_id || '|' || visualization_id || '|' || IFNULL(tab_id, '') || '|' || from_rich_text
         FROM dashboards_visualizations",
    );
    drop(conn);

    let loaded = load_layouts(&first.layout, None).unwrap();
    let mut config = ExportConfig::default();
    config.export.db_path = first.db.clone();
    export_layouts(&loaded, &config, &CollectingObserver::new()).unwrap();

    let conn = open(&first.db);
    let after = strings(
        &conn,
        "SELECT dashboard_id || '|' || visualization_id || '|' || IFNULL(tab_id, '') || '|' || from_rich_text
         FROM dashboards_visualizations",
    );
    assert_eq!(before, after);
    assert_eq!(count(&conn, "metrics_references"), 6);
}

#[test]
fn test_only_warning_is_broken_visualization() {
    let exported = export_sample(|_| {});
    let diagnostics = exported.observer.take();

    let warnings: Vec<_> = diagnostics.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, DiagnosticCode::UnresolvedVisualizationReference);
    assert_eq!(warnings[0].subject, "viz_broken");
    assert_eq!(warnings[0].context, vec!["fact missing_fact".to_string()]);

    assert!(diagnostics
        .all()
        .iter()
        .filter(|d| d.subject != "viz_broken")
        .all(|d| d.severity() == Severity::Info));
}
