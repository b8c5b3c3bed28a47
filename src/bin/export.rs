//! Layout Export CLI
//!
//! Exports workspace layout snapshots to SQLite and CSV, prints the
//! enrichment plan, or re-runs enrichment on an existing database.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use gooddata_export::diagnostics::TracingObserver;
use gooddata_export::enrich::{self, Manifest, RunOptions};
use gooddata_export::export::run_export;
use gooddata_export::store::Store;
use gooddata_export::ExportConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gooddata-export")]
#[command(about = "Export GoodData layout metadata to SQLite and CSV")]
struct Cli {
    /// Configuration file (defaults to gooddata-export.toml lookup)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a layout snapshot file or a directory of snapshots
    Export {
        /// Snapshot file, or directory walked for *.json
        #[arg(short, long)]
        layout: PathBuf,

        /// SQLite database path
        #[arg(long)]
        db: Option<PathBuf>,

        /// Also write CSV files into this directory
        #[arg(long)]
        csv_dir: Option<PathBuf>,

        /// Primary workspace id
        #[arg(short, long)]
        workspace_id: Option<String>,

        /// Do not scan rich-text widgets for references
        #[arg(long)]
        no_rich_text: bool,

        /// Skip the post-export enrichment batch
        #[arg(long)]
        skip_enrichment: bool,
    },

    /// Print the enrichment execution order
    Plan {
        /// Manifest to plan instead of the built-in one
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },

    /// Run enrichment on an existing export database
    Enrich {
        /// SQLite database path
        #[arg(long)]
        db: PathBuf,

        /// Manifest to run instead of the built-in one
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Only enrich this workspace
        #[arg(short, long)]
        workspace_id: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose && std::env::var_os("RUST_LOG").is_none() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ExportConfig::load_from(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Export {
            layout,
            db,
            csv_dir,
            workspace_id,
            no_rich_text,
            skip_enrichment,
        } => {
            if let Some(db) = db {
                config.export.db_path = db;
            }
            if csv_dir.is_some() {
                config.export.csv_dir = csv_dir;
            }
            if workspace_id.is_some() {
                config.export.workspace_id = workspace_id;
            }
            if no_rich_text {
                config.export.enable_rich_text_extraction = false;
            }
            if skip_enrichment {
                config.enrichment.enabled = false;
            }

            println!("📦 Layout Export");
            println!("  Source: {}", layout.display());
            println!("  Database: {}", config.export.db_path.display());
            println!();

            let summary = run_export(&layout, &config)?;

            println!(
                "✅ Exported {} workspace(s), primary: {}",
                summary.workspaces, summary.primary_workspace_id
            );
            for (table, rows) in &summary.tables {
                println!("   {:<28} {:>6} rows", table, rows);
            }
            if summary.csv_files > 0 {
                if let Some(dir) = &config.export.csv_dir {
                    println!("📄 {} CSV files in {}", summary.csv_files, dir.display());
                }
            }
            if summary.enrichment.is_empty() {
                println!("⏭️  Enrichment skipped");
            } else {
                println!("🔗 Enrichment: {} artifacts", summary.enrichment.len());
            }
        }

        Commands::Plan { manifest } => {
            let manifest = load_manifest(manifest.as_deref().or(config.enrichment.manifest.as_deref()))?;
            println!("📋 Enrichment plan");
            for (idx, artifact) in manifest.plan()?.iter().enumerate() {
                if artifact.dependencies.is_empty() {
                    println!("  {:>2}. [{}] {}", idx + 1, artifact.kind, artifact.name);
                } else {
                    println!(
                        "  {:>2}. [{}] {} (after {})",
                        idx + 1,
                        artifact.kind,
                        artifact.name,
                        artifact.dependencies.join(", ")
                    );
                }
            }
        }

        Commands::Enrich {
            db,
            manifest,
            workspace_id,
        } => {
            if !db.exists() {
                anyhow::bail!("database {} does not exist", db.display());
            }
            let manifest = load_manifest(manifest.as_deref().or(config.enrichment.manifest.as_deref()))?;
            let mut store = Store::open(&db)?;

            let exported_id = store.metadata("workspace_id")?.unwrap_or_default();
            config.export.db_path = db.clone();
            let options = RunOptions {
                values: config.enrichment_values(workspace_id.as_deref().unwrap_or(&exported_id)),
                workspace_id,
                observer: &TracingObserver,
            };

            println!("🔗 Enriching {}", db.display());
            let reports = enrich::run_with(store.connection_mut(), &manifest, &options)?;
            for report in &reports {
                println!("  ✅ [{}] {} ({} rows)", report.kind, report.name, report.rows);
            }
            if config.enrichment.vacuum {
                store.vacuum()?;
            }
        }
    }

    Ok(())
}

fn load_manifest(path: Option<&Path>) -> anyhow::Result<Manifest> {
    Manifest::load(path).with_context(|| match path {
        Some(path) => format!("loading manifest {}", path.display()),
        None => "loading built-in manifest".to_string(),
    })
}
