//! GoodData Layout Export
//!
//! Exports GoodData workspace layout snapshots (analytics model and logical
//! data model) into SQLite and CSV, then derives relationships, validity
//! flags and dependency signals from the exported tables alone.
//!
//! ## Features
//!
//! - **Layout Traversal**: Tabbed and legacy dashboards, nested layouts, switchers
//! - **Rich-Text References**: Insight and metric ids recovered from free text
//! - **MAQL References**: Comment-aware `{type/id}` scanning with self-reference exclusion
//! - **Offline Validity**: Metrics and visualizations resolved against the exported schema
//! - **Enrichment Batch**: Dependency-ordered tables, views and updates in one transaction
//!
//! ## Architecture
//!
//! ```text
//! snapshot.json ──► layout ──► process ───────────────┐
//!                     │                               ▼
//!                     └──► relationships ◄── extract  store ──► enrich ──► maql
//!                                                     │                    validity
//!                                                     └──► csv
//! ```

pub mod config;
pub mod diagnostics;
pub mod enrich;
pub mod error;
pub mod export;
pub mod extract;
pub mod layout;
pub mod maql;
pub mod process;
pub mod relationships;
pub mod store;
pub mod validity;

pub use config::ExportConfig;
pub use diagnostics::{CollectingObserver, DiagnosticCode, DiagnosticItem, ExtractionObserver, TracingObserver};
pub use enrich::{execution_order, Manifest, RunOptions};
pub use error::{ExportError, Result};
pub use export::{export_layouts, load_layouts, run_export, ExportSummary};
pub use extract::{ReferenceResolver, ResolverConfig, TargetKind};
pub use layout::{walk, LayoutSnapshot, TraversalConfig, Widget};
pub use maql::{MaqlReference, MaqlScanner, ReferenceType};
pub use relationships::{aggregate, DashboardRelationships, ExtractionContext, KnownIdentifiers};
pub use store::Store;
