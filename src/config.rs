//! Configuration management for the exporter
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (gooddata-export.toml)
//! - Environment variables (GOODDATA_EXPORT__*)
//!
//! ## Example config file (gooddata-export.toml):
//! ```toml
//! [export]
//! db_path = "output/db/gooddata_export.db"
//! csv_dir = "output/metadata_csv"
//! workspace_id = "demo"
//! enable_rich_text_extraction = true
//!
//! [extraction]
//! proximity_before = 50
//! proximity_after = 100
//! max_layout_depth = 32
//!
//! [enrichment]
//! enabled = true
//! vacuum = true
//!
//! [enrichment.values]
//! BASE_URL = "https://analytics.example.com"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::extract::ResolverConfig;
use crate::layout::TraversalConfig;

/// Main configuration for an export run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Output settings
    #[serde(default)]
    pub export: OutputConfig,

    /// Reference extraction tuning
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Post-export enrichment
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// CSV output directory, no CSV files when unset
    #[serde(default)]
    pub csv_dir: Option<PathBuf>,

    /// Workspace id of the primary snapshot. Defaults to the snapshot file stem.
    #[serde(default)]
    pub workspace_id: Option<String>,

    /// Extract references from rich-text widgets
    #[serde(default = "default_true")]
    pub enable_rich_text_extraction: bool,

    /// Keep the raw JSON of every object in the `content` columns
    #[serde(default = "default_true")]
    pub store_content: bool,
}

/// Tuning for the rich-text heuristics and layout traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Characters scanned before a keyword in proximity matching
    #[serde(default = "default_proximity_before")]
    pub proximity_before: usize,

    /// Characters scanned after a keyword in proximity matching
    #[serde(default = "default_proximity_after")]
    pub proximity_after: usize,

    /// Minimum length of an identifier-shaped curly value
    #[serde(default = "default_min_identifier_len")]
    pub min_identifier_len: usize,

    /// Marker of the legacy metric naming convention
    #[serde(default = "default_legacy_metric_marker")]
    pub legacy_metric_marker: String,

    /// Maximum nesting of layout widgets
    #[serde(default = "default_max_layout_depth")]
    pub max_layout_depth: usize,
}

/// Enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Run the enrichment batch after export
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Replace the built-in manifest with this file
    #[serde(default)]
    pub manifest: Option<PathBuf>,

    /// Compact the database once enrichment has run
    #[serde(default = "default_true")]
    pub vacuum: bool,

    /// Extra values for `{{KEY}}` script parameters
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

// Default value functions
fn default_db_path() -> PathBuf {
    PathBuf::from("output/db/gooddata_export.db")
}

fn default_true() -> bool {
    true
}

fn default_proximity_before() -> usize {
    50
}

fn default_proximity_after() -> usize {
    100
}

fn default_min_identifier_len() -> usize {
    36
}

fn default_legacy_metric_marker() -> String {
    "_-_".to_string()
}

fn default_max_layout_depth() -> usize {
    32
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            csv_dir: None,
            workspace_id: None,
            enable_rich_text_extraction: true,
            store_content: true,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            proximity_before: default_proximity_before(),
            proximity_after: default_proximity_after(),
            min_identifier_len: default_min_identifier_len(),
            legacy_metric_marker: default_legacy_metric_marker(),
            max_layout_depth: default_max_layout_depth(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            manifest: None,
            vacuum: true,
            values: BTreeMap::new(),
        }
    }
}

impl ExtractionConfig {
    pub fn resolver(&self) -> ResolverConfig {
        ResolverConfig {
            proximity_before: self.proximity_before,
            proximity_after: self.proximity_after,
            min_identifier_len: self.min_identifier_len,
            legacy_metric_marker: self.legacy_metric_marker.clone(),
        }
    }

    pub fn traversal(&self) -> TraversalConfig {
        TraversalConfig {
            max_depth: self.max_layout_depth,
        }
    }
}

impl ExportConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = [
            "gooddata-export.toml",
            ".gooddata-export.toml",
            "config/gooddata-export.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("com", "gooddata", "gooddata-export") {
            let xdg_config = config_dir.config_dir().join("gooddata-export.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (GOODDATA_EXPORT__*)
        builder = builder.add_source(
            Environment::with_prefix("GOODDATA_EXPORT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Rich-text extraction flag for one workspace of a run.
    ///
    /// Only the primary workspace is scanned when several are exported.
    pub fn rich_text_for(&self, is_primary: bool, workspace_count: usize) -> bool {
        self.export.enable_rich_text_extraction && (is_primary || workspace_count <= 1)
    }

    /// Values `{{KEY}}` script parameters resolve against.
    ///
    /// `WORKSPACE_ID` and `DB_PATH` describe the run; configured values
    /// override them.
    pub fn enrichment_values(&self, workspace_id: &str) -> BTreeMap<String, String> {
        let mut values = BTreeMap::from([
            ("WORKSPACE_ID".to_string(), workspace_id.to_string()),
            ("DB_PATH".to_string(), self.export.db_path.display().to_string()),
        ]);
        values.extend(self.enrichment.values.clone());
        values
    }

    /// Workspace the enrichment batch is limited to.
    ///
    /// Several exported workspaces are enriched through the primary one only.
    pub fn enrichment_scope(&self, primary_workspace_id: &str, workspace_count: usize) -> Option<String> {
        (workspace_count > 1).then(|| primary_workspace_id.to_string())
    }
}
