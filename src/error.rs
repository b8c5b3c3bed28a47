//! Error types for the exporter

use thiserror::Error;

/// Result type for export operations
pub type Result<T> = std::result::Result<T, ExportError>;

/// Export and enrichment errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Item '{item}' depends on '{dependency}' which is not registered")]
    MissingDependency { item: String, dependency: String },

    #[error("Circular dependency detected, cannot order: {}", members.join(", "))]
    CycleDetected { members: Vec<String> },

    #[error("Invalid enrichment manifest: {0}")]
    InvalidManifest(String),

    #[error("Enrichment step '{name}' failed: {message}")]
    StepFailed { name: String, message: String },

    #[error("Invalid layout snapshot {path}: {message}")]
    InvalidSnapshot { path: String, message: String },

    #[error("No layout snapshot found at {0}")]
    NoSnapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}
