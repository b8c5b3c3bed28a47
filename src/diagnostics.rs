//! Diagnostics
//!
//! Extraction passes and the enrichment batch report what they saw through an injected
//! [`ExtractionObserver`] instead of writing side files. Tests use
//! [`CollectingObserver`] to assert on emitted diagnostics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

// =============================================================================
// Diagnostic Codes
// =============================================================================

/// Diagnostic code for categorizing extraction events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    // === Layout ===
    /// Nested layout deeper than the traversal bound, skipped
    LayoutDepthExceeded,
    /// Dashboard content could not be decoded as a layout
    UndecodableLayout,

    // === Validity ===
    /// Stored visualization content could not be decoded
    UndecodableVisualization,
    /// Visualization references objects missing from its workspace
    UnresolvedVisualizationReference,

    // === Rich text ===
    /// Free text scanned against a known-identifier set
    KnownSetExtraction,
    /// Free text scanned without a known-identifier set
    HeuristicExtraction,
    /// Proximity-window fallback produced matches
    ProximityFallback,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LayoutDepthExceeded => "W001",
            Self::UndecodableLayout => "W002",
            Self::UndecodableVisualization => "W003",
            Self::UnresolvedVisualizationReference => "W004",
            Self::KnownSetExtraction => "I001",
            Self::HeuristicExtraction => "I002",
            Self::ProximityFallback => "I003",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::LayoutDepthExceeded
            | Self::UndecodableLayout
            | Self::UndecodableVisualization
            | Self::UnresolvedVisualizationReference => Severity::Warning,

            Self::KnownSetExtraction | Self::HeuristicExtraction | Self::ProximityFallback => {
                Severity::Info
            }
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// A single diagnostic item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticItem {
    /// Dashboard (or other object) the event belongs to
    pub subject: String,
    pub code: DiagnosticCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl DiagnosticItem {
    pub fn new(subject: impl Into<String>, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            code,
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({})",
            self.code,
            self.code.severity(),
            self.message,
            self.subject
        )?;

        for ctx in &self.context {
            write!(f, "\n  - {}", ctx)?;
        }

        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Collection of diagnostics from an extraction pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: DiagnosticItem) {
        self.items.push(item);
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Warning)
    }

    pub fn with_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(move |i| i.code == code)
    }

    pub fn all(&self) -> &[DiagnosticItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// Observers
// =============================================================================

/// Sink for extraction diagnostics, shared across worker threads
pub trait ExtractionObserver: Send + Sync {
    fn report(&self, item: DiagnosticItem);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ExtractionObserver for NoopObserver {
    fn report(&self, _item: DiagnosticItem) {}
}

/// Forwards diagnostics to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ExtractionObserver for TracingObserver {
    fn report(&self, item: DiagnosticItem) {
        match item.severity() {
            Severity::Warning => tracing::warn!(code = %item.code, subject = %item.subject, "{}", item.message),
            Severity::Info => tracing::debug!(code = %item.code, subject = %item.subject, context = ?item.context, "{}", item.message),
        }
    }
}

/// Keeps diagnostics in memory
#[derive(Debug, Default)]
pub struct CollectingObserver {
    items: Mutex<Diagnostics>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything reported so far
    pub fn take(&self) -> Diagnostics {
        match self.items.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl ExtractionObserver for CollectingObserver {
    fn report(&self, item: DiagnosticItem) {
        match self.items.lock() {
            Ok(mut guard) => guard.push(item),
            Err(poisoned) => poisoned.into_inner().push(item),
        }
    }
}
