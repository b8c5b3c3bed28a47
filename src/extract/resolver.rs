//! Reference Resolution
//!
//! Turns tokens found in free text into identifiers of insights or metrics.
//! With a known-identifier set only existing ids are accepted; without one
//! identifier-shaped values are accepted, falling back to UUIDs found near
//! a reference keyword.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use super::tokens::TokenScanner;
use crate::diagnostics::{DiagnosticCode, DiagnosticItem, ExtractionObserver};
use crate::error::Result;

/// Curly-brace tags that reference an insight
pub const INSIGHT_PREFIXES: &[&str] = &[
    "insightFirstAttribute",
    "insightFirstMeasure",
    "insightFirstMeasureChange",
    "comparisonFromInsightMeasure",
    "insightFirstTotal",
    "insightMeasure",
    "insightAttribute",
    "insightTotal",
];

/// Curly-brace tags that reference a metric
pub const METRIC_PREFIXES: &[&str] = &[
    "measure",
    "measureChange",
    "measureValue",
    "measureTotal",
    "measuresComparison",
    "measuresShareComparison",
];

/// Substrings that make an arbitrary widget `content` worth scanning for metrics
pub const METRIC_TRIGGERS: &[&str] = &[
    "measureChange",
    "measuresComparison",
    "measureValue",
    "measuresShareComparison",
    "measureTotal",
    "measure:",
];

/// What a scan is looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Insight,
    Metric,
}

impl TargetKind {
    pub fn prefixes(&self) -> &'static [&'static str] {
        match self {
            Self::Insight => INSIGHT_PREFIXES,
            Self::Metric => METRIC_PREFIXES,
        }
    }

    /// Substrings that trigger a scan of non-rich-text widget content
    pub fn triggers(&self) -> &'static [&'static str] {
        match self {
            Self::Insight => INSIGHT_PREFIXES,
            Self::Metric => METRIC_TRIGGERS,
        }
    }

    pub fn is_triggered_by(&self, text: &str) -> bool {
        self.triggers().iter().any(|t| text.contains(t))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insight => "insights",
            Self::Metric => "metrics",
        }
    }
}

/// Heuristic constants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Characters before a keyword searched in proximity fallback
    pub proximity_before: usize,
    /// Characters after a keyword searched in proximity fallback
    pub proximity_after: usize,
    /// Minimum length of a hyphenated curly value in heuristic mode
    pub min_identifier_len: usize,
    /// Legacy metric id marker
    pub legacy_metric_marker: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            proximity_before: 50,
            proximity_after: 100,
            min_identifier_len: 36,
            legacy_metric_marker: "_-_".to_string(),
        }
    }
}

/// How a scan decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMode {
    KnownSet,
    Heuristic,
    Proximity,
}

/// Outcome of resolving one text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub ids: BTreeSet<String>,
    pub mode: ResolutionMode,
}

/// Dashboard to target reference found in text
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolvedReference {
    pub dashboard_id: String,
    pub target_id: String,
}

/// Token scanner plus resolution policy
#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    scanner: TokenScanner,
    config: ResolverConfig,
}

impl ReferenceResolver {
    pub fn new(config: ResolverConfig) -> Result<Self> {
        Ok(Self {
            scanner: TokenScanner::new()?,
            config,
        })
    }

    pub fn scanner(&self) -> &TokenScanner {
        &self.scanner
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `text` for `kind`. An empty `known` set counts as absent.
    pub fn resolve(
        &self,
        text: &str,
        kind: TargetKind,
        known: Option<&HashSet<String>>,
    ) -> Resolution {
        if text.is_empty() {
            return Resolution {
                ids: BTreeSet::new(),
                mode: ResolutionMode::KnownSet,
            };
        }

        match known.filter(|k| !k.is_empty()) {
            Some(known) => Resolution {
                ids: self.resolve_known(text, kind, known),
                mode: ResolutionMode::KnownSet,
            },
            None => self.resolve_heuristic(text, kind),
        }
    }

    /// Resolve and tag with the owning dashboard, reporting the decision
    pub fn resolve_for(
        &self,
        dashboard_id: &str,
        text: &str,
        kind: TargetKind,
        known: Option<&HashSet<String>>,
        observer: &dyn ExtractionObserver,
    ) -> Vec<ResolvedReference> {
        let resolution = self.resolve(text, kind, known);

        if !text.is_empty() {
            let code = match resolution.mode {
                ResolutionMode::KnownSet => DiagnosticCode::KnownSetExtraction,
                ResolutionMode::Heuristic => DiagnosticCode::HeuristicExtraction,
                ResolutionMode::Proximity => DiagnosticCode::ProximityFallback,
            };
            observer.report(
                DiagnosticItem::new(
                    dashboard_id,
                    code,
                    format!("{} {} found", resolution.ids.len(), kind.as_str()),
                )
                .with_context(format!("content length: {}", text.len()))
                .with_context(format!("known identifiers: {}", known.map_or(0, HashSet::len))),
            );
        }

        resolution
            .ids
            .into_iter()
            .map(|target_id| ResolvedReference {
                dashboard_id: dashboard_id.to_string(),
                target_id,
            })
            .collect()
    }

    fn resolve_known(&self, text: &str, kind: TargetKind, known: &HashSet<String>) -> BTreeSet<String> {
        let prefixes = kind.prefixes();

        let mut candidates: Vec<String> = self
            .scanner
            .curly_tokens(text)
            .into_iter()
            .filter(|t| prefixes.contains(&t.tag.as_str()))
            .map(|t| t.value)
            .collect();

        if kind == TargetKind::Metric {
            candidates.extend(
                self.scanner
                    .quoted_identifiers(text, &self.config.legacy_metric_marker),
            );
        }

        candidates
            .into_iter()
            .chain(self.scanner.uuids(text))
            .filter(|id| known.contains(id))
            .collect()
    }

    fn resolve_heuristic(&self, text: &str, kind: TargetKind) -> Resolution {
        let prefixes = kind.prefixes();
        let marker = self.config.legacy_metric_marker.as_str();

        let mut ids: BTreeSet<String> = self
            .scanner
            .curly_tokens(text)
            .into_iter()
            .filter(|t| prefixes.contains(&t.tag.as_str()))
            .filter(|t| {
                self.looks_like_identifier(&t.value)
                    || (kind == TargetKind::Metric && !marker.is_empty() && t.value.contains(marker))
            })
            .map(|t| t.value)
            .collect();

        if kind == TargetKind::Metric {
            ids.extend(self.scanner.quoted_identifiers(text, marker));
        }

        if !ids.is_empty() {
            return Resolution {
                ids,
                mode: ResolutionMode::Heuristic,
            };
        }

        let ids = self.near_keywords(text, prefixes);
        let mode = if ids.is_empty() {
            ResolutionMode::Heuristic
        } else {
            ResolutionMode::Proximity
        };
        Resolution { ids, mode }
    }

    fn looks_like_identifier(&self, value: &str) -> bool {
        value.contains('-') && value.len() >= self.config.min_identifier_len
    }

    /// UUIDs lying inside the window around the first occurrence of each keyword
    fn near_keywords(&self, text: &str, keywords: &[&str]) -> BTreeSet<String> {
        let uuids = self.scanner.uuids(text);
        let mut found = BTreeSet::new();
        if uuids.is_empty() {
            return found;
        }

        for keyword in keywords {
            let Some(pos) = text.find(keyword) else {
                continue;
            };
            let start = char_boundary_at_or_before(text, pos.saturating_sub(self.config.proximity_before));
            let end = char_boundary_at_or_before(text, (pos + self.config.proximity_after).min(text.len()));
            let window = &text[start..end];

            for id in &uuids {
                if window.contains(id.as_str()) {
                    found.insert(id.clone());
                }
            }
        }

        found
    }
}

fn char_boundary_at_or_before(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
