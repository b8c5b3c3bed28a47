//! MAQL Reference Extraction
//!
//! Static scan of metric formulas for `{metric/id}`, `{fact/id}`,
//! `{attr/id}` and `{label/id}` tokens. Comments are removed first so
//! that commented-out formula text never produces references.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::Result;

/// Kind of object a MAQL token points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Attribute,
    Fact,
    Label,
    Metric,
}

impl ReferenceType {
    /// Token prefix to reference type. `attr` is reported as `attribute`.
    pub fn from_token(prefix: &str) -> Option<Self> {
        match prefix {
            "metric" => Some(Self::Metric),
            "fact" => Some(Self::Fact),
            "attr" => Some(Self::Attribute),
            "label" => Some(Self::Label),
            _ => None,
        }
    }

    /// Stored `reference_type` value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Fact => "fact",
            Self::Attribute => "attribute",
            Self::Label => "label",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "attribute" => Some(Self::Attribute),
            other => Self::from_token(other),
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `metrics_references` row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaqlReference {
    pub source_metric_id: String,
    pub source_workspace_id: String,
    pub referenced_id: String,
    pub reference_type: ReferenceType,
}

/// Compiled MAQL token pattern
#[derive(Debug, Clone)]
pub struct MaqlScanner {
    token: Regex,
}

impl MaqlScanner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            token: Regex::new(r"\{(metric|fact|attr|label)/([^{}]+)\}")?,
        })
    }

    /// Distinct `(type, id)` pairs in a formula, comments removed
    pub fn references(&self, maql: &str) -> BTreeSet<(ReferenceType, String)> {
        let code = strip_comments(maql);
        self.token
            .captures_iter(&code)
            .filter_map(|caps| {
                let kind = ReferenceType::from_token(&caps[1])?;
                let id = caps[2].trim();
                (!id.is_empty()).then(|| (kind, id.to_string()))
            })
            .collect()
    }

    /// Reference rows of one metric. Self-references are dropped for the
    /// `metric` type only; a missing formula yields nothing.
    pub fn metric_references(
        &self,
        metric_id: &str,
        workspace_id: &str,
        maql: Option<&str>,
    ) -> Vec<MaqlReference> {
        let Some(maql) = maql.filter(|m| !m.trim().is_empty()) else {
            return Vec::new();
        };

        self.references(maql)
            .into_iter()
            .filter(|(kind, id)| !(*kind == ReferenceType::Metric && id == metric_id))
            .map(|(reference_type, referenced_id)| MaqlReference {
                source_metric_id: metric_id.to_string(),
                source_workspace_id: workspace_id.to_string(),
                referenced_id,
                reference_type,
            })
            .collect()
    }
}

/// Remove MAQL comments.
///
/// Lines whose first non-blank character is `#` are dropped. Other lines are
/// cut at the first `#` that is neither escaped (`\#`) nor inside a
/// double-quoted string.
pub fn strip_comments(maql: &str) -> String {
    maql.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .map(cut_inline_comment)
        .collect::<Vec<_>>()
        .join("\n")
}

fn cut_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..idx],
            _ => {}
        }
    }
    line
}
