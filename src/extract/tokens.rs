//! Token extraction from free text
//!
//! Pure scanners over rich-text bodies and widget content strings. They
//! know nothing about the schema; resolution against known identifiers
//! happens in [`super::resolver`].

use regex::Regex;
use std::collections::BTreeSet;

use crate::error::Result;

/// `{tag:value}` occurrence, one per array element for `{tag:[a,b]}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurlyToken {
    pub tag: String,
    pub value: String,
}

impl CurlyToken {
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
        }
    }
}

/// Compiled token patterns
#[derive(Debug, Clone)]
pub struct TokenScanner {
    uuid: Regex,
    curly: Regex,
    quoted: Regex,
}

impl TokenScanner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            uuid: Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")?,
            curly: Regex::new(r"\{([^{}:]+):([^{}]+?)\}")?,
            quoted: Regex::new(r"'([a-z0-9_-]+)'")?,
        })
    }

    /// Distinct UUID-shaped tokens
    pub fn uuids(&self, text: &str) -> BTreeSet<String> {
        self.uuid
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Every `{tag:value}` pair in document order, duplicates kept
    pub fn curly_tokens(&self, text: &str) -> Vec<CurlyToken> {
        let mut tokens = Vec::new();

        for caps in self.curly.captures_iter(text) {
            let tag = clean(&caps[1]);
            let raw = caps[2].trim();

            if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                for element in inner.split(',') {
                    let value = clean(element);
                    if !value.is_empty() {
                        tokens.push(CurlyToken::new(tag, value));
                    }
                }
            } else {
                let value = clean(raw);
                if !value.is_empty() {
                    tokens.push(CurlyToken::new(tag, value));
                }
            }
        }

        tokens
    }

    /// Quoted lowercase identifiers following the legacy `marker` naming
    /// convention, longer than 10 characters
    pub fn quoted_identifiers(&self, text: &str, marker: &str) -> Vec<String> {
        if marker.is_empty() {
            return Vec::new();
        }
        self.quoted
            .captures_iter(text)
            .map(|caps| caps[1].to_string())
            .filter(|id| id.contains(marker) && id.len() > 10)
            .collect()
    }
}

fn clean(raw: &str) -> &str {
    raw.trim().trim_matches(|c| c == '\'' || c == '"').trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> TokenScanner {
        TokenScanner::new().unwrap()
    }

    #[test]
    fn test_uuids_are_distinct() {
        let text = "a 0f9e8d7c-1234-4abc-9def-0123456789ab b 0f9e8d7c-1234-4abc-9def-0123456789ab \
                    c 11111111-2222-3333-4444-555555555555";
        let ids = scanner().uuids(text);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("11111111-2222-3333-4444-555555555555"));
    }

    #[test]
    fn test_uppercase_uuid_not_matched() {
        assert!(scanner().uuids("0F9E8D7C-1234-4ABC-9DEF-0123456789AB").is_empty());
    }

    #[test]
    fn test_curly_tokens_strip_quotes_and_whitespace() {
        let tokens = scanner().curly_tokens(r#"Total: { measure : 'revenue' } and {insightMeasure:"abc"}"#);
        assert_eq!(
            tokens,
            vec![
                CurlyToken::new("measure", "revenue"),
                CurlyToken::new("insightMeasure", "abc"),
            ]
        );
    }

    #[test]
    fn test_curly_array_expands_in_order() {
        let tokens = scanner().curly_tokens("{measuresComparison:['a', \"b\" ,c,]}");
        assert_eq!(
            tokens,
            vec![
                CurlyToken::new("measuresComparison", "a"),
                CurlyToken::new("measuresComparison", "b"),
                CurlyToken::new("measuresComparison", "c"),
            ]
        );
    }

    #[test]
    fn test_curly_duplicates_preserved() {
        let tokens = scanner().curly_tokens("{measure:x} {measure:x}");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_empty_and_malformed_input() {
        let s = scanner();
        assert!(s.curly_tokens("").is_empty());
        assert!(s.curly_tokens("{unclosed:value").is_empty());
        assert!(s.curly_tokens("{novalue}").is_empty());
        assert!(s.curly_tokens("{tag:''}").is_empty());
        assert!(s.uuids("").is_empty());
    }

    #[test]
    fn test_quoted_identifiers_need_marker_and_length() {
        let found = scanner().quoted_identifiers(
            "x 'revenue_-_total' y 'a_-_b' z 'plain_identifier'",
            "_-_",
        );
        assert_eq!(found, vec!["revenue_-_total".to_string()]);
    }
}
