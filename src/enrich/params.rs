//! Script parameters
//!
//! An artifact maps placeholder names to value specs. Each `{name}` in its
//! script is replaced by the resolved value:
//! - `{{KEY}}` looks `KEY` up in the run's values
//! - `$$...` drops one `$`, so `$${VAR}` becomes `${VAR}`
//! - anything else is used literally
//!
//! A `{{KEY}}` with no value leaves its placeholder untouched.

use std::collections::BTreeMap;
use tracing::warn;

/// Resolve one value spec, `None` when it names an unknown key
pub fn resolve_value(spec: &str, values: &BTreeMap<String, String>) -> Option<String> {
    if let Some(key) = spec.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
        return values.get(key.trim()).cloned();
    }
    if let Some(rest) = spec.strip_prefix("$$") {
        return Some(format!("${rest}"));
    }
    Some(spec.to_string())
}

/// Replace every `{name}` of `parameters` in `sql`
pub fn substitute_parameters(
    sql: &str,
    parameters: &BTreeMap<String, String>,
    values: &BTreeMap<String, String>,
) -> String {
    let mut text = sql.to_string();
    for (name, spec) in parameters {
        match resolve_value(spec, values) {
            Some(value) => text = text.replace(&format!("{{{name}}}"), &value),
            None => warn!(parameter = %name, spec = %spec, "no value for parameter, placeholder kept"),
        }
    }
    text
}
