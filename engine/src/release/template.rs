//! `{{name}}` placeholder substitution

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::EngineError;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Placeholder name inside `{{ ... }}`, if the inner text is one
fn placeholder_name(inner: &str) -> Option<&str> {
    let name = inner.trim();
    if !name.is_empty() && name.chars().all(is_name_char) {
        Some(name)
    } else {
        None
    }
}

/// Substitute every placeholder from `variables`
///
/// Text between braces that is not a valid name is copied through as is.
/// Fails with every unresolved name, sorted, when any remain.
pub fn render_template(
    template: &str,
    variables: &BTreeMap<String, String>,
) -> Result<String, EngineError> {
    let mut out = String::with_capacity(template.len());
    let mut missing = BTreeSet::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };

        match placeholder_name(&after[..end]) {
            Some(name) => {
                match variables.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        missing.insert(name.to_string());
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);

    if !missing.is_empty() {
        let names: Vec<_> = missing.into_iter().collect();
        return Err(EngineError::ValidationError(format!(
            "unresolved template variables: {}",
            names.join(", ")
        )));
    }
    Ok(out)
}
