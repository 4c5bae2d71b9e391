//! Placeholder parsing and substitution.
//!
//! Templates are plain strings with `{{dotted.path}}` placeholders. A
//! trailing `?` inside the braces (`{{dotted.path?}}`) marks the variable
//! optional. Paths whose first segment is `env` resolve against the
//! environment map; everything else resolves against the data document.

use crate::error::TemplateError;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// A placeholder discovered in a template.
///
/// Created when a template is parsed; immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVariable {
    /// Variable name as written in the template (without the optional marker).
    pub name: String,
    /// Dotted path the value is sourced from.
    pub path: String,
    /// Whether rendering fails when the context cannot supply a value.
    pub required: bool,
}

/// Read-only data supplied per render call.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    /// Document resolved by non-`env` paths.
    pub data: &'a Value,
    /// Environment map resolved by `env.*` paths.
    pub env: &'a HashMap<String, String>,
}

impl<'a> TemplateContext<'a> {
    #[must_use]
    pub fn new(data: &'a Value, env: &'a HashMap<String, String>) -> Self {
        Self { data, env }
    }
}

/// The result of a single render call. A value, never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutcome {
    /// Fully substituted string on success; empty on failure (no partial
    /// substitution is ever surfaced).
    pub result: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every variable actually resolved, once each, in first-use order.
    pub used_variables: Vec<String>,
}

/// Extract the placeholders declared by a template.
///
/// Duplicate references to the same path collapse into one entry; the entry
/// is required if any occurrence is required.
///
/// # Errors
///
/// Returns an error if the template is malformed (unterminated `{{`, empty
/// placeholder, or an invalid dotted path).
pub fn parse(template: &str) -> Result<Vec<TemplateVariable>, TemplateError> {
    let mut vars: Vec<TemplateVariable> = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| TemplateError::Malformed("unterminated '{{' placeholder".to_string()))?;
        let (path, required) = parse_placeholder(after[..close].trim())?;

        if let Some(existing) = vars.iter_mut().find(|v| v.path == path) {
            existing.required |= required;
        } else {
            vars.push(TemplateVariable {
                name: path.clone(),
                path,
                required,
            });
        }
        rest = &after[close + 2..];
    }

    Ok(vars)
}

/// Render a template against a context.
///
/// Pure: no caching across calls, no mutation of the template or context.
/// Failures (missing required variable, malformed template, composite value)
/// are folded into the outcome — on failure `result` is empty and `error`
/// carries the cause.
#[must_use]
pub fn render(template: &str, context: &TemplateContext<'_>) -> RenderOutcome {
    match try_render(template, context) {
        Ok((result, used_variables)) => RenderOutcome {
            result,
            success: true,
            error: None,
            used_variables,
        },
        Err(e) => RenderOutcome {
            result: String::new(),
            success: false,
            error: Some(e.to_string()),
            used_variables: Vec::new(),
        },
    }
}

fn try_render(
    template: &str,
    context: &TemplateContext<'_>,
) -> Result<(String, Vec<String>), TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut used: Vec<String> = Vec::new();
    // Each variable resolves once and is reused for duplicate placeholders.
    let mut resolved: HashMap<String, Option<String>> = HashMap::new();
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| TemplateError::Malformed("unterminated '{{' placeholder".to_string()))?;
        let (path, required) = parse_placeholder(after[..close].trim())?;

        let value = match resolved.get(&path) {
            Some(v) => v.clone(),
            None => {
                let v = lookup(&path, context)?;
                resolved.insert(path.clone(), v.clone());
                v
            }
        };

        match value {
            Some(s) => {
                if !used.iter().any(|u| u == &path) {
                    used.push(path.clone());
                }
                out.push_str(&s);
            }
            None if required => return Err(TemplateError::MissingVariable(path)),
            // Optional and absent: empty substitution, not listed as used.
            None => {}
        }

        rest = &after[close + 2..];
    }
    out.push_str(rest);

    Ok((out, used))
}

fn parse_placeholder(inner: &str) -> Result<(String, bool), TemplateError> {
    let (path, required) = match inner.strip_suffix('?') {
        Some(p) => (p.trim_end(), false),
        None => (inner, true),
    };

    if path.is_empty() {
        return Err(TemplateError::Malformed("empty placeholder".to_string()));
    }
    if path.split('.').any(str::is_empty) {
        return Err(TemplateError::Malformed(format!(
            "invalid path '{path}': empty segment"
        )));
    }
    if !path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(TemplateError::Malformed(format!(
            "invalid path '{path}': unexpected character"
        )));
    }

    Ok((path.to_string(), required))
}

/// Resolve a dotted path to its substitution string.
///
/// `Ok(None)` means the value is absent (missing key, or JSON null — both
/// count as "no value supplied"). Objects and arrays cannot be spliced into
/// a string and are an error.
fn lookup(
    path: &str,
    context: &TemplateContext<'_>,
) -> Result<Option<String>, TemplateError> {
    let segments: Vec<&str> = path.split('.').collect();

    if segments[0] == "env" && segments.len() > 1 {
        let key = segments[1..].join(".");
        return Ok(context.env.get(&key).cloned());
    }

    let mut current = context.data;
    for segment in &segments {
        match current.as_object().and_then(|o| o.get(*segment)) {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }

    match current {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Object(_) | Value::Array(_) => {
            Err(TemplateError::CompositeValue(path.to_string()))
        }
    }
}
