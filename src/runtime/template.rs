//! Template rendering for env/asset values
//!
//! The engine only needs `render(template, variables)`; deployments with a
//! richer template language plug in their own `TemplateRenderer`.

use serde_json::{Map, Value};

use super::error::{FlowError, Result};

/// Renders template expressions found in env/asset values.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, variables: &Map<String, Value>) -> Result<String>;
}

/// Whether a string still contains unresolved template syntax
pub fn is_template(value: &str) -> bool {
    match value.find("{{") {
        Some(open) => value[open + 2..].contains("}}"),
        None => false,
    }
}

/// Default renderer: substitutes `{{ name }}` / `{{ a.b.c }}` placeholders.
///
/// Missing variables are an error rather than an empty substitution.
#[derive(Debug, Clone, Default)]
pub struct BraceRenderer;

impl BraceRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateRenderer for BraceRenderer {
    fn render(&self, template: &str, variables: &Map<String, Value>) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let close = after
                .find("}}")
                .ok_or_else(|| FlowError::Template(format!("Unclosed placeholder in '{}'", template)))?;
            let name = after[..close].trim();
            let value = lookup_path(variables, name)
                .ok_or_else(|| FlowError::Template(format!("Unknown template variable '{}'", name)))?;
            match value {
                Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
            rest = &after[close + 2..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

fn lookup_path<'a>(variables: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = variables.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}
