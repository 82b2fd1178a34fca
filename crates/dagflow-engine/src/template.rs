//! Prompt template rendering.
//!
//! Placeholders have the form `{{ key }}` or `{{ key.sub.path }}` and are
//! resolved against a node's effective input. Strings are inserted as-is,
//! other values as compact JSON. Unresolved placeholders stay verbatim so the
//! model sees exactly what was missing.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

/// Render `template` against `input`.
pub fn render(template: &str, input: &Map<String, Value>) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures<'_>| match lookup(input, &caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Resolve a dotted path. Numeric segments index into arrays.
fn lookup<'a>(input: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = input.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_strings_and_json() {
        let vars = input(json!({"name": "Ada", "tags": ["a", "b"], "n": 3}));
        let out = render("Hi {{name}}, tags={{ tags }}, n={{n}}", &vars);
        assert_eq!(out, r#"Hi Ada, tags=["a","b"], n=3"#);
    }

    #[test]
    fn test_render_nested_path() {
        let vars = input(json!({"research": {"items": [{"title": "first"}]}}));
        let out = render("Top: {{research.items.0.title}}", &vars);
        assert_eq!(out, "Top: first");
    }

    #[test]
    fn test_unresolved_placeholder_kept() {
        let vars = input(json!({}));
        assert_eq!(render("Use {{ missing.key }}", &vars), "Use {{ missing.key }}");
    }

    #[test]
    fn test_no_placeholders() {
        let vars = input(json!({"x": 1}));
        assert_eq!(render("plain text", &vars), "plain text");
    }
}
