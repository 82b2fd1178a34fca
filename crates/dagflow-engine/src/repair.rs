use serde_json::Value;
use tracing::debug;

use crate::validator;

/// Turn plain-text model output into structured JSON where the schema calls for it.
///
/// Only strings are touched, and only when the schema does not itself admit a
/// string. If the repaired text still does not parse, the original value is
/// returned so validation reports the real problem.
pub fn coerce_text_output(output: Value, schema: &Value) -> Value {
    let Value::String(text) = &output else {
        return output;
    };
    if validator::admits_string(schema) {
        return output;
    }

    let repaired = heuristic_repair(text);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(parsed) => {
            debug!("Parsed structured output from text response");
            parsed
        }
        Err(_) => output,
    }
}

/// Best-effort cleanup of text that should have been JSON: take the body of
/// the first Markdown fence, trim it, and close any braces or brackets the
/// model left open.
pub fn heuristic_repair(output: &str) -> String {
    let body = fenced_body(output).unwrap_or(output).trim();
    if body.starts_with('{') || body.starts_with('[') {
        balance_braces(body)
    } else {
        body.to_string()
    }
}

/// Body of the first ```` ``` ```` fence. The info string (`json`, `python`, ...)
/// on the opening line is dropped. A fence that is never closed runs to the
/// end of the text, which is what truncated responses look like.
fn fenced_body(text: &str) -> Option<&str> {
    const FENCE: &str = "```";

    let open = text.find(FENCE)?;
    let rest = &text[open + FENCE.len()..];
    let body = match rest.find('\n') {
        Some(eol) => &rest[eol + 1..],
        None => rest,
    };
    Some(match body.find(FENCE) {
        Some(close) => &body[..close],
        None => body,
    })
}

/// Append missing closers for unbalanced braces/brackets, innermost first.
fn balance_braces(text: &str) -> String {
    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if ch == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if ch == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match ch {
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                open.pop();
            }
            _ => {}
        }
    }

    let mut result = text.to_string();
    while let Some(closer) = open.pop() {
        result.push(closer);
    }
    result
}
