//! Validation of model output against a node's output schema.
//!
//! Schemas are JSON Schema (draft 7 unless the schema names another) and are
//! evaluated with the `jsonschema` crate. Validation never fails the caller:
//! problems come back as [`ValidationResult::Invalid`] with one issue per
//! violated expectation.

use jsonschema::error::ValidationErrorKind;
use jsonschema::{JSONSchema, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One violated expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Location in the output, e.g. `$.items[2].name`.
    pub path: String,
    /// What the schema expected.
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl From<ValidationError<'_>> for ValidationIssue {
    fn from(error: ValidationError<'_>) -> Self {
        let mut path = output_path(&error.instance_path.to_string());
        // Point at the missing property rather than its parent object.
        if let ValidationErrorKind::Required {
            property: Value::String(name),
        } = &error.kind
        {
            path = format!("{}.{}", path, name);
        }
        Self {
            path,
            message: error.to_string(),
        }
    }
}

/// Result of output validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// Output satisfies the schema and is returned unchanged.
    Valid(Value),
    /// Output has issues.
    Invalid { issues: Vec<ValidationIssue> },
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid(_))
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            ValidationResult::Valid(_) => &[],
            ValidationResult::Invalid { issues } => issues,
        }
    }
}

/// Validate `output` against `schema`. Pure.
///
/// A schema that does not compile yields a single issue at `$`; graphs run
/// [`check_schema`] at load time, so this only happens for schemas that
/// bypassed it.
pub fn validate(output: &Value, schema: &Value) -> ValidationResult {
    let compiled = match JSONSchema::compile(schema) {
        Ok(compiled) => compiled,
        Err(e) => {
            return ValidationResult::Invalid {
                issues: vec![ValidationIssue {
                    path: "$".to_string(),
                    message: format!("invalid output schema: {}", e),
                }],
            }
        }
    };

    let result = match compiled.validate(output) {
        Ok(()) => ValidationResult::Valid(output.clone()),
        Err(errors) => ValidationResult::Invalid {
            issues: errors.map(ValidationIssue::from).collect(),
        },
    };
    result
}

/// Load-time check of a schema descriptor.
///
/// The top level must be an object; the rest (types, patterns, nested
/// sub-schemas) is whatever `jsonschema` accepts when compiling.
pub fn check_schema(schema: &Value) -> Result<(), String> {
    if !schema.is_object() {
        return Err(format!(
            "output_schema must be an object, got {}",
            kind(schema)
        ));
    }
    JSONSchema::compile(schema)
        .map(|_| ())
        .map_err(|e| format!("invalid output_schema: {}", e))
}

/// Whether a schema admits plain strings at the top level.
///
/// Only `type` is consulted; this decides whether text output is worth
/// repairing, not whether it validates.
pub fn admits_string(schema: &Value) -> bool {
    match schema.get("type") {
        None => true,
        Some(Value::String(ty)) => ty == "string",
        Some(Value::Array(types)) => types.iter().any(|t| t == "string"),
        Some(_) => false,
    }
}

/// Convert a JSON pointer (`/items/1/name`) to `$.items[1].name`.
///
/// All-digit segments are rendered as array indices.
fn output_path(pointer: &str) -> String {
    let mut path = String::from("$");
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            path.push('[');
            path.push_str(&segment);
            path.push(']');
        } else {
            path.push('.');
            path.push_str(&segment);
        }
    }
    path
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
