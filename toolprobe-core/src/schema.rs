//! JSON Schema helpers shared by synthesis and validation.

use jsonschema::{draft201909, draft202012, draft4, draft6, draft7, Validator};
use serde_json::Value as JsonValue;

use crate::JsonObject;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Dialect {
    Draft4,
    Draft6,
    Draft7,
    Draft201909,
    Draft202012,
}

impl Dialect {
    /// Reads a `$schema` URI. Either scheme and a trailing `#` are accepted.
    fn from_uri(uri: &str) -> Option<Self> {
        let trimmed = uri.trim();
        let trimmed = trimmed.strip_suffix('#').unwrap_or(trimmed);
        let path = trimmed
            .strip_prefix("https://json-schema.org/")
            .or_else(|| trimmed.strip_prefix("http://json-schema.org/"))?;
        match path {
            "draft-04/schema" => Some(Self::Draft4),
            "draft-06/schema" => Some(Self::Draft6),
            "draft-07/schema" => Some(Self::Draft7),
            "draft/2019-09/schema" => Some(Self::Draft201909),
            "draft/2020-12/schema" => Some(Self::Draft202012),
            _ => None,
        }
    }
}

/// Compiles a tool schema, honoring its `$schema` dialect. Schemas without
/// one are read as draft 2020-12.
///
/// The `$schema` keyword is dropped once the dialect is known so that
/// non-canonical spellings of a meta-schema URI never trigger a lookup.
pub(crate) fn compile_schema(schema: &JsonObject) -> Result<Validator, String> {
    let dialect = match schema.get("$schema") {
        Some(JsonValue::String(uri)) => {
            Dialect::from_uri(uri).ok_or_else(|| format!("unknown schema version: {uri}"))?
        }
        Some(other) => return Err(format!("unknown schema version: {other}")),
        None => Dialect::Draft202012,
    };
    let mut schema = schema.clone();
    schema.remove("$schema");
    let schema_value = JsonValue::Object(schema);
    let compiled = match dialect {
        Dialect::Draft4 => draft4::new(&schema_value),
        Dialect::Draft6 => draft6::new(&schema_value),
        Dialect::Draft7 => draft7::new(&schema_value),
        Dialect::Draft201909 => draft201909::new(&schema_value),
        Dialect::Draft202012 => draft202012::new(&schema_value),
    };
    compiled.map_err(|error| error.to_string())
}

/// First violation reported by `validator`, if any.
pub(crate) fn first_violation(validator: &Validator, value: &JsonValue) -> Option<String> {
    validator.iter_errors(value).next().map(|error| {
        let path = error.instance_path.to_string();
        if path.is_empty() {
            error.to_string()
        } else {
            format!("{path}: {error}")
        }
    })
}

pub(crate) fn value_matches_type(value: &JsonValue, schema_type: &str) -> bool {
    match (schema_type, value) {
        ("string", JsonValue::String(_)) => true,
        ("number", JsonValue::Number(_)) => true,
        ("integer", JsonValue::Number(number)) => {
            number.is_i64() || number.is_u64() || number.as_f64().is_some_and(|v| v.fract() == 0.0)
        }
        ("boolean", JsonValue::Bool(_)) => true,
        ("array", JsonValue::Array(_)) => true,
        ("object", JsonValue::Object(_)) => true,
        ("null", JsonValue::Null) => true,
        _ => false,
    }
}

/// Name of the JSON type of `value`.
pub(crate) fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(number) if number.is_i64() || number.is_u64() => "integer",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Resolves a field reference against `root`.
///
/// References starting with `/` are JSON pointers, `#/...` is accepted as a
/// fragment pointer, anything else is a top-level key.
pub(crate) fn resolve_field<'a>(root: &'a JsonValue, field: &str) -> Option<&'a JsonValue> {
    if field == "#" {
        return Some(root);
    }
    let pointer = field.strip_prefix('#').unwrap_or(field);
    if !pointer.starts_with('/') {
        return root.as_object()?.get(field);
    }
    let mut current = root;
    for segment in pointer.split('/').skip(1) {
        let decoded = decode_pointer_segment(segment);
        match current {
            JsonValue::Object(map) => {
                current = map.get(&decoded)?;
            }
            JsonValue::Array(items) => {
                let index = decoded.parse::<usize>().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

pub(crate) fn decode_pointer_segment(segment: &str) -> String {
    let mut decoded = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(ch) = chars.next() {
        if ch == '~' {
            match chars.next() {
                Some('0') => decoded.push('~'),
                Some('1') => decoded.push('/'),
                Some(other) => {
                    decoded.push('~');
                    decoded.push(other);
                }
                None => decoded.push('~'),
            }
        } else {
            decoded.push(ch);
        }
    }
    decoded
}

#[cfg(test)]
#[path = "../tests/internal/schema_unit_tests.rs"]
mod tests;
