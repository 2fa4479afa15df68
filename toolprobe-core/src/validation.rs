//! Scoring of execution outcomes.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use jsonschema::Validator;
use rmcp::model::CallToolResult;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::catalog::Catalog;
use crate::execution::{Execution, ExecutionOutcome};
use crate::generator::TestCase;
use crate::schema::{compile_schema, first_violation, resolve_field, type_name, value_matches_type};
use crate::session::ToolResponse;

/// Verdict for one outcome.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    /// Violations in the order they were found.
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Checks responses against expectations and declared output schemas.
pub struct ResponseValidator {
    output_validators: BTreeMap<String, Validator>,
    broken_schemas: BTreeMap<String, String>,
}

impl ResponseValidator {
    /// Precompiles the output schemas declared in `catalog`.
    pub fn new(catalog: &Catalog) -> Self {
        let mut output_validators = BTreeMap::new();
        let mut broken_schemas = BTreeMap::new();
        for tool in &catalog.tools {
            let Some(schema) = &tool.output_schema else {
                continue;
            };
            match compile_schema(schema) {
                Ok(validator) => {
                    output_validators.insert(tool.name.clone(), validator);
                }
                Err(reason) => {
                    log::warn!("output schema for '{}' does not compile: {reason}", tool.name);
                    broken_schemas.insert(tool.name.clone(), reason);
                }
            }
        }
        Self {
            output_validators,
            broken_schemas,
        }
    }

    pub fn validate(&self, outcome: &ExecutionOutcome) -> ValidationResult {
        let case = &outcome.test_case;
        let errors = match &outcome.execution {
            Execution::TimedOut { after } => vec![format!(
                "timeout: no response from '{}' within {}ms",
                case.tool_name,
                after.as_millis()
            )],
            Execution::TransportError(error) => vec![format!("transport error: {error}")],
            Execution::Completed(ToolResponse::Error { error }) => {
                if case.expects_error() {
                    Vec::new()
                } else {
                    vec![format!("tool returned an error: {error}")]
                }
            }
            Execution::Completed(ToolResponse::Success { data }) => self.check_result(case, data),
        };
        ValidationResult::from_errors(errors)
    }

    fn check_result(&self, case: &TestCase, data: &CallToolResult) -> Vec<String> {
        if data.is_error.unwrap_or(false) {
            if case.expects_error() {
                return Vec::new();
            }
            let detail = first_text(data).unwrap_or("no details");
            return vec![format!("tool reported an error: {detail}")];
        }
        if case.expects_error() {
            return vec!["expected an error but the tool succeeded".to_string()];
        }

        let mut errors = Vec::new();
        if let Some(reason) = self.broken_schemas.get(&case.tool_name) {
            errors.push(format!("output schema does not compile: {reason}"));
        }
        if let Some(validator) = self.output_validators.get(&case.tool_name) {
            match &data.structured_content {
                None => errors.push(
                    "missing structuredContent required by the output schema".to_string(),
                ),
                Some(content) => {
                    if let Some(violation) = first_violation(validator, content) {
                        errors.push(format!(
                            "structuredContent does not match the output schema: {violation}"
                        ));
                    }
                }
            }
        }

        let Some(expectation) = &case.expectation else {
            return errors;
        };
        let payload = payload(data);
        let lookup = |field: &str| {
            payload
                .as_deref()
                .and_then(|payload| resolve_field(payload, field))
        };
        for field in &expectation.required_fields {
            if lookup(field).is_none() {
                errors.push(format!("missing expected field '{field}'"));
            }
        }
        for (field, expected) in &expectation.field_types {
            match lookup(field) {
                Some(value) if !value_matches_type(value, expected) => errors.push(format!(
                    "field '{field}' should be {expected}, got {}",
                    type_name(value)
                )),
                Some(_) => {}
                None if expectation.required_fields.contains(field) => {}
                None => errors.push(format!("missing expected field '{field}'")),
            }
        }
        errors
    }
}

impl fmt::Debug for ResponseValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseValidator")
            .field("output_schemas", &self.output_validators.keys().collect::<Vec<_>>())
            .field("broken_schemas", &self.broken_schemas)
            .finish()
    }
}

/// The structured payload of a result: `structuredContent`, or else the
/// first text content parsed as JSON.
fn payload(data: &CallToolResult) -> Option<Cow<'_, JsonValue>> {
    if let Some(content) = &data.structured_content {
        return Some(Cow::Borrowed(content));
    }
    let text = first_text(data)?;
    serde_json::from_str(text).ok().map(Cow::Owned)
}

fn first_text(data: &CallToolResult) -> Option<&str> {
    data.content
        .iter()
        .find_map(|content| content.as_text().map(|text| text.text.as_str()))
}

#[cfg(test)]
#[path = "../tests/internal/validation_unit_tests.rs"]
mod tests;
