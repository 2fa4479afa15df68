//! Test-case synthesis from a discovered catalog.
//!
//! A [`CaseBackend`] proposes candidate cases for one operation at a time;
//! the [`Synthesizer`] enforces budgets, shape checks and input-schema
//! conformance before turning candidates into [`TestCase`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rmcp::model::JsonObject;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::catalog::{Catalog, OperationSpec};
use crate::schema::{compile_schema, first_violation, type_name};
use crate::SynthesisOptions;

mod schema;

pub use schema::SchemaBackend;

/// Whether a case is expected to succeed or fail.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedOutcome {
    #[default]
    Success,
    Error,
}

/// What a test case expects from the tool's response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
    /// Expected outcome of the call.
    #[serde(default)]
    pub outcome: ExpectedOutcome,
    /// Fields that must appear in the payload, as keys or JSON pointers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_fields: Vec<String>,
    /// JSON type names expected for individual fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_types: BTreeMap<String, String>,
}

impl Expectation {
    /// Expects a successful call.
    pub fn success() -> Self {
        Self::default()
    }

    /// Expects the tool to report an error.
    pub fn error() -> Self {
        Self {
            outcome: ExpectedOutcome::Error,
            ..Self::default()
        }
    }

    /// Requires `field` to be present in the payload.
    pub fn with_required_field(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }

    /// Requires `field` to have the JSON type `type_name`.
    pub fn with_field_type(mut self, field: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.field_types.insert(field.into(), type_name.into());
        self
    }

    pub fn expects_error(&self) -> bool {
        self.outcome == ExpectedOutcome::Error
    }
}

/// One concrete invocation of one tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Tool to call.
    pub tool_name: String,
    /// What this case exercises.
    pub description: String,
    /// Arguments sent with the call.
    pub inputs: JsonObject,
    /// Optional expectation about the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectation: Option<Expectation>,
}

impl TestCase {
    pub fn new(tool_name: impl Into<String>, inputs: JsonObject) -> Self {
        let tool_name = tool_name.into();
        Self {
            description: format!("call {tool_name}"),
            tool_name,
            inputs,
            expectation: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_expectation(mut self, expectation: Expectation) -> Self {
        self.expectation = Some(expectation);
        self
    }

    /// Returns whether the case expects the tool to fail.
    pub fn expects_error(&self) -> bool {
        self.expectation
            .as_ref()
            .is_some_and(Expectation::expects_error)
    }
}

/// A backend proposal before shape and schema checks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateCase {
    /// Proposed arguments; must be a JSON object to be usable.
    pub arguments: JsonValue,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectation: Option<Expectation>,
}

/// Input handed to a backend for one operation.
#[derive(Clone, Copy, Debug)]
pub struct SynthesisRequest<'a> {
    pub operation: &'a OperationSpec,
    /// Number of candidates wanted.
    pub count: usize,
}

pub type SynthesisFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<CandidateCase>, SynthesisError>> + Send + 'a>>;

/// Source of candidate test cases.
pub trait CaseBackend: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Proposes up to `request.count` candidates for one operation.
    fn synthesize<'a>(&'a self, request: SynthesisRequest<'a>) -> SynthesisFuture<'a>;
}

/// Synthesis failed for one operation.
#[derive(Clone, Debug, PartialEq)]
pub enum SynthesisError {
    /// The backend reported a failure.
    Backend(String),
    /// The backend did not answer in time.
    Timeout(Duration),
    /// The backend answered with unusable data.
    Malformed(String),
    /// The serialized candidates exceeded the size budget.
    BudgetExceeded { size: usize, limit: usize },
    /// The input schema uses constructs the backend cannot generate for.
    UnsupportedSchema(String),
    /// The input schema does not compile.
    InvalidSchema(String),
}

impl fmt::Display for SynthesisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisError::Backend(reason) => write!(f, "backend error: {reason}"),
            SynthesisError::Timeout(after) => {
                write!(f, "backend timed out after {}ms", after.as_millis())
            }
            SynthesisError::Malformed(reason) => write!(f, "malformed candidates: {reason}"),
            SynthesisError::BudgetExceeded { size, limit } => {
                write!(f, "candidates use {size} bytes, budget is {limit}")
            }
            SynthesisError::UnsupportedSchema(reason) => write!(f, "unsupported schema: {reason}"),
            SynthesisError::InvalidSchema(reason) => write!(f, "invalid input schema: {reason}"),
        }
    }
}

impl std::error::Error for SynthesisError {}

/// A tool for which no cases could be produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SynthesisFailure {
    pub tool: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: SynthesisError,
}

fn serialize_display<S: Serializer>(error: &SynthesisError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Cases for the whole catalog plus the tools that produced none.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Synthesis {
    pub cases: Vec<TestCase>,
    pub failures: Vec<SynthesisFailure>,
}

/// Turns a catalog into test cases using a backend.
pub struct Synthesizer {
    backend: Arc<dyn CaseBackend>,
    count: usize,
    options: SynthesisOptions,
}

impl Synthesizer {
    pub fn new(backend: Arc<dyn CaseBackend>, count: usize, options: SynthesisOptions) -> Self {
        Self {
            backend,
            count,
            options,
        }
    }

    /// Synthesizes cases for every operation, in catalog order.
    ///
    /// A failing operation contributes no cases and is recorded in
    /// [`Synthesis::failures`]; the remaining operations are unaffected.
    pub async fn generate(&self, catalog: &Catalog) -> Synthesis {
        let mut synthesis = Synthesis::default();
        for operation in &catalog.tools {
            match self.synthesize_operation(operation).await {
                Ok(cases) => {
                    log::debug!(
                        "{} produced {} cases for '{}'",
                        self.backend.name(),
                        cases.len(),
                        operation.name
                    );
                    synthesis.cases.extend(cases);
                }
                Err(error) => {
                    log::warn!("no cases for '{}': {error}", operation.name);
                    synthesis.failures.push(SynthesisFailure {
                        tool: operation.name.clone(),
                        error,
                    });
                }
            }
        }
        synthesis
    }

    async fn synthesize_operation(
        &self,
        operation: &OperationSpec,
    ) -> Result<Vec<TestCase>, SynthesisError> {
        let validator =
            compile_schema(&operation.input_schema).map_err(SynthesisError::InvalidSchema)?;
        if self.count == 0 {
            return Ok(Vec::new());
        }

        let request = SynthesisRequest {
            operation,
            count: self.count,
        };
        let timeout = self.options.backend_timeout;
        let mut candidates =
            match tokio::time::timeout(timeout, self.backend.synthesize(request)).await {
                Ok(result) => result?,
                Err(_) => return Err(SynthesisError::Timeout(timeout)),
            };
        candidates.truncate(self.count);
        if candidates.is_empty() {
            return Err(SynthesisError::Malformed(
                "backend returned no candidates".to_string(),
            ));
        }

        let size = serde_json::to_vec(&candidates)
            .map_err(|error| SynthesisError::Malformed(error.to_string()))?
            .len();
        if size > self.options.max_candidate_bytes {
            return Err(SynthesisError::BudgetExceeded {
                size,
                limit: self.options.max_candidate_bytes,
            });
        }

        if let Some((index, candidate)) = candidates
            .iter()
            .enumerate()
            .find(|(_, candidate)| !candidate.arguments.is_object())
        {
            return Err(SynthesisError::Malformed(format!(
                "candidate {index} arguments must be an object, got {}",
                type_name(&candidate.arguments)
            )));
        }

        let mut cases = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.into_iter().enumerate() {
            let expects_error = candidate
                .expectation
                .as_ref()
                .is_some_and(Expectation::expects_error);
            if !expects_error {
                if let Some(violation) = first_violation(&validator, &candidate.arguments) {
                    log::debug!(
                        "dropping candidate {index} for '{}': {violation}",
                        operation.name
                    );
                    continue;
                }
            }
            let JsonValue::Object(inputs) = candidate.arguments else {
                continue;
            };
            let description = if candidate.description.trim().is_empty() {
                format!("{} case {}", operation.name, index + 1)
            } else {
                candidate.description
            };
            cases.push(TestCase {
                tool_name: operation.name.clone(),
                description,
                inputs,
                expectation: candidate.expectation,
            });
        }
        if cases.is_empty() {
            return Err(SynthesisError::Malformed(
                "no candidate conforms to the input schema".to_string(),
            ));
        }
        Ok(cases)
    }
}

impl fmt::Debug for Synthesizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synthesizer")
            .field("backend", &self.backend.name())
            .field("count", &self.count)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/internal/generator_unit_tests.rs"]
mod tests;
