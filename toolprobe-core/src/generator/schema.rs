use std::collections::HashSet;

use proptest::prelude::*;
use proptest::strategy::{Union, ValueTree};
use proptest::test_runner::{Config as ProptestConfig, RngAlgorithm, TestRng, TestRunner};
use rmcp::model::JsonObject;
use serde_json::Value as JsonValue;

use super::{CandidateCase, CaseBackend, SynthesisError, SynthesisFuture, SynthesisRequest};
use crate::catalog::OperationSpec;
use crate::schema::resolve_field;

const MAX_DEPTH: usize = 16;
const DEFAULT_MAX_LENGTH: usize = 16;
const DEFAULT_MAX_ITEMS: usize = 4;
const INTEGER_SPAN: i64 = 1_000;
const NUMBER_SPAN: f64 = 1_000.0;
const ATTEMPTS_PER_CASE: usize = 8;

/// Model-free backend that draws arguments from the input schema.
///
/// Generation is deterministic for a given seed and tool name.
#[derive(Clone, Debug, Default)]
pub struct SchemaBackend {
    seed: u64,
}

impl SchemaBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    fn candidates(
        &self,
        operation: &OperationSpec,
        count: usize,
    ) -> Result<Vec<CandidateCase>, SynthesisError> {
        let walker = SchemaWalker::new(&operation.input_schema);
        let strategy = walker.object_strategy(&operation.input_schema, 0)?;
        let mut runner = seeded_test_runner(self.seed ^ name_hash(&operation.name));

        let mut seen = HashSet::new();
        let mut drawn: Vec<JsonObject> = Vec::with_capacity(count);
        for _ in 0..count.saturating_mul(ATTEMPTS_PER_CASE) {
            if drawn.len() == count {
                break;
            }
            let tree = strategy
                .new_tree(&mut runner)
                .map_err(|reason| SynthesisError::UnsupportedSchema(reason.to_string()))?;
            let arguments = tree.current();
            if seen.insert(JsonValue::Object(arguments.clone()).to_string()) {
                drawn.push(arguments);
            }
        }
        // Small value spaces run out of distinct values; repeat what we have.
        let distinct = drawn.len();
        for index in 0..count.saturating_sub(distinct) {
            if let Some(arguments) = drawn.get(index % distinct.max(1)).cloned() {
                drawn.push(arguments);
            }
        }

        Ok(drawn
            .into_iter()
            .enumerate()
            .map(|(index, arguments)| CandidateCase {
                arguments: JsonValue::Object(arguments),
                description: format!("{} schema case {}", operation.name, index + 1),
                expectation: None,
            })
            .collect())
    }
}

impl CaseBackend for SchemaBackend {
    fn name(&self) -> &str {
        "schema"
    }

    fn synthesize<'a>(&'a self, request: SynthesisRequest<'a>) -> SynthesisFuture<'a> {
        let result = self.candidates(request.operation, request.count);
        Box::pin(std::future::ready(result))
    }
}

fn seeded_test_runner(seed: u64) -> TestRunner {
    let config = ProptestConfig {
        rng_algorithm: RngAlgorithm::ChaCha,
        ..ProptestConfig::default()
    };
    // ChaCha wants 32 bytes; repeat the seed to fill them.
    let key: Vec<u8> = seed.to_le_bytes().iter().copied().cycle().take(32).collect();
    let rng = TestRng::from_seed(config.rng_algorithm, &key);
    TestRunner::new_with_rng(config, rng)
}

// FNV-1a keeps per-tool streams stable across runs and platforms.
fn name_hash(name: &str) -> u64 {
    name.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn unsupported(reason: impl Into<String>) -> SynthesisError {
    SynthesisError::UnsupportedSchema(reason.into())
}

struct SchemaWalker {
    root: JsonValue,
}

impl SchemaWalker {
    fn new(root: &JsonObject) -> Self {
        Self {
            root: JsonValue::Object(root.clone()),
        }
    }

    fn object_strategy(
        &self,
        schema: &JsonObject,
        depth: usize,
    ) -> Result<BoxedStrategy<JsonObject>, SynthesisError> {
        let schema = self.resolve(schema, depth)?;

        if let Some(branches) = self.union_branches(&schema)? {
            let mut strategies = Vec::with_capacity(branches.len());
            for branch in branches.iter().filter(|branch| is_object_schema(branch)) {
                strategies.push(self.object_strategy(branch, depth + 1)?);
            }
            if strategies.is_empty() {
                return Err(unsupported("no union branch describes an object"));
            }
            return Ok(Union::new(strategies).boxed());
        }

        match schema.get("type") {
            None => {}
            Some(JsonValue::String(schema_type)) if schema_type == "object" => {}
            Some(JsonValue::String(other)) => {
                return Err(unsupported(format!(
                    "input schema type must be object, got {other}"
                )))
            }
            Some(_) => return Err(unsupported("schema type must be a string")),
        }

        let properties = match schema.get("properties") {
            Some(JsonValue::Object(map)) => map.clone(),
            Some(_) => return Err(unsupported("properties must be an object")),
            None => JsonObject::new(),
        };
        let required = required_keys(&schema);

        let mut property_strategies = Vec::with_capacity(properties.len() + required.len());
        for (name, schema_value) in &properties {
            let schema_object = schema_value
                .as_object()
                .ok_or_else(|| unsupported(format!("property '{name}' schema must be an object")))?;
            let strategy = self.value_strategy(schema_object, depth + 1)?;
            let strategy = if required.contains(name) {
                strategy.prop_map(Some).boxed()
            } else {
                prop_oneof![1 => Just(None), 3 => strategy.prop_map(Some)].boxed()
            };
            property_strategies.push((name.clone(), strategy));
        }
        // Required keys without a declared schema accept any value.
        for name in required.iter().filter(|name| !properties.contains_key(*name)) {
            let strategy = string_strategy(&JsonObject::new())?.prop_map(Some).boxed();
            property_strategies.push((name.clone(), strategy));
        }

        let mut strategy: BoxedStrategy<Vec<(String, Option<JsonValue>)>> =
            Just(Vec::new()).boxed();
        for (name, value_strategy) in property_strategies {
            strategy = strategy
                .prop_flat_map(move |entries| {
                    let name = name.clone();
                    let value_strategy = value_strategy.clone();
                    value_strategy.prop_map(move |value| {
                        let mut next = entries.clone();
                        next.push((name.clone(), value));
                        next
                    })
                })
                .boxed();
        }

        Ok(strategy
            .prop_map(|entries| {
                let mut map = JsonObject::new();
                for (name, value) in entries {
                    if let Some(value) = value {
                        map.insert(name, value);
                    }
                }
                map
            })
            .boxed())
    }

    fn value_strategy(
        &self,
        schema: &JsonObject,
        depth: usize,
    ) -> Result<BoxedStrategy<JsonValue>, SynthesisError> {
        let schema = self.resolve(schema, depth)?;

        if let Some(value) = schema.get("const") {
            return Ok(Just(value.clone()).boxed());
        }

        if let Some(values) = schema.get("enum") {
            let values = values
                .as_array()
                .filter(|values| !values.is_empty())
                .ok_or_else(|| unsupported("enum must include at least one value"))?;
            return Ok(proptest::sample::select(values.clone()).boxed());
        }

        if let Some(branches) = self.union_branches(&schema)? {
            let mut strategies = Vec::with_capacity(branches.len());
            for branch in &branches {
                strategies.push(self.value_strategy(branch, depth + 1)?);
            }
            return Ok(Union::new(strategies).boxed());
        }

        let schema_type = match schema.get("type") {
            Some(JsonValue::String(schema_type)) => schema_type.as_str(),
            Some(_) => return Err(unsupported("schema type must be a string")),
            None if schema.contains_key("properties") => "object",
            None if schema.contains_key("items") => "array",
            None => "string",
        };

        match schema_type {
            "string" => string_strategy(&schema),
            "number" => number_strategy(&schema),
            "integer" => integer_strategy(&schema),
            "boolean" => Ok(any::<bool>().prop_map(JsonValue::from).boxed()),
            "null" => Ok(Just(JsonValue::Null).boxed()),
            "array" => {
                let min_items = usize_keyword(&schema, "minItems").unwrap_or(0);
                let max_items = usize_keyword(&schema, "maxItems")
                    .unwrap_or_else(|| min_items.max(DEFAULT_MAX_ITEMS));
                if max_items < min_items {
                    return Err(unsupported("maxItems must be >= minItems"));
                }
                let item_strategy = match schema.get("items") {
                    Some(JsonValue::Object(items)) => self.value_strategy(items, depth + 1)?,
                    Some(_) => return Err(unsupported("array items must be a schema object")),
                    None => string_strategy(&JsonObject::new())?,
                };
                Ok(
                    proptest::collection::vec(item_strategy, min_items..=max_items)
                        .prop_map(JsonValue::from)
                        .boxed(),
                )
            }
            "object" => Ok(self
                .object_strategy(&schema, depth + 1)?
                .prop_map(JsonValue::Object)
                .boxed()),
            other => Err(unsupported(format!("unsupported schema type '{other}'"))),
        }
    }

    /// Inlines local `$ref` targets and flattens `allOf`.
    fn resolve(&self, schema: &JsonObject, depth: usize) -> Result<JsonObject, SynthesisError> {
        if depth > MAX_DEPTH {
            return Err(unsupported("schema nesting is too deep"));
        }

        if let Some(reference) = schema.get("$ref") {
            let reference = reference
                .as_str()
                .ok_or_else(|| unsupported("$ref must be a string"))?;
            if reference != "#" && !reference.starts_with("#/") {
                return Err(unsupported(format!(
                    "schema $ref must be a local reference, got '{reference}'"
                )));
            }
            let target = resolve_field(&self.root, reference)
                .and_then(JsonValue::as_object)
                .ok_or_else(|| {
                    unsupported(format!("schema $ref '{reference}' must point to a schema object"))
                })?;
            let mut merged = target.clone();
            for (key, value) in schema {
                if key != "$ref" {
                    merged.insert(key.clone(), value.clone());
                }
            }
            return self.resolve(&merged, depth + 1);
        }

        if let Some(all_of) = schema.get("allOf") {
            let all_of = all_of
                .as_array()
                .filter(|all_of| !all_of.is_empty())
                .ok_or_else(|| unsupported("allOf must include at least one schema object"))?;
            let mut merged = schema.clone();
            merged.remove("allOf");
            for (idx, value) in all_of.iter().enumerate() {
                let branch = value
                    .as_object()
                    .ok_or_else(|| unsupported(format!("allOf[{idx}] schema must be an object")))?;
                let branch = self.resolve(branch, depth + 1)?;
                merged = merge_object_schema(&merged, &branch);
            }
            return Ok(merged);
        }

        Ok(schema.clone())
    }

    /// Splits `oneOf`, `anyOf` and type arrays into standalone branches.
    fn union_branches(
        &self,
        schema: &JsonObject,
    ) -> Result<Option<Vec<JsonObject>>, SynthesisError> {
        for keyword in ["oneOf", "anyOf"] {
            let Some(value) = schema.get(keyword) else {
                continue;
            };
            let options = value
                .as_array()
                .filter(|options| !options.is_empty())
                .ok_or_else(|| {
                    unsupported(format!("{keyword} must include at least one schema object"))
                })?;
            let mut base = schema.clone();
            base.remove(keyword);
            let mut branches = Vec::with_capacity(options.len());
            for (idx, value) in options.iter().enumerate() {
                let branch = value.as_object().ok_or_else(|| {
                    unsupported(format!("{keyword}[{idx}] schema must be an object"))
                })?;
                branches.push(merge_object_schema(&base, branch));
            }
            return Ok(Some(branches));
        }

        if let Some(JsonValue::Array(types)) = schema.get("type") {
            if types.is_empty() {
                return Err(unsupported(
                    "schema type array must include at least one string",
                ));
            }
            let mut branches = Vec::with_capacity(types.len());
            for (idx, value) in types.iter().enumerate() {
                let schema_type = value.as_str().ok_or_else(|| {
                    unsupported(format!(
                        "schema type array must contain strings; found {value} at {idx}"
                    ))
                })?;
                let mut branch = schema.clone();
                branch.insert(
                    "type".to_string(),
                    JsonValue::String(schema_type.to_string()),
                );
                branches.push(branch);
            }
            return Ok(Some(branches));
        }

        Ok(None)
    }
}

fn is_object_schema(schema: &JsonObject) -> bool {
    match schema.get("type") {
        None => true,
        Some(JsonValue::String(schema_type)) => schema_type == "object",
        Some(_) => false,
    }
}

fn string_strategy(schema: &JsonObject) -> Result<BoxedStrategy<JsonValue>, SynthesisError> {
    let min_length = usize_keyword(schema, "minLength").unwrap_or(0);
    let max_length =
        usize_keyword(schema, "maxLength").unwrap_or(min_length + DEFAULT_MAX_LENGTH);
    if max_length < min_length {
        return Err(unsupported("maxLength must be >= minLength"));
    }

    if let Some(pattern) = schema.get("pattern").and_then(JsonValue::as_str) {
        let strategy = proptest::string::string_regex(&normalize_pattern(pattern))
            .map_err(|error| unsupported(format!("pattern '{pattern}' is not usable: {error}")))?;
        return Ok(strategy
            .prop_filter("string length out of bounds", move |value| {
                let len = value.chars().count();
                len >= min_length && len <= max_length
            })
            .prop_map(JsonValue::String)
            .boxed());
    }

    Ok(
        proptest::collection::vec(proptest::char::range(' ', '~'), min_length..=max_length)
            .prop_map(|chars| JsonValue::String(chars.into_iter().collect()))
            .boxed(),
    )
}

fn number_strategy(schema: &JsonObject) -> Result<BoxedStrategy<JsonValue>, SynthesisError> {
    let minimum = f64_keyword(schema, "minimum").or_else(|| f64_keyword(schema, "exclusiveMinimum"));
    let maximum = f64_keyword(schema, "maximum").or_else(|| f64_keyword(schema, "exclusiveMaximum"));
    let (low, high) = match (minimum, maximum) {
        (Some(low), Some(high)) => (low, high),
        (Some(low), None) => (low, low + NUMBER_SPAN),
        (None, Some(high)) => (high - NUMBER_SPAN, high),
        (None, None) => (-NUMBER_SPAN, NUMBER_SPAN),
    };
    if !(low.is_finite() && high.is_finite()) || high < low {
        return Err(unsupported("maximum must be >= minimum"));
    }
    if low == high {
        return Ok(Just(JsonValue::from(low)).boxed());
    }
    Ok((low..=high).prop_map(JsonValue::from).boxed())
}

fn integer_strategy(schema: &JsonObject) -> Result<BoxedStrategy<JsonValue>, SynthesisError> {
    let inclusive_low = f64_keyword(schema, "minimum").map(|value| value.ceil() as i64);
    let exclusive_low =
        f64_keyword(schema, "exclusiveMinimum").map(|value| (value.floor() as i64).saturating_add(1));
    let inclusive_high = f64_keyword(schema, "maximum").map(|value| value.floor() as i64);
    let exclusive_high =
        f64_keyword(schema, "exclusiveMaximum").map(|value| (value.ceil() as i64).saturating_sub(1));
    let minimum = inclusive_low.into_iter().chain(exclusive_low).max();
    let maximum = inclusive_high.into_iter().chain(exclusive_high).min();

    let (low, high) = match (minimum, maximum) {
        (Some(low), Some(high)) => (low, high),
        (Some(low), None) => (low, low.saturating_add(INTEGER_SPAN)),
        (None, Some(high)) => (high.saturating_sub(INTEGER_SPAN), high),
        (None, None) => (-INTEGER_SPAN, INTEGER_SPAN),
    };
    if high < low {
        return Err(unsupported("maximum must be >= minimum"));
    }
    Ok((low..=high).prop_map(JsonValue::from).boxed())
}

// Generation regexes are unanchored; the schema's anchors are implicit.
fn normalize_pattern(pattern: &str) -> String {
    let trimmed = pattern.strip_prefix('^').unwrap_or(pattern);
    match trimmed.strip_suffix('$') {
        Some(rest) if !rest.ends_with('\\') => rest.to_string(),
        _ => trimmed.to_string(),
    }
}

fn usize_keyword(schema: &JsonObject, key: &str) -> Option<usize> {
    schema
        .get(key)
        .and_then(JsonValue::as_u64)
        .and_then(|value| usize::try_from(value).ok())
}

fn f64_keyword(schema: &JsonObject, key: &str) -> Option<f64> {
    schema.get(key).and_then(JsonValue::as_f64)
}

fn required_keys(schema: &JsonObject) -> Vec<String> {
    schema
        .get("required")
        .and_then(JsonValue::as_array)
        .map(|required| {
            required
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Overlays `branch` on `base`. Property maps are unioned and `required`
/// lists concatenated without repeats; every other keyword is replaced.
fn merge_object_schema(base: &JsonObject, branch: &JsonObject) -> JsonObject {
    let mut merged = base.clone();
    for (key, value) in branch {
        let combined = match (key.as_str(), merged.get(key), value) {
            ("properties", Some(JsonValue::Object(ours)), JsonValue::Object(theirs)) => {
                let mut union = ours.clone();
                union.extend(theirs.iter().map(|(name, schema)| (name.clone(), schema.clone())));
                JsonValue::Object(union)
            }
            ("required", Some(JsonValue::Array(ours)), JsonValue::Array(theirs)) => {
                let mut names: Vec<&str> = Vec::new();
                for name in ours.iter().chain(theirs).filter_map(JsonValue::as_str) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
                JsonValue::from(names)
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

#[cfg(test)]
#[path = "../../tests/internal/schema_backend_unit_tests.rs"]
mod tests;
