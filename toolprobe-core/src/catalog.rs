//! Tool catalog discovered from a connected server.

use std::collections::HashSet;

use rmcp::model::{JsonObject, Tool};
use serde::{Deserialize, Serialize};

use crate::session::DiscoveryError;

/// One named, schema-typed operation exposed by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    /// Tool name, unique within one server.
    pub name: String,
    /// Free-text description supplied by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing accepted arguments.
    pub input_schema: JsonObject,
    /// JSON Schema for `structuredContent`, when the tool declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<JsonObject>,
}

impl From<&Tool> for OperationSpec {
    fn from(tool: &Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.as_ref().map(|text| text.to_string()),
            input_schema: tool.input_schema.as_ref().clone(),
            output_schema: tool
                .output_schema
                .as_ref()
                .map(|schema| schema.as_ref().clone()),
        }
    }
}

/// The full set of operations discovered from one server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    /// Number of tools in the catalog.
    pub tool_count: usize,
    /// Tools in server order.
    pub tools: Vec<OperationSpec>,
}

impl Catalog {
    /// Builds a catalog, rejecting duplicate tool names.
    pub fn new(tools: Vec<OperationSpec>) -> Result<Self, DiscoveryError> {
        let mut seen = HashSet::new();
        for tool in &tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(DiscoveryError::Malformed(format!(
                    "duplicate tool name '{}'",
                    tool.name
                )));
            }
        }
        Ok(Self {
            tool_count: tools.len(),
            tools,
        })
    }

    /// Looks up a tool by name.
    pub fn get(&self, name: &str) -> Option<&OperationSpec> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    /// Returns whether the catalog has no tools.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
