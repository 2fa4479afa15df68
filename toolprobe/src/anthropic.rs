//! Case backend backed by the Anthropic Messages API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolprobe_core::{
    CandidateCase, CaseBackend, OperationSpec, SynthesisError, SynthesisFuture, SynthesisRequest,
};

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_response_bytes: usize,
}

impl AnthropicBackend {
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_response_bytes: MAX_RESPONSE_BYTES,
        }
    }

    /// Reads the key from `ANTHROPIC_API_KEY`; `None` when it is unset or empty.
    pub fn from_env(model: Option<String>) -> Option<Self> {
        let key = std::env::var(API_KEY_ENV).ok()?;
        if key.trim().is_empty() {
            return None;
        }
        Some(Self::new(key, model))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Caps how much of a reply body is read before giving up.
    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request_cases(
        &self,
        operation: &OperationSpec,
        count: usize,
    ) -> Result<Vec<CandidateCase>, SynthesisError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: vec![Message {
                role: "user",
                content: build_prompt(operation, count),
            }],
        };
        log::debug!("requesting {count} cases for '{}' from {}", operation.name, self.model);
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|error| SynthesisError::Backend(error.to_string()))?;

        let status = response.status();
        let bytes = read_limited(response, self.max_response_bytes).await?;
        if !status.is_success() {
            let detail = String::from_utf8_lossy(&bytes);
            return Err(SynthesisError::Backend(format!(
                "messages API returned {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let reply: MessagesResponse = serde_json::from_slice(&bytes)
            .map_err(|error| SynthesisError::Malformed(format!("unexpected reply: {error}")))?;
        let text: String = reply
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        parse_candidates(&text)
    }
}

/// Reads the body chunk by chunk, stopping as soon as `limit` is passed.
async fn read_limited(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, SynthesisError> {
    let declared = response.content_length().unwrap_or(0);
    if declared > limit as u64 {
        return Err(SynthesisError::BudgetExceeded {
            size: usize::try_from(declared).unwrap_or(usize::MAX),
            limit,
        });
    }
    let mut body = Vec::with_capacity(usize::try_from(declared).unwrap_or(0));
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|error| SynthesisError::Backend(error.to_string()))?
    {
        if body.len() + chunk.len() > limit {
            return Err(SynthesisError::BudgetExceeded {
                size: body.len() + chunk.len(),
                limit,
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

impl CaseBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn synthesize<'a>(&'a self, request: SynthesisRequest<'a>) -> SynthesisFuture<'a> {
        Box::pin(self.request_cases(request.operation, request.count))
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub(crate) fn build_prompt(operation: &OperationSpec, count: usize) -> String {
    let schema = serde_json::to_string_pretty(&operation.input_schema)
        .unwrap_or_else(|_| "{}".to_string());
    let description = operation.description.as_deref().unwrap_or("(none)");
    let mut prompt = format!(
        "You are writing test cases for a tool exposed by an MCP server.\n\n\
         Tool name: {name}\n\
         Description: {description}\n\
         Input schema:\n{schema}\n",
        name = operation.name,
    );
    if let Some(output) = &operation.output_schema {
        let output = serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string());
        prompt.push_str(&format!("Output schema:\n{output}\n"));
    }
    prompt.push_str(&format!(
        "\nWrite {count} test cases. Mix typical inputs, edge cases and at most one invalid \
         input that the tool should reject.\n\
         Answer with only a JSON array. Each element must look like:\n\
         {{\"description\": \"what the case checks\", \
         \"arguments\": {{...tool arguments...}}, \
         \"expectation\": {{\"outcome\": \"success\" or \"error\", \
         \"requiredFields\": [\"field\"], \
         \"fieldTypes\": {{\"field\": \"string|number|integer|boolean|object|array|null\"}}}}}}\n\
         Field names may be top-level keys or JSON pointers into the result.\n"
    ));
    prompt
}

/// Extracts the candidate array from model text, tolerating code fences
/// and prose around it.
pub(crate) fn parse_candidates(text: &str) -> Result<Vec<CandidateCase>, SynthesisError> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Err(SynthesisError::Malformed(
            "reply does not contain a JSON array".to_string(),
        ));
    };
    if end < start {
        return Err(SynthesisError::Malformed(
            "reply does not contain a JSON array".to_string(),
        ));
    }
    let items: Vec<Value> = serde_json::from_str(&text[start..=end])
        .map_err(|error| SynthesisError::Malformed(format!("invalid JSON array: {error}")))?;
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item).map_err(|error| {
                SynthesisError::Malformed(format!("case {index} is not usable: {error}"))
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "../tests/internal/anthropic_unit_tests.rs"]
mod tests;
