//! Messages-API client bound to a single structured-output schema.
//!
//! Callers describe the shape they want as a [`StructuredSchema`]; the
//! request binds that schema as the only available tool and forces its
//! invocation, so a successful call always yields schema-conformant JSON.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde_json::Value;

/// Default base URL for the Messages API.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT_SECS: u64 = 5;
const REQUEST_TIMEOUT_SECS: u64 = 90;

/// Configuration for the model client.
#[derive(Debug, Clone)]
pub struct ModelClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

/// How a model call failed; callers decide whether to degrade or surface.
#[derive(Debug)]
pub enum ModelCallError {
    /// Transport failure or non-success HTTP status.
    Http(String),
    /// The call exceeded its deadline.
    Timeout,
    /// API-level error object in the response body.
    Api(String),
    /// Response parsed but carried no structured tool invocation.
    NoStructuredOutput,
    /// Response body was not valid JSON of the expected shape.
    Parse(String),
}

impl fmt::Display for ModelCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelCallError::Http(msg) => write!(f, "http error: {msg}"),
            ModelCallError::Timeout => f.write_str("model call timed out"),
            ModelCallError::Api(msg) => write!(f, "api error: {msg}"),
            ModelCallError::NoStructuredOutput => {
                f.write_str("model produced no structured output")
            }
            ModelCallError::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for ModelCallError {}

/// A named JSON schema the model must fill.
#[derive(Debug, Clone)]
pub struct StructuredSchema {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// User-message content block.
#[derive(Debug, Clone)]
pub enum ContentBlock {
    Text(String),
    /// Raw JPEG bytes, base64-encoded on serialisation.
    JpegImage(Vec<u8>),
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<ApiMessage>,
    tools: Vec<ApiToolDef<'a>>,
    tool_choice: ToolChoice<'a>,
}

#[derive(Serialize)]
struct ApiToolDef<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ToolChoice<'a> {
    #[serde(rename = "tool")]
    Tool { name: &'a str },
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text { text: String },
    Image { source: ApiImageSource },
}

#[derive(Serialize)]
struct ApiImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: &'static str,
    data: String,
}

impl From<ContentBlock> for ApiContentBlock {
    fn from(block: ContentBlock) -> Self {
        match block {
            ContentBlock::Text(text) => ApiContentBlock::Text { text },
            ContentBlock::JpegImage(bytes) => ApiContentBlock::Image {
                source: ApiImageSource {
                    source_type: "base64",
                    media_type: "image/jpeg",
                    data: BASE64.encode(bytes),
                },
            },
        }
    }
}

/// Messages-API client.
pub struct ModelClient {
    config: ModelClientConfig,
    http: reqwest::Client,
}

impl ModelClient {
    /// Creates a client with bounded connect and request timeouts.
    ///
    /// # Panics
    /// In test builds, panics when pointed at the production API; tests must
    /// target a mock server.
    pub fn new(config: ModelClientConfig) -> Self {
        #[cfg(test)]
        assert!(
            config.base_url != DEFAULT_BASE_URL,
            "tests must not use the production Messages API"
        );

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    /// Submits one user message and returns the schema-conformant JSON the
    /// model filled in.
    ///
    /// # Errors
    /// Returns a [`ModelCallError`] on transport failure, API error, or when
    /// the response carries no matching structured output.
    pub async fn submit_structured(
        &self,
        system: &str,
        content: Vec<ContentBlock>,
        schema: &StructuredSchema,
    ) -> Result<Value, ModelCallError> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system,
            messages: vec![ApiMessage {
                role: "user",
                content: content.into_iter().map(ApiContentBlock::from).collect(),
            }],
            tools: vec![ApiToolDef {
                name: &schema.name,
                description: &schema.description,
                input_schema: &schema.schema,
            }],
            tool_choice: ToolChoice::Tool { name: &schema.name },
        };

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ModelCallError::Timeout
                } else {
                    ModelCallError::Http(err.to_string())
                }
            })?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|err| ModelCallError::Parse(err.to_string()))?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown api error");
            return Err(ModelCallError::Api(message.to_string()));
        }
        if !status.is_success() {
            return Err(ModelCallError::Http(format!("status {status}")));
        }

        extract_tool_input(&body, &schema.name)
    }
}

/// Pulls the first matching tool invocation's input out of a response body.
fn extract_tool_input(body: &Value, tool_name: &str) -> Result<Value, ModelCallError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ModelCallError::Parse("response has no content array".to_string()))?;
    for block in blocks {
        if block.get("type").and_then(Value::as_str) == Some("tool_use")
            && block.get("name").and_then(Value::as_str) == Some(tool_name)
        {
            return block
                .get("input")
                .cloned()
                .ok_or_else(|| ModelCallError::Parse("tool_use block has no input".to_string()));
        }
    }
    tracing::debug!(tool = tool_name, "no tool_use block in model response");
    Err(ModelCallError::NoStructuredOutput)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_first_matching_tool_input() {
        let body = json!({
            "content": [
                {"type": "text", "text": "thinking..."},
                {"type": "tool_use", "name": "other", "input": {"x": 1}},
                {"type": "tool_use", "name": "decide", "input": {"decision_type": "no_action"}},
            ]
        });
        let input = extract_tool_input(&body, "decide").unwrap();
        assert_eq!(input["decision_type"], json!("no_action"));
    }

    #[test]
    fn missing_tool_use_is_no_structured_output() {
        let body = json!({"content": [{"type": "text", "text": "hi"}]});
        assert!(matches!(
            extract_tool_input(&body, "decide"),
            Err(ModelCallError::NoStructuredOutput)
        ));
    }

    #[test]
    fn malformed_body_is_parse_error() {
        let body = json!({"unexpected": true});
        assert!(matches!(
            extract_tool_input(&body, "decide"),
            Err(ModelCallError::Parse(_))
        ));
    }

    #[test]
    fn request_serialises_forced_tool_choice() {
        let schema = json!({"type": "object"});
        let request = MessagesRequest {
            model: "m",
            max_tokens: 64,
            system: "sys",
            messages: vec![ApiMessage {
                role: "user",
                content: vec![ApiContentBlock::from(ContentBlock::Text("hi".into()))],
            }],
            tools: vec![ApiToolDef {
                name: "decide",
                description: "d",
                input_schema: &schema,
            }],
            tool_choice: ToolChoice::Tool { name: "decide" },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["tool_choice"], json!({"type": "tool", "name": "decide"}));
        assert_eq!(value["messages"][0]["content"][0]["type"], json!("text"));
    }

    #[test]
    fn image_block_base64_encodes() {
        let block = ApiContentBlock::from(ContentBlock::JpegImage(vec![0xFF, 0xD8]));
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["source"]["media_type"], json!("image/jpeg"));
        assert_eq!(value["source"]["data"], json!(BASE64.encode([0xFF, 0xD8])));
    }
}
