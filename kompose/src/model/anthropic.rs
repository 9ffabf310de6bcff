use super::{ModelClient, ModelError, ModelRequest};
use crate::tools::ToolServer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const MCP_BETA: &str = "mcp-client-2025-04-04";

/// Anthropic Messages API client
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(base_url: Option<String>) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, ModelError> {
        if request.api_key.is_empty() {
            return Err(ModelError::MissingApiKey);
        }

        let url = format!("{}/messages", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &request.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&MessagesRequest::from_request(request));
        if !request.tool_servers.is_empty() {
            builder = builder.header("anthropic-beta", MCP_BETA);
        }

        debug!(model = %request.model, tools = request.tool_servers.len(), "sending model request");
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| ModelError::UnexpectedContent(format!("cannot parse response: {}", e)))?;
        if let Some(usage) = &parsed.usage {
            debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "model usage"
            );
        }
        reply_text(parsed, !request.tool_servers.is_empty())
    }
}

// Messages API types
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    mcp_servers: Vec<McpServer<'a>>,
}

impl<'a> MessagesRequest<'a> {
    fn from_request(request: &'a ModelRequest) -> Self {
        Self {
            model: &request.model,
            system: request.system.as_deref().filter(|s| !s.is_empty()),
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            mcp_servers: request.tool_servers.iter().map(McpServer::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct McpServer<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    url: &'a str,
    name: &'a str,
}

impl<'a> From<&'a ToolServer> for McpServer<'a> {
    fn from(server: &'a ToolServer) -> Self {
        Self {
            kind: "url",
            url: &server.base_url,
            name: &server.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Pick the reply out of the content blocks.
///
/// Without tools the model must answer with exactly one text block. With
/// tools, tool-use blocks are interleaved and the last text block is the
/// answer.
fn reply_text(response: MessagesResponse, with_tools: bool) -> Result<String, ModelError> {
    let block_count = response.content.len();
    let mut texts: Vec<String> = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();

    if texts.is_empty() {
        return Err(ModelError::UnexpectedContent(format!(
            "no text in {} content block(s)",
            block_count
        )));
    }
    if with_tools {
        return Ok(texts.pop().unwrap_or_default());
    }
    if block_count != 1 {
        return Err(ModelError::AgentOutput(texts.join("\n")));
    }
    Ok(texts.remove(0))
}
