//! Model boundary
//!
//! The function talks to a language model through [`ModelClient`]. The
//! production client is [`AnthropicClient`]; tests substitute their own.

mod anthropic;

pub use anthropic::{AnthropicClient, DEFAULT_BASE_URL};

use crate::salvage::AGENT_OUTPUT_MARKER;
use crate::tools::ToolServer;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no API key provided")]
    MissingApiKey,
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected model response: {0}")]
    UnexpectedContent(String),
    #[error("model call did not finish within {0:?}")]
    Timeout(Duration),
    /// The model answered but its output could not be used as is. Carries
    /// the raw output so it can be salvaged.
    #[error("{} {}", AGENT_OUTPUT_MARKER, .0)]
    AgentOutput(String),
}

/// One prompt for the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub api_key: String,
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub tool_servers: Vec<ToolServer>,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send the prompt and return the model's text reply.
    async fn invoke(&self, request: &ModelRequest) -> Result<String, ModelError>;
}
