//! Tool-server discovery
//!
//! Tool servers are declared through environment variables of the form
//! `MCP_SERVER_TOOL_<KEY>_<FIELD>=<value>` where FIELD is `TRANSPORT` or
//! `BASEURL`. Variables sharing a KEY describe one server. Servers that do not
//! validate are skipped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

const ENV_PREFIX: &str = "MCP_SERVER_TOOL_";

static TOOL_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^MCP_SERVER_TOOL_(?P<key>.+)_(?P<field>[A-Za-z]+)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolConfigError {
    #[error("invalid tool server config: base URL required")]
    MissingBaseUrl,
    #[error("invalid tool server config: unsupported transport {0:?}")]
    UnsupportedTransport(String),
}

/// Transports a tool server can be reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    #[serde(rename = "sse")]
    Sse,
    #[serde(rename = "http-stream")]
    HttpStream,
}

impl Transport {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sse" => Some(Transport::Sse),
            "http-stream" => Some(Transport::HttpStream),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Sse => "sse",
            Transport::HttpStream => "http-stream",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tool server as declared, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub transport: String,
    #[serde(rename = "baseURL")]
    pub base_url: String,
}

impl ToolServerConfig {
    pub fn validate(&self) -> Result<Transport, ToolConfigError> {
        if self.base_url.is_empty() {
            return Err(ToolConfigError::MissingBaseUrl);
        }
        Transport::parse(&self.transport)
            .ok_or_else(|| ToolConfigError::UnsupportedTransport(self.transport.clone()))
    }

    /// Fill fields that are still empty from `other`.
    fn merge(&mut self, other: ToolServerConfig) {
        if self.transport.is_empty() && !other.transport.is_empty() {
            self.transport = other.transport;
        }
        if self.base_url.is_empty() && !other.base_url.is_empty() {
            self.base_url = other.base_url;
        }
    }
}

/// A validated tool server, ready to hand to a model client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolServer {
    pub name: String,
    pub transport: Transport,
    pub base_url: String,
}

/// Source of environment variables.
pub trait EnvironSource {
    fn vars(&self) -> Vec<(String, String)>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEnviron;

impl EnvironSource for OsEnviron {
    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars().collect()
    }
}

impl EnvironSource for Vec<(String, String)> {
    fn vars(&self) -> Vec<(String, String)> {
        self.clone()
    }
}

pub struct ToolConfigResolver<E: EnvironSource = OsEnviron> {
    environ: E,
}

impl ToolConfigResolver<OsEnviron> {
    pub fn new() -> Self {
        Self { environ: OsEnviron }
    }
}

impl Default for ToolConfigResolver<OsEnviron> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EnvironSource> ToolConfigResolver<E> {
    pub fn with_environ(environ: E) -> Self {
        Self { environ }
    }

    /// Declared servers keyed by lower-cased KEY, merged but not validated.
    pub fn from_env_vars(&self) -> BTreeMap<String, ToolServerConfig> {
        let mut configs: BTreeMap<String, ToolServerConfig> = BTreeMap::new();
        for (name, value) in self.environ.vars() {
            if !name.starts_with(ENV_PREFIX) {
                continue;
            }
            let Some(caps) = TOOL_VAR_PATTERN.captures(&name) else {
                debug!(variable = %name, "ignoring malformed tool server variable");
                continue;
            };
            let key = caps["key"].to_lowercase();
            let mut declared = ToolServerConfig::default();
            match caps["field"].to_lowercase().as_str() {
                "transport" => declared.transport = value,
                "baseurl" => declared.base_url = value,
                other => {
                    debug!(variable = %name, field = other, "ignoring unknown tool server field");
                    continue;
                }
            }
            configs.entry(key).or_default().merge(declared);
        }
        configs
    }

    /// Declared servers that validate. Invalid ones are logged and skipped.
    pub fn resolve(&self) -> Vec<ToolServer> {
        self.from_env_vars()
            .into_iter()
            .filter_map(|(name, config)| match config.validate() {
                Ok(transport) => Some(ToolServer {
                    name,
                    transport,
                    base_url: config.base_url,
                }),
                Err(err) => {
                    info!(server = %name, error = %err, "skipping tool server");
                    None
                }
            })
            .collect()
    }
}
