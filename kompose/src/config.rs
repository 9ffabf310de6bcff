//! Function configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file)
//! is a valid configuration.

use crate::reply::DuplicatePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionConfig {
    /// Model identifier sent with every request
    pub model: String,
    /// Upper bound on generated tokens
    pub max_tokens: u32,
    /// Sampling temperature (0.0 = as deterministic as the model allows)
    pub temperature: f64,
    /// Override for the model API base URL
    pub base_url: Option<String>,
    /// Deadline for one model call
    pub timeout_seconds: u64,
    /// Name of the request credential holding the API key
    pub credential_name: String,
    /// Key inside that credential
    pub credential_key: String,
    /// TTL the orchestrator should cache the response for
    pub response_ttl_seconds: u64,
    /// Handling of duplicate identifiers in a reply
    pub duplicate_policy: DuplicatePolicy,
    /// Template file replacing the built-in prompt
    pub prompt_template_path: Option<PathBuf>,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-7-sonnet-latest".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            base_url: None,
            timeout_seconds: 120,
            credential_name: "claude".to_string(),
            credential_key: "ANTHROPIC_API_KEY".to_string(),
            response_ttl_seconds: 60,
            duplicate_policy: DuplicatePolicy::default(),
            prompt_template_path: None,
        }
    }
}

impl FunctionConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn empty_config_is_default() {
        assert_eq!(FunctionConfig::from_toml_str("").unwrap(), FunctionConfig::default());
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let config = FunctionConfig::from_toml_str(
            r#"
model = "claude-sonnet-4-0"
timeout_seconds = 30
duplicate_policy = "reject"
"#,
        )
        .unwrap();
        assert_eq!(config.model, "claude-sonnet-4-0");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.credential_key, "ANTHROPIC_API_KEY");
        assert_eq!(config.max_tokens, 1024);
    }

    #[test]
    fn unknown_policy_is_a_parse_error() {
        let err = FunctionConfig::from_toml_str("duplicate_policy = \"first\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "response_ttl_seconds = 5").unwrap();
        let config = FunctionConfig::load(file.path()).unwrap();
        assert_eq!(config.response_ttl(), Duration::from_secs(5));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = FunctionConfig::load("/nonexistent/kompose.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/kompose.toml"));
    }
}
