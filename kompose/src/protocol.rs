//! Orchestrator messages
//!
//! JSON shapes of the function request and response, in the orchestrator's
//! camelCase encoding, plus the small set of response helpers every function
//! needs.

use crate::document::Document;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub type JsonMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("request has no function input")]
    Missing,
    #[error("cannot decode function input: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential is not of type data")]
    NotData,
    #[error("credential is missing required key {0:?}")]
    MissingKey(String),
    #[error("credential key {key:?} is not valid base64: {source}")]
    InvalidEncoding {
        key: String,
        #[source]
        source: base64::DecodeError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestMeta {
    pub tag: String,
}

/// One resource as the orchestrator sends it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resource {
    pub resource: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<String>,
}

impl From<Document> for Resource {
    fn from(resource: Document) -> Self {
        Self {
            resource,
            ready: None,
        }
    }
}

/// Observed or desired state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct State {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite: Option<Resource>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, Resource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CredentialData {
    /// Key → base64 value.
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_data: Option<CredentialData>,
}

impl Credentials {
    pub fn from_data<K, V>(data: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: AsRef<[u8]>,
    {
        Self {
            credential_data: Some(CredentialData {
                data: data
                    .into_iter()
                    .map(|(k, v)| (k.into(), STANDARD.encode(v)))
                    .collect(),
            }),
        }
    }

    /// Decoded value stored under `key`.
    pub fn data_value(&self, key: &str) -> Result<Vec<u8>, CredentialError> {
        let data = self.credential_data.as_ref().ok_or(CredentialError::NotData)?;
        let encoded = data
            .data
            .get(key)
            .ok_or_else(|| CredentialError::MissingKey(key.to_string()))?;
        STANDARD
            .decode(encoded)
            .map_err(|source| CredentialError::InvalidEncoding {
                key: key.to_string(),
                source,
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resources {
    pub items: Vec<Resource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunFunctionRequest {
    pub meta: RequestMeta,
    pub observed: State,
    pub desired: State,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "JsonMap::is_empty")]
    pub context: JsonMap,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, Credentials>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub required_resources: BTreeMap<String, Resources>,
}

impl RunFunctionRequest {
    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T, InputError> {
        let input = self.input.clone().ok_or(InputError::Missing)?;
        Ok(serde_json::from_value(input)?)
    }

    pub fn credentials(&self, name: &str) -> Option<&Credentials> {
        self.credentials.get(name)
    }

    pub fn required_resources(&self, name: &str) -> Option<&Resources> {
        self.required_resources.get(name)
    }
}

/// Function input resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptInput {
    #[serde(alias = "userPrompt")]
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Request context keys to show the model.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "SEVERITY_FATAL")]
    Fatal,
    #[serde(rename = "SEVERITY_WARNING")]
    Warning,
    #[serde(rename = "SEVERITY_NORMAL")]
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    #[serde(rename = "TARGET_COMPOSITE")]
    Composite,
    #[serde(rename = "TARGET_COMPOSITE_AND_CLAIM")]
    CompositeAndClaim,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResult {
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseMeta {
    pub tag: String,
    pub ttl: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunFunctionResponse {
    pub meta: ResponseMeta,
    pub desired: State,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<FunctionResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "JsonMap::is_empty")]
    pub context: JsonMap,
}

impl RunFunctionResponse {
    /// Response that carries the request's tag, desired state and context
    /// forward unchanged.
    pub fn to(request: &RunFunctionRequest, ttl: Duration) -> Self {
        Self {
            meta: ResponseMeta {
                tag: request.meta.tag.clone(),
                ttl: format_duration(ttl),
            },
            desired: request.desired.clone(),
            results: Vec::new(),
            conditions: Vec::new(),
            context: request.context.clone(),
        }
    }

    pub fn fatal(&mut self, message: impl Into<String>) {
        self.push_result(Severity::Fatal, message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push_result(Severity::Warning, message.into());
    }

    pub fn normal(&mut self, message: impl Into<String>) {
        self.push_result(Severity::Normal, message.into());
    }

    pub fn set_success_condition(&mut self) {
        self.conditions.push(Condition {
            kind: "FunctionSuccess".to_string(),
            status: "STATUS_CONDITION_TRUE".to_string(),
            reason: "Success".to_string(),
            target: Some(Target::CompositeAndClaim),
        });
    }

    pub fn is_fatal(&self) -> bool {
        self.results.iter().any(|r| r.severity == Severity::Fatal)
    }

    fn push_result(&mut self, severity: Severity, message: String) {
        self.results.push(FunctionResult {
            severity,
            message,
            target: Some(Target::Composite),
        });
    }
}

/// Duration in the orchestrator's seconds notation, e.g. `60s` or `1.5s`.
fn format_duration(duration: Duration) -> String {
    format!("{}s", duration.as_secs_f64())
}
