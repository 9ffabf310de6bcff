//! Function runner
//!
//! [`ComposeFunction`] handles one orchestrator request end to end. It either
//! composes resources (the default) or, when the request carries a watched
//! resource, runs as an operation and hands the model's reply back as a
//! result message.
//!
//! Every failure becomes a single fatal result on the response. The desired
//! state is only replaced once a reply has been resolved in full.

use crate::config::FunctionConfig;
use crate::error::PipelineError;
use crate::model::{ModelClient, ModelError, ModelRequest};
use crate::prompt::{PromptTemplate, PromptVariables};
use crate::protocol::{
    CredentialError, InputError, PromptInput, Resource, RunFunctionRequest, RunFunctionResponse,
};
use crate::reply::{extract_tagged_output, ReplyResolver};
use crate::salvage::salvage_error;
use crate::stream::{self, ResourceSet};
use crate::tools::ToolServer;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Context key marking a request the function must not act on.
pub const IGNORED_RESOURCE_KEY: &str = "ops.upbound.io/ignored-resource";

/// Required-resources key that switches the function into operation mode.
pub const WATCHED_RESOURCE_KEY: &str = "ops.crossplane.io/watched-resource";

#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("cannot read prompt template {path}: {source}")]
    TemplateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid prompt template: {0}")]
    Template(#[source] PipelineError),
    #[error("cannot get function input: {0}")]
    Input(#[from] InputError),
    #[error("cannot get {key} from credential {name:?}: {reason}")]
    Credentials {
        name: String,
        key: String,
        reason: String,
    },
    #[error("cannot convert observed composite resource to YAML: {0}")]
    Composite(#[source] PipelineError),
    #[error("cannot convert observed composed resources to YAML: {0}")]
    Composed(#[source] PipelineError),
    #[error("cannot render context fields: {0}")]
    Context(String),
    #[error("cannot message model: {0}")]
    Model(#[source] ModelError),
    #[error("cannot parse model output: {0}")]
    Reply(#[source] PipelineError),
}

/// What the function does with the model's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Resolve the reply into desired composed resources.
    Composition,
    /// Return the reply as a result message.
    Operation,
}

/// A prompt ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub mode: Mode,
    pub system: Option<String>,
    pub user: String,
}

enum Outcome {
    Composed(ResourceSet),
    Operated(String),
}

pub struct ComposeFunction {
    config: FunctionConfig,
    template: PromptTemplate,
    resolver: ReplyResolver,
    model: Arc<dyn ModelClient>,
    tool_servers: Vec<ToolServer>,
}

impl ComposeFunction {
    /// Build a function. The prompt template is loaded and parsed here, so a
    /// bad template fails at startup rather than per request.
    pub fn new(config: FunctionConfig, model: Arc<dyn ModelClient>) -> Result<Self, FunctionError> {
        let template = match &config.prompt_template_path {
            Some(path) => {
                let source =
                    std::fs::read_to_string(path).map_err(|source| FunctionError::TemplateFile {
                        path: path.clone(),
                        source,
                    })?;
                PromptTemplate::parse(&source)
            }
            None => PromptTemplate::builtin(),
        }
        .map_err(FunctionError::Template)?;

        let resolver = ReplyResolver::new().with_duplicate_policy(config.duplicate_policy);
        Ok(Self {
            config,
            template,
            resolver,
            model,
            tool_servers: Vec::new(),
        })
    }

    pub fn with_tool_servers(mut self, tool_servers: Vec<ToolServer>) -> Self {
        self.tool_servers = tool_servers;
        self
    }

    pub fn config(&self) -> &FunctionConfig {
        &self.config
    }

    /// Run with the configured deadline.
    pub async fn run(&self, request: &RunFunctionRequest) -> RunFunctionResponse {
        self.run_with_deadline(request, self.config.timeout()).await
    }

    pub async fn run_with_deadline(
        &self,
        request: &RunFunctionRequest,
        deadline: Duration,
    ) -> RunFunctionResponse {
        let tag = request.meta.tag.as_str();
        info!(tag, "running function");

        let mut response = RunFunctionResponse::to(request, self.config.response_ttl());
        if is_ignored(request) {
            info!(tag, "received an ignored resource, skipping");
            response.normal("received an ignored resource, skipping");
            response.set_success_condition();
            return response;
        }

        match self.execute(request, deadline).await {
            Ok(Outcome::Composed(set)) => {
                info!(tag, resources = set.len(), "composed resources");
                response.desired.resources = set
                    .into_iter()
                    .map(|(id, doc)| (id, Resource::from(doc)))
                    .collect();
            }
            Ok(Outcome::Operated(reply)) => {
                response.normal(reply);
                response.set_success_condition();
            }
            Err(err) => {
                warn!(tag, error = %err, "function failed");
                response.fatal(err.to_string());
            }
        }
        response
    }

    /// Build the prompt a request would send, without calling the model.
    pub fn render_prompt(&self, request: &RunFunctionRequest) -> Result<RenderedPrompt, FunctionError> {
        let input: PromptInput = request.input_as()?;
        self.build_prompt(request, &input)
    }

    async fn execute(
        &self,
        request: &RunFunctionRequest,
        deadline: Duration,
    ) -> Result<Outcome, FunctionError> {
        let input: PromptInput = request.input_as()?;
        let api_key = self.api_key(request)?;
        let prompt = self.build_prompt(request, &input)?;
        debug!(prompt = %prompt.user, "using prompt");

        let model_request = ModelRequest {
            api_key,
            model: self.config.model.clone(),
            system: prompt.system,
            prompt: prompt.user,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            tool_servers: self.tool_servers.clone(),
        };

        let reply = match tokio::time::timeout(deadline, self.model.invoke(&model_request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => return self.recover(prompt.mode, err),
            Err(_) => return Err(FunctionError::Model(ModelError::Timeout(deadline))),
        };
        debug!(reply = %reply, "got reply from model");

        match prompt.mode {
            Mode::Operation => Ok(Outcome::Operated(reply)),
            Mode::Composition => self.resolve(&reply).map(Outcome::Composed),
        }
    }

    /// A failed model call may still carry a usable reply.
    fn recover(&self, mode: Mode, err: ModelError) -> Result<Outcome, FunctionError> {
        let Some(salvaged) = salvage_error(&err) else {
            return Err(FunctionError::Model(err));
        };
        info!(error = %err, "salvaged reply from model error");
        match mode {
            Mode::Operation => Ok(Outcome::Operated(salvaged)),
            Mode::Composition => self.resolve(&salvaged).map(Outcome::Composed),
        }
    }

    fn resolve(&self, reply: &str) -> Result<ResourceSet, FunctionError> {
        let output = extract_tagged_output(reply).unwrap_or(reply);
        self.resolver.resolve(output).map_err(FunctionError::Reply)
    }

    fn api_key(&self, request: &RunFunctionRequest) -> Result<String, FunctionError> {
        let name = &self.config.credential_name;
        let key = &self.config.credential_key;
        let failed = |reason: String| FunctionError::Credentials {
            name: name.clone(),
            key: key.clone(),
            reason,
        };

        let credentials = request
            .credentials(name)
            .ok_or_else(|| failed(format!("{}: credential not found", name)))?;
        let value = credentials.data_value(key).map_err(|err| match err {
            CredentialError::NotData => failed(format!("{}: credential is not of type data", name)),
            other => failed(other.to_string()),
        })?;
        let value = String::from_utf8(value)
            .map_err(|_| failed(format!("{}: value is not valid UTF-8", key)))?;
        Ok(value.trim_matches('\n').to_string())
    }

    fn build_prompt(
        &self,
        request: &RunFunctionRequest,
        input: &PromptInput,
    ) -> Result<RenderedPrompt, FunctionError> {
        let context = context_yaml(request, &input.context_fields)?;
        let (mode, composite, composed) = match request.required_resources(WATCHED_RESOURCE_KEY) {
            Some(watched) => {
                let mut items = watched.items.iter().map(|item| &item.resource);
                let composite = match items.next() {
                    Some(first) => stream::serialize_single(first).map_err(FunctionError::Composite)?,
                    None => String::new(),
                };
                let composed = stream::serialize_unnamed(items).map_err(FunctionError::Composed)?;
                (Mode::Operation, composite, composed)
            }
            None => {
                let observed = request
                    .observed
                    .composite
                    .as_ref()
                    .map(|r| r.resource.clone())
                    .unwrap_or_default();
                let composite =
                    stream::serialize_single(&observed).map_err(FunctionError::Composite)?;
                let set: ResourceSet = request
                    .observed
                    .resources
                    .iter()
                    .map(|(id, r)| (id.clone(), r.resource.clone()))
                    .collect();
                let composed = stream::serialize(&set).map_err(FunctionError::Composed)?;
                (Mode::Composition, composite, composed)
            }
        };

        let user = self.template.render(&PromptVariables {
            composite,
            composed,
            input: input.prompt.clone(),
            context,
        });
        Ok(RenderedPrompt {
            mode,
            system: input.system_prompt.clone().filter(|s| !s.is_empty()),
            user,
        })
    }
}

fn is_ignored(request: &RunFunctionRequest) -> bool {
    request
        .context
        .get(IGNORED_RESOURCE_KEY)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

/// Selected context fields as a YAML mapping. Absent fields are skipped.
fn context_yaml(request: &RunFunctionRequest, fields: &[String]) -> Result<String, FunctionError> {
    let selected: BTreeMap<&str, &serde_json::Value> = fields
        .iter()
        .filter_map(|field| {
            request
                .context
                .get(field)
                .map(|value| (field.as_str(), value))
        })
        .collect();
    if selected.is_empty() {
        return Ok(String::new());
    }
    serde_yaml::to_string(&selected).map_err(|e| FunctionError::Context(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Credentials;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ModelClient for Echo {
        async fn invoke(&self, request: &ModelRequest) -> Result<String, ModelError> {
            Ok(request.prompt.clone())
        }
    }

    fn function() -> ComposeFunction {
        ComposeFunction::new(FunctionConfig::default(), Arc::new(Echo)).unwrap()
    }

    fn request() -> RunFunctionRequest {
        let mut request: RunFunctionRequest = serde_json::from_value(json!({
            "input": {"prompt": "add a bucket", "contextFields": ["env", "absent"]},
            "context": {"env": "prod", "secret": "x"},
            "observed": {
                "composite": {"resource": {"kind": "XBucket"}},
                "resources": {"b": {"resource": {"kind": "Bucket"}}}
            }
        }))
        .unwrap();
        request.credentials.insert(
            "claude".to_string(),
            Credentials::from_data([("ANTHROPIC_API_KEY", "sk-test\n")]),
        );
        request
    }

    #[test]
    fn api_key_is_trimmed_of_newlines() {
        assert_eq!(function().api_key(&request()).unwrap(), "sk-test");
    }

    #[test]
    fn prompt_binds_observed_state_and_selected_context() {
        let prompt = function().render_prompt(&request()).unwrap();
        assert_eq!(prompt.mode, Mode::Composition);
        assert!(prompt.user.contains("<composite>\nkind: XBucket\n\n</composite>"));
        assert!(prompt.user.contains("---\nkind: Bucket\nmetadata:\n  annotations:\n    upbound.io/name: b\n"));
        assert!(prompt.user.contains("env: prod"));
        assert!(!prompt.user.contains("secret"));
        assert!(prompt.user.contains("add a bucket"));
    }

    #[test]
    fn watched_resources_select_operation_mode() {
        let mut request = request();
        request.required_resources = serde_json::from_value(json!({
            "ops.crossplane.io/watched-resource": {"items": [{"resource": {"kind": "Deployment"}}]}
        }))
        .unwrap();
        let prompt = function().render_prompt(&request).unwrap();
        assert_eq!(prompt.mode, Mode::Operation);
        assert!(prompt.user.contains("<composite>\nkind: Deployment\n\n</composite>"));
    }

    #[test]
    fn context_without_selected_fields_is_empty() {
        assert_eq!(context_yaml(&request(), &[]).unwrap(), "");
    }

    #[test]
    fn missing_template_file_fails_construction() {
        let config = FunctionConfig {
            prompt_template_path: Some(PathBuf::from("/nonexistent/prompt.txt")),
            ..FunctionConfig::default()
        };
        assert!(matches!(
            ComposeFunction::new(config, Arc::new(Echo)),
            Err(FunctionError::TemplateFile { .. })
        ));
    }
}
