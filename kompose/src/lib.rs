// Kompose Library
// Model-driven composition function: observed resources in, desired resources out

pub mod codec;
pub mod config;
pub mod document;
pub mod error;
pub mod function;
pub mod model;
pub mod prompt;
pub mod protocol;
pub mod reply;
pub mod salvage;
pub mod stream;
pub mod tools;

pub use config::{ConfigError, FunctionConfig};
pub use document::{Document, Value, NAME_ANNOTATION};
pub use error::{PipelineError, PipelineResult};
pub use function::{ComposeFunction, FunctionError, Mode, RenderedPrompt};
pub use model::{AnthropicClient, ModelClient, ModelError, ModelRequest};
pub use prompt::{PromptTemplate, PromptVariables};
pub use protocol::{PromptInput, RunFunctionRequest, RunFunctionResponse};
pub use reply::{DuplicatePolicy, ReplyResolver};
pub use salvage::{salvage_error, salvage_message, AGENT_OUTPUT_MARKER};
pub use stream::{MultiDocumentStream, ResourceSet};
pub use tools::{ToolConfigResolver, ToolServer, ToolServerConfig};
