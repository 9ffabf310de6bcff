//! Pipeline error kinds.

use crate::codec::CodecError;
use thiserror::Error;

/// Failures of the interchange and resolution pipeline. None of them are
/// retried internally.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("cannot encode document: {0}")]
    EncodeFailure(String),

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("cannot parse reply: {0}")]
    ReplyParseFailure(String),

    #[error("cannot bind prompt template: {0}")]
    TemplateBindingFailure(String),

    #[error("reply contains more than one document with identifier {0:?}")]
    DuplicateIdentifier(String),
}

impl From<CodecError> for PipelineError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Encode(msg) => PipelineError::EncodeFailure(msg),
            CodecError::Malformed(msg) => PipelineError::MalformedDocument(msg),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
