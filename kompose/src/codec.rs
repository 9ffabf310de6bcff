//! Structured-document codec
//!
//! Converts between [`Document`]s and their canonical text. Encoding emits
//! block-style YAML with every mapping's keys in lexicographic order, so the
//! same document always produces the same bytes. Decoding accepts YAML and,
//! since JSON is a subset of it, JSON.

use crate::document::Document;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("cannot encode document: {0}")]
    Encode(String),
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Encode a document as canonical YAML.
pub fn encode(doc: &Document) -> Result<String, CodecError> {
    serde_yaml::to_string(doc).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode one YAML (or JSON) document. The top-level node must be a mapping.
pub fn decode(text: &str) -> Result<Document, CodecError> {
    serde_yaml::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decode a strict JSON object.
pub fn decode_json(text: &str) -> Result<Document, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Encode a document as pretty-printed JSON, keys sorted.
pub fn encode_json(doc: &Document) -> Result<String, CodecError> {
    serde_json::to_string_pretty(doc).map_err(|e| CodecError::Encode(e.to_string()))
}
