//! Error salvage
//!
//! Some model clients parse the model's reply themselves and fail with a
//! message that embeds the raw reply after [`AGENT_OUTPUT_MARKER`]. This
//! module recovers that reply so it can be resolved again.
//!
//! The marker is a contract on message shape. [`crate::model::ModelError`]
//! produces it from this constant; nothing else should spell it out.

use crate::reply::unfence;
use std::error::Error;

/// Prefix a failure message carries when it wraps an unparsed reply.
pub const AGENT_OUTPUT_MARKER: &str = "unable to parse agent output:";

/// Recover the reply embedded in a failure message. The marker may appear
/// anywhere, including behind prefixes added by intermediate callers.
pub fn salvage_message(message: &str) -> Option<String> {
    let (_, payload) = message.split_once(AGENT_OUTPUT_MARKER)?;
    Some(unfence(payload.trim()).trim().to_string())
}

/// Recover the reply embedded anywhere in an error or its sources.
pub fn salvage_error(err: &(dyn Error + 'static)) -> Option<String> {
    salvage_message(&error_chain_message(err))
}

/// Render an error and its sources as `outer: inner: root`. A source whose
/// text the message already contains is not repeated.
pub fn error_chain_message(err: &(dyn Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
