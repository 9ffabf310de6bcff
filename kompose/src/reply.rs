//! Reply resolution
//!
//! Turns a model's free-text reply into a [`ResourceSet`]. The reply is
//! untrusted: it may be wrapped in a Markdown code fence, surrounded by
//! whitespace, be a single JSON object or a `---` separated YAML stream, and
//! contain documents that do not parse at all.
//!
//! Resolution is a single pass:
//!
//! 1. trim surrounding whitespace;
//! 2. strip a code fence tagged `json`, `yaml` or nothing;
//! 3. if the text opens with `{`, try it as one JSON object;
//! 4. otherwise split the unfenced text, trailing line breaks kept, into a
//!    stream and decode every segment;
//! 5. key every decoded document by its identifier.
//!
//! Segments that do not decode are dropped. The reply fails only when it is
//! empty or when no segment decodes.

use crate::codec::{self, CodecError};
use crate::document::Document;
use crate::error::{PipelineError, PipelineResult};
use crate::stream::{MultiDocumentStream, ResourceSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const FENCE: &str = "```";
const OUTPUT_OPEN: &str = "<output>";
const OUTPUT_CLOSE: &str = "</output>";

/// What to do when two documents in one reply share an identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// The later document replaces the earlier one.
    #[default]
    LastWriterWins,
    /// Fail the whole reply with [`PipelineError::DuplicateIdentifier`].
    Reject,
}

/// Resolves raw replies into resource sets.
#[derive(Debug, Clone, Default)]
pub struct ReplyResolver {
    duplicate_policy: DuplicatePolicy,
}

impl ReplyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    pub fn resolve(&self, raw: &str) -> PipelineResult<ResourceSet> {
        let text = clean_reply(raw);
        if text.is_empty() {
            return Err(PipelineError::ReplyParseFailure("empty reply".to_string()));
        }

        if let Some(doc) = classify_single(text) {
            let mut set = ResourceSet::new();
            set.insert(doc.resource_key(), doc);
            return Ok(set);
        }

        let stream = MultiDocumentStream::split(stream_body(raw));
        let mut set = ResourceSet::new();
        let mut first_error: Option<CodecError> = None;
        for (index, segment) in stream.iter().enumerate() {
            match codec::decode(segment) {
                Ok(doc) => self.insert(&mut set, doc)?,
                Err(err) => {
                    warn!(segment = index, error = %err, "dropping malformed document from reply");
                    first_error.get_or_insert(err);
                }
            }
        }

        if set.is_empty() {
            let reason = first_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "reply contains no documents".to_string());
            return Err(PipelineError::ReplyParseFailure(reason));
        }
        debug!(
            documents = set.len(),
            dropped = stream.len().saturating_sub(set.len()),
            "resolved reply"
        );
        Ok(set)
    }

    fn insert(&self, set: &mut ResourceSet, doc: Document) -> PipelineResult<()> {
        let key = doc.resource_key();
        if self.duplicate_policy == DuplicatePolicy::Reject && set.contains_key(&key) {
            return Err(PipelineError::DuplicateIdentifier(key));
        }
        if set.insert(key.clone(), doc).is_some() {
            debug!(identifier = %key, "later document replaces an earlier one");
        }
        Ok(())
    }
}

/// A reply that opens with `{` and is one valid JSON object.
fn classify_single(text: &str) -> Option<Document> {
    if !text.starts_with('{') {
        return None;
    }
    codec::decode_json(text).ok()
}

/// Trim and unfence a reply. This is the text the resolver classifies.
pub fn clean_reply(raw: &str) -> &str {
    unfence(raw.trim())
}

/// Text the stream is decoded from. Same as [`clean_reply`] except that
/// trailing line breaks survive, since a block scalar ending the last
/// document keeps them as content.
fn stream_body(raw: &str) -> &str {
    let body = fence_interior(raw).unwrap_or(raw);
    skip_blank_lines(body).trim_end_matches([' ', '\t'])
}

fn skip_blank_lines(text: &str) -> &str {
    let mut rest = text;
    while let Some((line, tail)) = rest.split_once('\n') {
        if !line.trim().is_empty() {
            break;
        }
        rest = tail;
    }
    rest
}

/// Strip a Markdown code fence.
///
/// Recognised when the trimmed text starts with three backticks whose info
/// string is empty, `json` or `yaml`, and ends with three backticks. Returns
/// the trimmed interior; any other text is returned unchanged.
pub fn unfence(text: &str) -> &str {
    fence_interior(text).map(str::trim).unwrap_or(text)
}

/// Untrimmed interior of a recognised fence.
fn fence_interior(text: &str) -> Option<&str> {
    let body = text.trim().strip_prefix(FENCE)?.strip_suffix(FENCE)?;
    let (info, interior) = match body.split_once('\n') {
        Some((info, interior)) => (info.trim(), interior),
        // Single line, e.g. ```json {"a": 1}```
        None => split_info_word(body),
    };
    is_fence_language(info).then_some(interior)
}

fn is_fence_language(info: &str) -> bool {
    info.is_empty() || info.eq_ignore_ascii_case("json") || info.eq_ignore_ascii_case("yaml")
}

/// Leading info word of a single-line fence body, if the body opens with one.
fn split_info_word(body: &str) -> (&str, &str) {
    let word_end = body
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(body.len());
    let rest = &body[word_end..];
    if word_end > 0 && (rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        (&body[..word_end], rest)
    } else {
        ("", body)
    }
}

/// Interior of the `<output>` block the built-in prompt asks for, from the
/// first opening tag to the last closing tag.
pub fn extract_tagged_output(text: &str) -> Option<&str> {
    let start = text.find(OUTPUT_OPEN)? + OUTPUT_OPEN.len();
    let end = text.rfind(OUTPUT_CLOSE)?;
    (start <= end).then(|| &text[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unfence_strips_tagged_and_bare_fences() {
        assert_eq!(unfence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(unfence("```yaml\na: 1\n```"), "a: 1");
        assert_eq!(unfence("```\na: 1\n```"), "a: 1");
        assert_eq!(unfence("```json\na: 1\nb: 2\n\n```"), "a: 1\nb: 2");
    }

    #[test]
    fn unfence_handles_single_line_fences() {
        assert_eq!(unfence("```{\"a\": 1}```"), "{\"a\": 1}");
        assert_eq!(unfence("```json {\"a\": 1}```"), "{\"a\": 1}");
        assert_eq!(unfence("```JSON {\"a\": 1}```"), "{\"a\": 1}");
        assert_eq!(unfence("```Yaml a: 1```"), "a: 1");
        assert_eq!(unfence("```a: 1```"), "a: 1");
    }

    #[test]
    fn single_line_fence_with_other_language_is_kept() {
        for text in ["```python x```", "```rust fn main() {}```", "```sh```"] {
            assert_eq!(unfence(text), text);
        }
    }

    #[test]
    fn stream_body_keeps_trailing_line_breaks() {
        assert_eq!(stream_body("\n\n---\na: |+\n  x\n\n"), "---\na: |+\n  x\n\n");
        assert_eq!(stream_body("```yaml\na: |\n  x\n```\n"), "a: |\n  x\n");
        assert_eq!(stream_body("  a: 1\n  b: 2\n  "), "  a: 1\n  b: 2\n");
    }

    #[test]
    fn unfence_leaves_other_text_alone() {
        for text in ["a: 1", "```python\nprint()\n```", "```json\n{}", "```", "{}\n```"] {
            assert_eq!(unfence(text), text);
        }
    }

    #[test]
    fn unfence_is_idempotent_on_clean_text() {
        let once = unfence("```yaml\nkind: Bucket\n```");
        assert_eq!(unfence(once), once);
    }

    #[test]
    fn extracts_tagged_output() {
        let reply = "<analysis>plan</analysis>\n<output>\n---\na: 1\n</output>";
        assert_eq!(extract_tagged_output(reply), Some("\n---\na: 1\n"));
        assert_eq!(extract_tagged_output("no tags"), None);
        assert_eq!(extract_tagged_output("</output><output>"), None);
    }

    #[test]
    fn resolves_single_json_object() {
        let set = ReplyResolver::new().resolve("{}").unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(""), Some(&Document::new()));
    }

    #[test]
    fn malformed_segments_are_dropped() {
        let reply = "---\nmetadata:\n  name: good\n---\n: : [\n---\njust text\n";
        let set = ReplyResolver::new().resolve(reply).unwrap();
        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["good"]);
    }

    #[test]
    fn reject_policy_fails_on_duplicates() {
        let reply = "---\nmetadata:\n  name: x\n---\nmetadata:\n  name: x\n";
        let resolver = ReplyResolver::new().with_duplicate_policy(DuplicatePolicy::Reject);
        assert_eq!(
            resolver.resolve(reply),
            Err(PipelineError::DuplicateIdentifier("x".to_string()))
        );
    }

    #[test]
    fn separators_only_is_a_failure() {
        assert!(matches!(
            ReplyResolver::new().resolve("---\n---\n"),
            Err(PipelineError::ReplyParseFailure(_))
        ));
    }

    #[test]
    fn duplicate_policy_names() {
        let policy: DuplicatePolicy = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(policy, DuplicatePolicy::Reject);
        assert_eq!(
            serde_json::to_string(&DuplicatePolicy::LastWriterWins).unwrap(),
            "\"last-writer-wins\""
        );
    }
}
