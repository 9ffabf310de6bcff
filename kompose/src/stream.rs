//! Resource sets and multi-document streams
//!
//! A [`ResourceSet`] is serialized to one YAML stream in which every document
//! is preceded by a `---` separator line and annotated with the identifier it
//! is stored under. Streams are emitted in identifier order, so the output is
//! a pure function of the set's contents.

use crate::codec;
use crate::document::Document;
use crate::error::{PipelineError, PipelineResult};
use std::collections::BTreeMap;

/// Separator line between documents of a stream.
pub const DOCUMENT_SEPARATOR: &str = "---";

/// Identifier → document. The empty identifier means "unnamed".
pub type ResourceSet = BTreeMap<String, Document>;

/// Serialize a resource set as a YAML stream.
///
/// Each document is cloned and annotated with its identifier before encoding,
/// overwriting any stale annotation. Fails on the first document that cannot
/// be encoded; no partial stream is returned.
///
/// Identifiers with leading or trailing whitespace are refused: the YAML
/// emitter leaves some Unicode spaces unquoted and they would not read back.
pub fn serialize(set: &ResourceSet) -> PipelineResult<String> {
    // BTreeMap iteration is ordered by identifier.
    let mut out = String::new();
    for (id, doc) in set {
        if id.trim() != id {
            return Err(PipelineError::EncodeFailure(format!(
                "identifier {:?} has leading or trailing whitespace",
                id
            )));
        }
        let mut doc = doc.clone();
        doc.set_identifier(id);
        let text = codec::encode(&doc)?;
        push_document(&mut out, &text);
    }
    Ok(out)
}

/// Serialize a single document. No identifier is injected.
pub fn serialize_single(doc: &Document) -> PipelineResult<String> {
    Ok(codec::encode(doc)?)
}

/// Serialize documents that have no identifiers as a YAML stream, keeping
/// their order.
pub fn serialize_unnamed<'a>(docs: impl IntoIterator<Item = &'a Document>) -> PipelineResult<String> {
    let mut out = String::new();
    for doc in docs {
        let text = codec::encode(doc)?;
        push_document(&mut out, &text);
    }
    Ok(out)
}

fn push_document(out: &mut String, text: &str) {
    out.push_str(DOCUMENT_SEPARATOR);
    out.push('\n');
    out.push_str(text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
}

/// Candidate documents split out of a reply. Blank segments are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiDocumentStream<'a> {
    segments: Vec<&'a str>,
}

impl<'a> MultiDocumentStream<'a> {
    pub fn split(text: &'a str) -> Self {
        let mut segments = Vec::new();
        let mut start = 0;
        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            if is_separator(line) {
                segments.push(&text[start..offset]);
                start = offset + line.len();
            }
            offset += line.len();
        }
        segments.push(&text[start..]);
        segments.retain(|segment| !segment.trim().is_empty());
        Self { segments }
    }

    pub fn segments(&self) -> &[&'a str] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.segments.iter().copied()
    }
}

fn is_separator(line: &str) -> bool {
    line.trim_end() == DOCUMENT_SEPARATOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn serializes_sorted_and_annotated() {
        let mut set = ResourceSet::new();
        set.insert("b".to_string(), Document::new().with("kind", "B"));
        set.insert("a".to_string(), Document::new().with("kind", "A"));

        let expected = "---\nkind: A\nmetadata:\n  annotations:\n    upbound.io/name: a\n\
                        ---\nkind: B\nmetadata:\n  annotations:\n    upbound.io/name: b\n";
        assert_eq!(serialize(&set).unwrap(), expected);
    }

    #[test]
    fn serialize_does_not_touch_the_input() {
        let mut set = ResourceSet::new();
        set.insert("a".to_string(), Document::new().with("kind", "A"));
        let before = set.clone();
        serialize(&set).unwrap();
        assert_eq!(set, before);
    }

    #[test]
    fn identifiers_with_surrounding_whitespace_are_refused() {
        for id in ["bucket\u{3000}", "\u{2003}bucket", " bucket", "bucket\t"] {
            let mut set = ResourceSet::new();
            set.insert(id.to_string(), Document::new().with("kind", "Bucket"));
            assert!(
                matches!(serialize(&set), Err(PipelineError::EncodeFailure(_))),
                "{:?} should be refused",
                id
            );
        }
    }

    #[test]
    fn inner_whitespace_in_identifiers_is_kept() {
        let mut set = ResourceSet::new();
        set.insert("my bucket".to_string(), Document::new());
        let text = serialize(&set).unwrap();
        let doc = codec::decode(MultiDocumentStream::split(&text).segments()[0]).unwrap();
        assert_eq!(doc.identifier(), Some("my bucket"));
    }

    #[test]
    fn empty_set_serializes_to_nothing() {
        assert_eq!(serialize(&ResourceSet::new()).unwrap(), "");
    }

    #[test]
    fn serialize_single_has_no_separator_or_annotation() {
        let doc = Document::new().with("kind", "XBucket");
        assert_eq!(serialize_single(&doc).unwrap(), "kind: XBucket\n");
    }

    #[test]
    fn splits_on_separator_lines_only() {
        let text = "---\na: 1\n---\nb: '---'\nc: x---y\n---  \nd: 2";
        let stream = MultiDocumentStream::split(text);
        assert_eq!(stream.segments(), &["a: 1\n", "b: '---'\nc: x---y\n", "d: 2"]);
    }

    #[test]
    fn blank_segments_are_dropped() {
        let stream = MultiDocumentStream::split("---\n\n---\n  \n---\n");
        assert!(stream.is_empty());
    }

    #[test]
    fn text_without_separator_is_one_segment() {
        let stream = MultiDocumentStream::split("a: b");
        assert_eq!(stream.len(), 1);
    }
}
