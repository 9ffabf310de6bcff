//! Prompt assembly
//!
//! A [`PromptTemplate`] is parsed once, when the function is built, into
//! literal text and named slots. Rendering only concatenates, so it cannot
//! fail and values are never re-expanded: a composed resource that happens to
//! contain `{input}` is inserted verbatim.
//!
//! Slot syntax is `{name}`; `{{` and `}}` produce literal braces.

use crate::error::{PipelineError, PipelineResult};

/// Built-in template. Asks for a `---` separated YAML stream in `<output>`
/// tags, each manifest carrying its `upbound.io/name` annotation.
pub const BUILTIN_TEMPLATE: &str = r#"
You generate and update Kubernetes Resource Model (KRM) manifests that will be
applied with server-side apply. Work from the composite resource and from any
composed resources that already exist.

The composite resource:

<composite>
{composite}
</composite>

Composed resources that already exist, if any:

<composed>
{composed}
</composed>

Extra context, if any:

<context>
{context}
</context>

Instructions from the user:

<input>
{input}
</input>

Rules:

1. Every manifest must be fully specified intent, valid for server-side apply.
2. Leave out metadata.name and metadata.namespace.
3. Give every manifest the annotation "upbound.io/name". Its value is the
   composite resource's name followed by the manifest's kind. Add a sequence
   number when several manifests share a kind.
4. When composed resources already exist, keep their annotation values and
   reuse their field values unless a change is required.
5. Relate manifests to each other with labels named after the composite
   resource.

Think through the request inside <analysis> tags first. Then write the
manifests as one YAML stream, each manifest preceded by a line containing only
"---", inside <output> tags.
"#;

/// Substitution point of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Observed composite resource, one YAML document.
    Composite,
    /// Observed composed resources, a YAML stream.
    Composed,
    /// Free-text instruction.
    Input,
    /// Selected request context fields, as YAML.
    Context,
}

impl Slot {
    const REQUIRED: [Slot; 3] = [Slot::Composite, Slot::Composed, Slot::Input];

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "composite" => Some(Slot::Composite),
            "composed" => Some(Slot::Composed),
            "input" => Some(Slot::Input),
            "context" => Some(Slot::Context),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Slot::Composite => "composite",
            Slot::Composed => "composed",
            Slot::Input => "input",
            Slot::Context => "context",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Slot(Slot),
}

/// Values bound into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptVariables {
    pub composite: String,
    pub composed: String,
    pub input: String,
    pub context: String,
}

impl PromptVariables {
    fn get(&self, slot: Slot) -> &str {
        match slot {
            Slot::Composite => &self.composite,
            Slot::Composed => &self.composed,
            Slot::Input => &self.input,
            Slot::Context => &self.context,
        }
    }
}

/// Parsed, immutable prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse a template. Unknown or unterminated slots, stray closing braces
    /// and missing required slots are all binding failures.
    pub fn parse(source: &str) -> PipelineResult<Self> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    text.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let rest = &source[pos + 1..];
                    let end = rest.find('}').ok_or_else(|| {
                        PipelineError::TemplateBindingFailure(format!(
                            "unterminated slot at byte {}",
                            pos
                        ))
                    })?;
                    let name = &rest[..end];
                    let slot = Slot::from_name(name.trim()).ok_or_else(|| {
                        PipelineError::TemplateBindingFailure(format!("unknown slot {{{}}}", name))
                    })?;
                    // Skip the slot name and its closing brace.
                    for _ in 0..=name.chars().count() {
                        chars.next();
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Slot(slot));
                }
                '}' => {
                    return Err(PipelineError::TemplateBindingFailure(format!(
                        "unmatched '}}' at byte {}",
                        pos
                    )))
                }
                _ => text.push(c),
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        let template = Self { segments };
        for required in Slot::REQUIRED {
            if !template.slots().any(|slot| slot == required) {
                return Err(PipelineError::TemplateBindingFailure(format!(
                    "template has no {{{}}} slot",
                    required.name()
                )));
            }
        }
        Ok(template)
    }

    /// The built-in template.
    pub fn builtin() -> PipelineResult<Self> {
        Self::parse(BUILTIN_TEMPLATE)
    }

    /// Slots in the order they appear.
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Slot(slot) => Some(*slot),
            Segment::Text(_) => None,
        })
    }

    pub fn render(&self, vars: &PromptVariables) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Slot(slot) => out.push_str(vars.get(*slot)),
            }
        }
        out
    }
}
