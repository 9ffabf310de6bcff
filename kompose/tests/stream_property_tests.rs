use kompose::stream::{self, ResourceSet};
use kompose::{Document, ReplyResolver, Value};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

/// Printable ASCII plus line breaks and tabs, which exercises YAML quoting
/// and block scalars.
const TEXT: &str = "[ -~\n\t]{0,16}";

/// Identifiers never start or end with whitespace.
fn arb_id() -> impl Strategy<Value = String> {
    "[!-~]([ -~]{0,10}[!-~])?"
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        // Quarter steps are exact in binary, so text round-trips are lossless.
        (-4000i64..4000).prop_map(|n| Value::Float(n as f64 / 4.0)),
        TEXT.prop_map(Value::String),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    arb_scalar().prop_recursive(
        3,  // depth
        32, // max size
        4,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..=3).prop_map(Value::Sequence),
                prop::collection::btree_map(TEXT, inner, 0..=3)
                    .prop_map(|fields| Value::Mapping(fields.into_iter().collect())),
            ]
        },
    )
}

fn arb_document() -> impl Strategy<Value = Document> {
    prop::collection::btree_map(TEXT, arb_value(), 0..=4)
        .prop_map(|fields| fields.into_iter().collect())
}

fn arb_resource_set() -> impl Strategy<Value = ResourceSet> {
    prop::collection::btree_map(arb_id(), arb_document(), 1..=4)
}

fn annotated(set: &ResourceSet) -> ResourceSet {
    set.iter()
        .map(|(id, doc)| {
            let mut doc = doc.clone();
            doc.set_identifier(id);
            (id.clone(), doc)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn serialized_sets_resolve_back(set in arb_resource_set()) {
        let text = stream::serialize(&set).unwrap();
        let resolved = ReplyResolver::new().resolve(&text).unwrap();
        prop_assert_eq!(resolved, annotated(&set));
    }

    #[test]
    fn trailing_line_breaks_survive_a_round_trip(
        id in arb_id(),
        body in "[a-z]{1,8}",
        breaks in 1usize..=3,
    ) {
        // "zz" sorts after "metadata", so the block scalar ends the document.
        let script = format!("{}{}", body, "\n".repeat(breaks));
        let mut set = ResourceSet::new();
        set.insert(id, Document::new().with("zz", Value::String(script)));
        let text = stream::serialize(&set).unwrap();
        let resolved = ReplyResolver::new().resolve(&text).unwrap();
        prop_assert_eq!(resolved, annotated(&set));
    }

    #[test]
    fn serialization_ignores_insertion_order(
        entries in prop::collection::vec((arb_id(), arb_document()), 1..=5)
            .prop_shuffle()
    ) {
        let forward: ResourceSet = entries.iter().cloned().collect();
        let backward: ResourceSet = entries.iter().rev().cloned().collect();
        // Duplicate ids keep different winners, so compare only unique inputs.
        prop_assume!(forward == backward);
        prop_assert_eq!(
            stream::serialize(&forward).unwrap(),
            stream::serialize(&backward).unwrap()
        );
    }

    #[test]
    fn serialization_is_repeatable(set in arb_resource_set()) {
        prop_assert_eq!(stream::serialize(&set).unwrap(), stream::serialize(&set).unwrap());
    }
}

#[test]
fn user_data_scripts_keep_their_final_newlines() {
    let mut set = ResourceSet::new();
    set.insert(
        "instance".to_string(),
        Document::new().with(
            "spec",
            Document::new().with(
                "forProvider",
                Document::new().with("userData", "#!/bin/bash\necho ready\n"),
            ),
        ),
    );
    set.insert(
        "job".to_string(),
        Document::new().with("spec", Document::new().with("script", "echo hi\n\n")),
    );
    let text = stream::serialize(&set).unwrap();
    let expected = annotated(&set);

    assert_eq!(ReplyResolver::new().resolve(&text).unwrap(), expected);
    let fenced = format!("```yaml\n{}```", text);
    assert_eq!(ReplyResolver::new().resolve(&fenced).unwrap(), expected);
    let padded = format!("\n\n{}  ", text);
    assert_eq!(ReplyResolver::new().resolve(&padded).unwrap(), expected);
}

#[test]
fn field_order_does_not_change_output() {
    let a = Document::new().with("kind", "Bucket").with("apiVersion", "v1");
    let b = Document::new().with("apiVersion", "v1").with("kind", "Bucket");
    let mut left = ResourceSet::new();
    left.insert("x".to_string(), a);
    let mut right = ResourceSet::new();
    right.insert("x".to_string(), b);
    assert_eq!(
        stream::serialize(&left).unwrap(),
        stream::serialize(&right).unwrap()
    );
}
