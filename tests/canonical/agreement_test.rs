//! Independent canonicalizer instances agree on every logical value.

use proptest::prelude::*;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{json, Value};

use actuation_kernel::canonical::{verify_canonical_agreement, Canonicalizer};

const UNICODE_EDGES: &[&str] = &[
    "e\u{301}",
    "\u{e9}",
    "A\u{30a}",
    "\u{212b}",
    "\u{1f600}",
    "\u{0}",
    "\"quoted\"",
    "back\\slash",
    "\u{2028}line",
    "tab\tnewline\n",
    "",
    "\u{ff21}",
];

/// Map serialized in exactly the order given.
struct OrderedMap(Vec<(String, Value)>);

impl Serialize for OrderedMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        (-1.0e9f64..1.0e9).prop_map(|f| json!(f)),
        "[a-z0-9 ]{0,12}".prop_map(Value::String),
        prop::sample::select(UNICODE_EDGES).prop_map(|s| Value::String(s.to_owned())),
    ]
}

fn value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn independent_instances_agree(v in value()) {
        let a = Canonicalizer::default().canonicalize(&v).expect("first instance");
        let b = Canonicalizer::default().canonicalize(&v).expect("second instance");
        prop_assert!(verify_canonical_agreement(&a, &b));
        prop_assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn key_insertion_order_is_irrelevant(
        entries in prop::collection::btree_map("[a-z]{1,6}", value(), 1..8)
    ) {
        let forward: Vec<(String, Value)> = entries.into_iter().collect();
        let mut backward = forward.clone();
        backward.reverse();
        let a = Canonicalizer::default().canonicalize(&OrderedMap(forward)).expect("forward");
        let b = Canonicalizer::default().canonicalize(&OrderedMap(backward)).expect("backward");
        prop_assert!(verify_canonical_agreement(&a, &b));
    }
}

#[test]
fn composed_and_decomposed_keys_agree() {
    let composed = json!({"caf\u{e9}": "\u{e9}"});
    let decomposed = json!({"cafe\u{301}": "e\u{301}"});
    let a = Canonicalizer::default().canonicalize(&composed).expect("composed");
    let b = Canonicalizer::default().canonicalize(&decomposed).expect("decomposed");
    assert!(verify_canonical_agreement(&a, &b));
}

#[test]
fn different_values_disagree() {
    let a = Canonicalizer::default().canonicalize(&json!({"a": 1})).expect("a");
    let b = Canonicalizer::default().canonicalize(&json!({"a": 2})).expect("b");
    assert!(!verify_canonical_agreement(&a, &b));
}
