use proptest::prelude::*;
use serde_json::{Map, Value, json};

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(|m| {
                let mut map = Map::new();
                for (k, v) in m {
                    map.insert(k, v);
                }
                Value::Object(map)
            }),
        ]
    })
}

fn shuffle_object_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), shuffle_object_keys(v))).collect();
            entries.reverse();
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(shuffle_object_keys).collect()),
        other => other.clone(),
    }
}

proptest! {
    #[test]
    fn hash_is_stable_under_key_reordering(v in arb_value()) {
        let reordered = shuffle_object_keys(&v);
        prop_assert_eq!(reach_hash::hash(&v).unwrap(), reach_hash::hash(&reordered).unwrap());
    }

    #[test]
    fn hash_is_deterministic(v in arb_value()) {
        prop_assert_eq!(reach_hash::hash(&v).unwrap(), reach_hash::hash(&v).unwrap());
    }
}
