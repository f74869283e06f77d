use palmirror_secure::store::METADATA_SENTINEL;
use palmirror_secure::{KdfParams, KeyMaterial, RecordStore};
use proptest::prelude::*;
use serde_json::{json, Value};

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        ".{0,24}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            proptest::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn store() -> RecordStore {
    RecordStore::open_in_memory(KdfParams::pbkdf2(1)).expect("open store")
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0),
        .. ProptestConfig::default()
    })]

    #[test]
    fn put_then_get_returns_the_value(
        key in "[A-Za-z0-9_-]{1,32}".prop_filter("reserved", |k| k != METADATA_SENTINEL),
        secret in ".{1,16}",
        value in json_value(),
    ) {
        let store = store();
        store.put(&key, &value, KeyMaterial::Secret(&secret)).expect("put");
        let loaded: Value = store.get(&key, KeyMaterial::Secret(&secret)).expect("get");
        prop_assert_eq!(loaded, value);
    }

    #[test]
    fn a_different_secret_never_decrypts(
        right in "[ -~]{1,16}",
        wrong in "[ -~]{1,16}",
        value in json_value(),
    ) {
        let store = store();
        store.put("record", &value, KeyMaterial::Secret(&right)).expect("put");

        let result = store.get::<Value>("record", KeyMaterial::Secret(&wrong));
        if right == wrong {
            prop_assert!(result.is_ok());
        } else {
            let err = result.expect_err("wrong secret must fail");
            prop_assert!(err.is_wrong_key(), "unexpected error: {err:?}");
        }
    }
}
