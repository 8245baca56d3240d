use docsync_core::types::Document;
use docsync_sync::{fingerprint, FieldSelection};
use proptest::prelude::*;
use serde_json::{json, Value};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 éü]{0,12}".prop_map(Value::String),
    ]
}

fn record() -> impl Strategy<Value = Vec<(String, Value)>> {
    let name = "[a-z]{1,6}".prop_filter("bookkeeping name", |k| k != "utime" && k != "ctime");
    prop::collection::btree_map(name, scalar(), 1..8)
        .prop_map(|fields| fields.into_iter().collect())
}

fn build(fields: impl IntoIterator<Item = (String, Value)>) -> Document {
    fields.into_iter().collect()
}

proptest! {
    #[test]
    fn field_order_does_not_matter(fields in record()) {
        prop_assume!(fields.len() > 1);
        let forward = build(fields.clone());
        let backward = build(fields.into_iter().rev());
        // documents keep insertion order, so the two maps really differ
        prop_assert_ne!(
            forward.keys().collect::<Vec<_>>(),
            backward.keys().collect::<Vec<_>>()
        );
        prop_assert_eq!(&forward, &backward);
        prop_assert_eq!(
            fingerprint(&forward, &FieldSelection::All),
            fingerprint(&backward, &FieldSelection::All)
        );
    }

    #[test]
    fn bookkeeping_fields_do_not_matter(fields in record(), stamp in "[0-9: -]{0,19}") {
        let plain = build(fields.clone());
        let mut stamped = build(fields);
        stamped.insert("utime".into(), json!(stamp.clone()));
        stamped.insert("ctime".into(), json!(stamp));
        stamped.insert("doc_hash".into(), json!("0000"));
        prop_assert_eq!(
            fingerprint(&plain, &FieldSelection::All),
            fingerprint(&stamped, &FieldSelection::All)
        );
    }

    #[test]
    fn business_value_change_is_detected(fields in record(), extra in 0i64..1000) {
        let before = build(fields.clone());
        let mut after = build(fields);
        let key = after.keys().next().cloned().unwrap();
        after.insert(key, json!(format!("changed-{extra}")));
        prop_assert_ne!(
            fingerprint(&before, &FieldSelection::All),
            fingerprint(&after, &FieldSelection::All)
        );
    }

    #[test]
    fn digest_is_forty_lowercase_hex(fields in record()) {
        let digest = fingerprint(&build(fields), &FieldSelection::All);
        prop_assert_eq!(digest.as_str().len(), 40);
        prop_assert!(digest.as_str().chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn unselected_fields_are_ignored(fields in record(), noise in scalar()) {
        let selected: Vec<String> = fields.iter().map(|(k, _)| k.clone()).collect();
        let selection = FieldSelection::Only(selected);
        let plain = build(fields.clone());
        let mut noisy = build(fields);
        noisy.insert("zz_unselected".into(), noise);
        prop_assert_eq!(fingerprint(&plain, &selection), fingerprint(&noisy, &selection));
    }
}
