//! Property tests: path parsing, field access, payload construction, and
//! batch isolation with a failing event at any position.

use herald::{
    ChangeBatch, ChangeEvent, CollectionPath, Dispatcher, FieldMap, MemoryStore, Pipeline,
    PipelineConfig, PipelineError, RecordingGateway, TemplateId, UserProfile,
};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn inbox() -> CollectionPath {
    CollectionPath::parse("users/alice/requestsIn").unwrap()
}

proptest! {
    #[test]
    fn prop_complete_request_always_builds(
        first in "[A-Z][a-z]{1,9}",
        last in "[A-Z][a-z]{1,9}",
        subject in "[A-Za-z0-9 ]{1,20}",
        day in "(Monday|Tuesday|Wednesday|Thursday|Friday|Saturday|Sunday)",
        time in "[0-9]{1,2}:[0-9]{2} (AM|PM)",
    ) {
        let name = format!("{} {}", first, last);
        let fields = FieldMap::from_object(json!({
            "fromUser": {"name": name},
            "subject": subject,
            "day": day,
            "time": time,
        })).unwrap();
        let event = ChangeEvent::added(inbox(), "req1", fields);

        let payload = herald::payload::build(&event, TemplateId::NewRequest.template()).unwrap();
        prop_assert_eq!(payload.title, format!("Request from {}", first));
        prop_assert_eq!(
            payload.body,
            format!("New request from {} {} for {} on {}s at {}.", first, last, subject, day, time)
        );
        prop_assert_eq!(payload.data.get("subject"), Some(&subject));

        // Same event, same payload.
        let again = herald::payload::build(&event, TemplateId::NewRequest.template()).unwrap();
        prop_assert_eq!(payload.data, again.data);
    }

    #[test]
    fn prop_missing_field_fails_and_names_it(missing_index in 0usize..4) {
        let required = ["fromUser.name", "subject", "day", "time"];
        let missing = required[missing_index];

        let mut object = json!({
            "fromUser": {"name": "Jane Doe"},
            "subject": "AP Calc BC",
            "day": "Monday",
            "time": "3:30 PM",
        });
        if let Some(rest) = missing.strip_prefix("fromUser.") {
            object["fromUser"].as_object_mut().unwrap().remove(rest);
        } else {
            object.as_object_mut().unwrap().remove(missing);
        }

        let event = ChangeEvent::added(inbox(), "req1", FieldMap::from_object(object).unwrap());
        let err = herald::payload::build(&event, TemplateId::NewRequest.template()).unwrap_err();
        match err {
            PipelineError::IncompleteEvent { field } => prop_assert_eq!(field, missing),
            other => prop_assert!(false, "expected IncompleteEvent, got {:?}", other),
        }
    }

    #[test]
    fn prop_path_parse_accepts_odd_rejects_even(
        segments in prop::collection::vec("[a-z][a-zA-Z0-9]{0,7}", 1..6),
    ) {
        let raw = segments.join("/");
        let parsed = CollectionPath::parse(raw.clone());
        if segments.len() % 2 == 1 {
            let path = parsed.unwrap();
            prop_assert_eq!(path.as_str(), raw.as_str());
            prop_assert_eq!(path.leaf(), segments.last().unwrap().as_str());
        } else {
            prop_assert!(parsed.is_err());
        }
    }

    #[test]
    fn prop_get_path_traverses_one_level(
        outer in "[a-z]{1,6}",
        inner in "[a-z]{1,6}",
        value in "[A-Za-z0-9 ]{0,12}",
    ) {
        let mut nested = serde_json::Map::new();
        nested.insert(inner.clone(), json!(value));
        let mut fields = FieldMap::new();
        fields.insert(outer.clone(), serde_json::Value::Object(nested));

        let dotted = format!("{}.{}", outer, inner);
        prop_assert_eq!(fields.str_at(&dotted), Some(value.as_str()));

        // Blank segments never resolve.
        let trailing_dot = format!("{}.", outer);
        let leading_dot = format!(".{}", outer);
        prop_assert!(fields.get_path(&trailing_dot).is_none());
        prop_assert!(fields.get_path(&leading_dot).is_none());
    }

    #[test]
    fn prop_flatten_keeps_scalar_entries(
        entries in prop::collection::btree_map("[a-z]{1,6}", "[A-Za-z0-9]{0,10}", 1..5),
    ) {
        let mut fields = FieldMap::new();
        for (key, value) in &entries {
            fields.insert(key.clone(), json!(value));
        }

        let flat = fields.flatten_strings();
        prop_assert_eq!(flat.len(), entries.len());
        for (key, value) in &entries {
            prop_assert_eq!(flat.get(key), Some(value));
        }
    }

    #[test]
    fn prop_one_bad_event_never_blocks_siblings(
        (total, bad) in (2usize..6).prop_flat_map(|n| (Just(n), 0..n)),
    ) {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(RecordingGateway::new());
        store.insert_profile(UserProfile::with_token("alice", "tok-alice"));

        let pipeline = Pipeline::connect(
            PipelineConfig::default(),
            store.clone(),
            store.clone(),
            Dispatcher::new(gateway.clone()),
        )
        .unwrap();
        let path = inbox();
        pipeline.watch(&path).unwrap();

        let mut batch = ChangeBatch::new();
        for i in 0..total {
            let fields = if i == bad {
                // Subject withheld; the builder refuses this one.
                json!({
                    "fromUser": {"name": format!("Sender{} Surname", i)},
                    "day": "Monday",
                    "time": "3:30 PM",
                })
            } else {
                json!({
                    "fromUser": {"name": format!("Sender{} Surname", i)},
                    "subject": "AP Calc BC",
                    "day": "Monday",
                    "time": "3:30 PM",
                })
            };
            batch.push(ChangeEvent::added(
                path.clone(),
                format!("req{}", i),
                FieldMap::from_object(fields).unwrap(),
            ));
        }
        store.emit(&path, batch);
        pipeline.stop();

        let titles: Vec<_> = gateway.sent().into_iter().map(|s| s.payload.title).collect();
        let expected: Vec<_> = (0..total)
            .filter(|i| *i != bad)
            .map(|i| format!("Request from Sender{}", i))
            .collect();
        prop_assert_eq!(titles, expected);

        let stats = pipeline.stats();
        prop_assert_eq!(stats.events, total as u64);
        prop_assert_eq!(stats.sent, (total - 1) as u64);
        prop_assert_eq!(stats.skipped_incomplete, 1);
    }
}
