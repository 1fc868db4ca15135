//! Payload shape helpers: body merging, public-field extraction and
//! dot-path lookup over JSON values.

use serde_json::{Map, Value};

/// Prefix marking members as private in `public_data`.
pub const DEFAULT_PRIVATE_PREFIX: &str = "__";

/// A subject paired with an object body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub subject: String,
    pub body: Map<String, Value>,
}

impl Message {
    pub fn new(subject: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            subject: subject.into(),
            body,
        }
    }

    /// Copy the members of `other` into the body.
    ///
    /// Existing keys are kept unless `hard` is set.
    pub fn merge(&mut self, other: &Map<String, Value>, hard: bool) {
        for (key, value) in other {
            if !hard && self.body.contains_key(key) {
                continue;
            }
            self.body.insert(key.clone(), value.clone());
        }
    }

    /// The body as a JSON object value.
    pub fn to_payload(&self) -> Value {
        Value::Object(self.body.clone())
    }
}

/// Strip private and non-scalar members from an object.
///
/// Keeps string and number members. Members whose key starts with
/// `ignore_prefix` are dropped. Nested objects and arrays are processed the
/// same way when `recursive` is set (and dropped otherwise): array elements
/// follow the member rules and keep their array shape. `null` members stay
/// `null` when recursing. Booleans are dropped. A non-object input yields an
/// empty object.
pub fn public_data(value: &Value, recursive: bool, ignore_prefix: &str) -> Value {
    let Value::Object(members) = value else {
        return Value::Object(Map::new());
    };

    let mut public = Map::new();
    for (key, member) in members {
        if key.starts_with(ignore_prefix) {
            continue;
        }
        if let Some(kept) = public_member(member, recursive, ignore_prefix) {
            public.insert(key.clone(), kept);
        }
    }
    Value::Object(public)
}

fn public_member(member: &Value, recursive: bool, ignore_prefix: &str) -> Option<Value> {
    match member {
        Value::String(_) | Value::Number(_) => Some(member.clone()),
        Value::Object(_) if recursive => Some(public_data(member, true, ignore_prefix)),
        Value::Array(items) if recursive => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| public_member(item, true, ignore_prefix))
                .collect(),
        )),
        Value::Null if recursive => Some(Value::Null),
        _ => None,
    }
}

/// Look up a dot-separated path such as `"root.child.name"`.
///
/// Array elements are addressed by index. Returns `None` if any segment is
/// missing.
pub fn find_value<'a>(value: &'a Value, query: &str) -> Option<&'a Value> {
    query.split('.').try_fold(value, |current, segment| match current {
        Value::Object(members) => members.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_soft_merge_keeps_existing() {
        let mut message = Message::new("enter", object(json!({"name": "bob", "room": 1})));
        message.merge(&object(json!({"name": "alice", "seat": 4})), false);
        assert_eq!(message.to_payload(), json!({"name": "bob", "room": 1, "seat": 4}));
    }

    #[test]
    fn test_hard_merge_overwrites() {
        let mut message = Message::new("enter", object(json!({"name": "bob"})));
        message.merge(&object(json!({"name": "alice"})), true);
        assert_eq!(message.body["name"], json!("alice"));
    }

    #[test]
    fn test_public_data() {
        let player = json!({
            "name": "bob",
            "score": 12,
            "__token": "secret",
            "online": true,
            "items": [1, true, {"id": 3, "__secret": "x"}],
            "profile": {"bio": "hi", "__email": "b@example.com"},
            "team": null
        });

        assert_eq!(
            public_data(&player, true, DEFAULT_PRIVATE_PREFIX),
            json!({
                "name": "bob",
                "score": 12,
                "items": [1, {"id": 3}],
                "profile": {"bio": "hi"},
                "team": null
            })
        );
        assert_eq!(
            public_data(&player, false, DEFAULT_PRIVATE_PREFIX),
            json!({"name": "bob", "score": 12})
        );
        assert_eq!(
            public_data(&player, true, "s"),
            json!({
                "name": "bob",
                "__token": "secret",
                "items": [1, {"id": 3, "__secret": "x"}],
                "profile": {"bio": "hi", "__email": "b@example.com"},
                "team": null
            })
        );
    }

    #[test]
    fn test_public_data_non_object() {
        assert_eq!(public_data(&json!("text"), true, "__"), json!({}));
    }

    #[test]
    fn test_find_value() {
        let state = json!({"root": {"child": {"name": "bob"}, "list": [10, 20]}});
        assert_eq!(find_value(&state, "root.child.name"), Some(&json!("bob")));
        assert_eq!(find_value(&state, "root.list.1"), Some(&json!(20)));
        assert_eq!(find_value(&state, "root"), state.get("root"));
        assert_eq!(find_value(&state, "root.missing.name"), None);
        assert_eq!(find_value(&state, "root.child.name.deeper"), None);
    }

    proptest! {
        #[test]
        fn prop_public_data_has_no_private_keys(keys in proptest::collection::vec("[_a-z]{1,6}", 0..12)) {
            let input: Map<String, Value> = keys
                .iter()
                .map(|k| (k.clone(), json!(k.len())))
                .collect();
            let output = public_data(&Value::Object(input), true, DEFAULT_PRIVATE_PREFIX);
            let output = output.as_object().cloned().unwrap_or_default();
            prop_assert!(output.keys().all(|k| !k.starts_with(DEFAULT_PRIVATE_PREFIX)));
            for key in keys.iter().filter(|k| !k.starts_with(DEFAULT_PRIVATE_PREFIX)) {
                prop_assert!(output.contains_key(key));
            }
        }
    }
}
