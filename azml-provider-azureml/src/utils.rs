//! Helpers for moving values between flat attributes and ARM JSON

use std::collections::HashMap;

use azml_core::provider::ProviderError;
use azml_core::resource::Value;
use serde_json::json;

pub type Attributes = HashMap<String, Value>;

/// Convert an ARM JSON value to an attribute value; nulls are dropped
pub fn json_to_value(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Value::Int),
        serde_json::Value::Array(arr) => {
            Some(Value::List(arr.iter().filter_map(json_to_value).collect()))
        }
        serde_json::Value::Object(obj) => Some(Value::Map(
            obj.iter()
                .filter_map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
                .collect(),
        )),
        serde_json::Value::Null => None,
    }
}

/// Convert an attribute value to ARM JSON
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => json!(s),
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect(),
        ),
        Value::ResourceRef(binding, attr) => json!(format!("${{{}.{}}}", binding, attr)),
    }
}

pub fn get_str<'a>(attrs: &'a Attributes, key: &str) -> Option<&'a str> {
    attrs.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub fn get_bool(attrs: &Attributes, key: &str) -> Option<bool> {
    attrs.get(key).and_then(Value::as_bool)
}

pub fn get_int(attrs: &Attributes, key: &str) -> Option<i64> {
    attrs.get(key).and_then(Value::as_int)
}

/// First item of a block attribute
pub fn get_block<'a>(attrs: &'a Attributes, key: &str) -> Option<&'a Attributes> {
    attrs.get(key).and_then(Value::as_block)
}

/// Strings of a list or set attribute
pub fn get_strings(attrs: &Attributes, key: &str) -> Vec<String> {
    attrs
        .get(key)
        .and_then(Value::as_list)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// A required string attribute
pub fn require_str<'a>(attrs: &'a Attributes, key: &str) -> Result<&'a str, ProviderError> {
    get_str(attrs, key)
        .ok_or_else(|| ProviderError::validation(format!("'{}' is required", key)))
}

/// `true`/`false` to ARM's `Enabled`/`Disabled`
pub fn enabled_str(enabled: bool) -> &'static str {
    if enabled { "Enabled" } else { "Disabled" }
}

pub fn is_enabled(value: Option<&serde_json::Value>) -> bool {
    value
        .and_then(|v| v.as_str())
        .is_some_and(|s| s.eq_ignore_ascii_case("Enabled"))
}

/// Insert a string read from `json` under `key` when present
pub fn set_str(attrs: &mut Attributes, key: &str, json: Option<&serde_json::Value>) {
    if let Some(s) = json.and_then(|v| v.as_str()) {
        attrs.insert(key.to_string(), Value::String(s.to_string()));
    }
}

pub fn set_bool(attrs: &mut Attributes, key: &str, json: Option<&serde_json::Value>) {
    if let Some(b) = json.and_then(|v| v.as_bool()) {
        attrs.insert(key.to_string(), Value::Bool(b));
    }
}

pub fn set_int(attrs: &mut Attributes, key: &str, json: Option<&serde_json::Value>) {
    if let Some(i) = json.and_then(|v| v.as_i64()) {
        attrs.insert(key.to_string(), Value::Int(i));
    }
}

/// Tags as an ARM `{ key: value }` object
pub fn expand_tags(attrs: &Attributes) -> serde_json::Value {
    match attrs.get("tags").and_then(Value::as_map) {
        Some(tags) => serde_json::Value::Object(
            tags.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), json!(v))))
                .collect(),
        ),
        None => json!({}),
    }
}

/// Tags read back from ARM
pub fn flatten_tags(json: Option<&serde_json::Value>) -> Value {
    let tags = json
        .and_then(|t| t.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), Value::from(v))))
                .collect()
        })
        .unwrap_or_default();
    Value::Map(tags)
}

/// Whether the tags returned by ARM equal the desired ones
pub fn tags_match(desired: &Attributes, body: &serde_json::Value) -> bool {
    let want = expand_tags(desired);
    let got = body.get("tags").cloned().unwrap_or_else(|| json!({}));
    let got = if got.is_null() { json!({}) } else { got };
    want == got
}

/// Drop null members so optional fields are omitted from request bodies
pub fn prune_nulls(value: &mut serde_json::Value) {
    if let serde_json::Value::Object(map) = value {
        map.retain(|_, v| !v.is_null());
        for v in map.values_mut() {
            prune_nulls(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_value_conversion() {
        let json = json!({ "a": [1, "x", true], "b": null });
        let value = json_to_value(&json).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(
            map.get("a"),
            Some(&Value::List(vec![
                Value::Int(1),
                Value::from("x"),
                Value::Bool(true)
            ]))
        );
        assert!(!map.contains_key("b"));
        assert_eq!(value_to_json(&value), json!({ "a": [1, "x", true] }));
    }

    #[test]
    fn tags_round_trip_and_compare() {
        let mut attrs = Attributes::new();
        let mut tags = HashMap::new();
        tags.insert("env".to_string(), Value::from("dev"));
        attrs.insert("tags".to_string(), Value::Map(tags));

        assert_eq!(expand_tags(&attrs), json!({ "env": "dev" }));
        assert!(tags_match(&attrs, &json!({ "tags": { "env": "dev" } })));
        assert!(!tags_match(&attrs, &json!({ "tags": { "env": "prod" } })));
        assert!(tags_match(&Attributes::new(), &json!({ "tags": null })));
        assert_eq!(
            flatten_tags(Some(&json!({ "env": "dev" }))),
            attrs["tags"].clone()
        );
    }

    #[test]
    fn prune_nested_nulls() {
        let mut body = json!({ "a": null, "b": { "c": null, "d": 1 } });
        prune_nulls(&mut body);
        assert_eq!(body, json!({ "b": { "d": 1 } }));
    }

    #[test]
    fn empty_strings_are_unset() {
        let mut attrs = Attributes::new();
        attrs.insert("description".to_string(), Value::from(""));
        assert_eq!(get_str(&attrs, "description"), None);
        assert!(require_str(&attrs, "description").is_err());
    }
}
