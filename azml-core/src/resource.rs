//! Resource - Representing resources and their state

use std::collections::HashMap;

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    /// Resource type (e.g., "machine_learning_workspace")
    pub resource_type: String,
    /// Resource name (binding name in the configuration file)
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    /// Reference to another resource's attribute (binding_name, attribute_name)
    ResourceRef(String, String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// First map of a block value (a list holding at most one map)
    pub fn as_block(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::List(items) => items.first().and_then(Value::as_map),
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Wrap a single map into the list-of-maps block representation
    pub fn block(map: HashMap<String, Value>) -> Value {
        Value::List(vec![Value::Map(map)])
    }

    /// Parse a `${binding.attribute}` reference expression
    pub fn parse_reference(s: &str) -> Option<Value> {
        let inner = s.strip_prefix("${")?.strip_suffix('}')?;
        let (binding, attr) = inner.split_once('.')?;
        if binding.is_empty() || attr.is_empty() {
            return None;
        }
        Some(Value::ResourceRef(binding.to_string(), attr.to_string()))
    }

    /// Convert a JSON value to a Value
    ///
    /// Strings shaped like `${binding.attribute}` become references. Floats are
    /// truncated, nulls dropped.
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::String(s) => {
                Some(Value::parse_reference(s).unwrap_or_else(|| Value::String(s.clone())))
            }
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Value::Int),
            serde_json::Value::Array(arr) => {
                Some(Value::List(arr.iter().filter_map(Value::from_json).collect()))
            }
            serde_json::Value::Object(obj) => Some(Value::Map(
                obj.iter()
                    .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
            serde_json::Value::Null => None,
        }
    }

    /// Convert a Value to JSON; references are written back as `${binding.attribute}`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::json!(i),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::ResourceRef(binding, attr) => {
                serde_json::Value::String(format!("${{{}.{}}}", binding, attr))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// Desired state declared in configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: HashMap<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// Current state fetched from actual infrastructure
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: ResourceId,
    /// ARM resource ID
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    /// Whether this state exists
    pub exists: bool,
}

impl State {
    pub fn not_found(id: ResourceId) -> Self {
        Self {
            id,
            identifier: None,
            attributes: HashMap::new(),
            exists: false,
        }
    }

    pub fn existing(id: ResourceId, attributes: HashMap<String, Value>) -> Self {
        Self {
            id,
            identifier: None,
            attributes,
            exists: true,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Copy attributes the remote API never returns (secrets) from a prior state
    pub fn preserve_from(&mut self, prior: &HashMap<String, Value>, names: &[String]) {
        for name in names {
            if !self.attributes.contains_key(name)
                && let Some(v) = prior.get(name)
            {
                self.attributes.insert(name.clone(), v.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_reference_expression() {
        assert_eq!(
            Value::parse_reference("${ws.id}"),
            Some(Value::ResourceRef("ws".to_string(), "id".to_string()))
        );
        assert_eq!(Value::parse_reference("ws.id"), None);
        assert_eq!(Value::parse_reference("${ws}"), None);
        assert_eq!(Value::parse_reference("${.id}"), None);
    }

    #[test]
    fn json_conversion_keeps_references() {
        let json = json!({
            "workspace_id": "${ws.id}",
            "count": 3,
            "enabled": true,
            "missing": null,
        });
        let value = Value::from_json(&json).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(
            map.get("workspace_id"),
            Some(&Value::ResourceRef("ws".to_string(), "id".to_string()))
        );
        assert_eq!(map.get("count"), Some(&Value::Int(3)));
        assert!(!map.contains_key("missing"));
        assert_eq!(value.to_json()["workspace_id"], json!("${ws.id}"));
    }

    #[test]
    fn block_accessors() {
        let mut inner = HashMap::new();
        inner.insert("type".to_string(), Value::from("SystemAssigned"));
        let block = Value::block(inner);
        assert_eq!(
            block.as_block().and_then(|m| m.get("type")),
            Some(&Value::from("SystemAssigned"))
        );
        assert!(Value::List(vec![]).as_block().is_none());
    }

    #[test]
    fn preserve_secrets_from_prior_state() {
        let id = ResourceId::new("machine_learning_datastore_blobstorage", "ds");
        let mut state = State::existing(id, HashMap::new());
        let mut prior = HashMap::new();
        prior.insert("account_key".to_string(), Value::from("secret"));
        prior.insert("description".to_string(), Value::from("old"));

        state.preserve_from(&prior, &["account_key".to_string()]);
        assert_eq!(state.attributes.get("account_key"), Some(&Value::from("secret")));
        assert!(!state.attributes.contains_key("description"));
    }
}
