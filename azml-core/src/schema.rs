//! Schema - Define type schemas for resources
//!
//! Providers define schemas for each resource type,
//! enabling type validation before any API call is made.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: Validator,
    },
    /// List
    List(Box<AttributeType>),
    /// Unordered collection; compared without regard to order
    Set(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
    /// Nested block: a list of maps with its own attribute schemas
    Block(BlockSchema),
}

/// Validation callback attached to a custom type
#[derive(Clone)]
pub struct Validator(Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>);

impl Validator {
    pub fn new(f: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn check(&self, value: &Value) -> Result<(), String> {
        (self.0)(value)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validator")
    }
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            // References resolve to strings at apply time
            (
                AttributeType::String | AttributeType::Custom { .. } | AttributeType::Enum(_),
                Value::ResourceRef(_, _),
            ) => Ok(()),
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { validate, base, .. }, v) => {
                base.validate(v)?;
                validate
                    .check(v)
                    .map_err(|msg| TypeError::ValidationFailed { message: msg })
            }

            (AttributeType::List(inner) | AttributeType::Set(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Block(block), Value::List(items)) => block.validate_items(items),
            (AttributeType::Block(block), Value::Map(map)) => {
                block.validate_items(&[Value::Map(map.clone())])
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Set(inner) => format!("Set<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Block(_) => "Block".to_string(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("Attribute '{name}' is computed and cannot be set")]
    ComputedAttribute { name: String },

    #[error("'{name}' conflicts with '{other}'")]
    Conflict { name: String, other: String },

    #[error("'{name}' requires {} to be set", missing.join(", "))]
    RequiredWith { name: String, missing: Vec<String> },

    #[error("Exactly one of {} must be set", names.join(", "))]
    ExactlyOneOf { names: Vec<String> },

    #[error("At least one of {} must be set", names.join(", "))]
    AtLeastOneOf { names: Vec<String> },

    #[error("Block expects between {min} and {} items, got {got}", max.map(|m| m.to_string()).unwrap_or_else(|| "unbounded".to_string()))]
    BlockItems {
        min: usize,
        max: Option<usize>,
        got: usize,
    },

    #[error("Attribute '{name}': {inner}")]
    Attribute { name: String, inner: Box<TypeError> },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },
}

impl Value {
    fn type_name(&self) -> String {
        match self {
            Value::String(_) => "String".to_string(),
            Value::Int(_) => "Int".to_string(),
            Value::Bool(_) => "Bool".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Map(_) => "Map".to_string(),
            Value::ResourceRef(binding, attr) => format!("ResourceRef({}.{})", binding, attr),
        }
    }
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// May be set by the user (false for computed-only attributes)
    pub optional: bool,
    /// Filled in by the remote API
    pub computed: bool,
    /// A change to this attribute needs the resource to be recreated
    pub force_new: bool,
    /// Secret value; masked in output and never returned by the remote API
    pub sensitive: bool,
    /// Not returned by the remote API; the last known value is kept
    pub write_only: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            optional: true,
            computed: false,
            force_new: false,
            sensitive: false,
            write_only: false,
            default: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self.optional = false;
        self
    }

    /// Read-only attribute filled in by the API
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self.optional = false;
        self.required = false;
        self
    }

    /// Optional attribute that the API fills in when unset
    pub fn optional_computed(mut self) -> Self {
        self.computed = true;
        self.optional = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self.write_only = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// True when the attribute can only be read
    pub fn is_read_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }
}

/// Schema of a nested block (list of maps)
#[derive(Debug, Clone, Default)]
pub struct BlockSchema {
    pub attributes: BTreeMap<String, AttributeSchema>,
    pub min_items: usize,
    pub max_items: Option<usize>,
}

impl BlockSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// A block holding at most one item
    pub fn single() -> Self {
        Self {
            max_items: Some(1),
            ..Self::default()
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = min;
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    fn validate_items(&self, items: &[Value]) -> Result<(), TypeError> {
        if items.len() < self.min_items || self.max_items.is_some_and(|max| items.len() > max) {
            return Err(TypeError::BlockItems {
                min: self.min_items,
                max: self.max_items,
                got: items.len(),
            });
        }
        for (index, item) in items.iter().enumerate() {
            let map = item.as_map().ok_or_else(|| TypeError::ListItemError {
                index,
                inner: Box::new(TypeError::TypeMismatch {
                    expected: "Map".to_string(),
                    got: item.type_name(),
                }),
            })?;
            if let Some(first) = validate_attributes(&self.attributes, map).into_iter().next() {
                return Err(TypeError::ListItemError {
                    index,
                    inner: Box::new(first),
                });
            }
        }
        Ok(())
    }
}

/// Cross-field constraint; names may be dotted paths into single blocks (e.g. "ssh.key_value")
#[derive(Debug, Clone)]
pub enum Constraint {
    ConflictsWith(String, String),
    /// When the first attribute is set, all others must be set too
    RequiredWith(String, Vec<String>),
    ExactlyOneOf(Vec<String>),
    AtLeastOneOf(Vec<String>),
}

impl Constraint {
    fn check(&self, attributes: &HashMap<String, Value>) -> Result<(), TypeError> {
        let is_set = |name: &str| lookup_path(attributes, name).is_some();
        match self {
            Constraint::ConflictsWith(a, b) => {
                if is_set(a) && is_set(b) {
                    return Err(TypeError::Conflict {
                        name: a.clone(),
                        other: b.clone(),
                    });
                }
            }
            Constraint::RequiredWith(name, others) => {
                if is_set(name) {
                    let missing: Vec<String> =
                        others.iter().filter(|o| !is_set(o)).cloned().collect();
                    if !missing.is_empty() {
                        return Err(TypeError::RequiredWith {
                            name: name.clone(),
                            missing,
                        });
                    }
                }
            }
            Constraint::ExactlyOneOf(names) => {
                if names.iter().filter(|n| is_set(n)).count() != 1 {
                    return Err(TypeError::ExactlyOneOf {
                        names: names.clone(),
                    });
                }
            }
            Constraint::AtLeastOneOf(names) => {
                if !names.iter().any(|n| is_set(n)) {
                    return Err(TypeError::AtLeastOneOf {
                        names: names.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Look up a possibly dotted attribute path; empty strings and empty lists count as unset
pub fn lookup_path<'a>(attributes: &'a HashMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = attributes.get(parts.next()?)?;
    for part in parts {
        current = current.as_block()?.get(part)?;
    }
    match current {
        Value::String(s) if s.is_empty() => None,
        Value::List(items) if items.is_empty() => None,
        v => Some(v),
    }
}

fn validate_attributes(
    schemas: &BTreeMap<String, AttributeSchema>,
    attributes: &HashMap<String, Value>,
) -> Vec<TypeError> {
    let mut errors = Vec::new();

    for (name, schema) in schemas {
        if schema.required && !attributes.contains_key(name) && schema.default.is_none() {
            errors.push(TypeError::MissingRequired { name: name.clone() });
        }
    }

    let mut names: Vec<&String> = attributes.keys().collect();
    names.sort();
    for name in names {
        let value = &attributes[name];
        match schemas.get(name) {
            Some(schema) if schema.is_read_only() => {
                errors.push(TypeError::ComputedAttribute { name: name.clone() });
            }
            Some(schema) => {
                if let Err(e) = schema.attr_type.validate(value) {
                    errors.push(TypeError::Attribute {
                        name: name.clone(),
                        inner: Box::new(e),
                    });
                }
            }
            None => errors.push(TypeError::UnknownAttribute { name: name.clone() }),
        }
    }

    errors
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: BTreeMap<String, AttributeSchema>,
    pub constraints: Vec<Constraint>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: BTreeMap::new(),
            constraints: Vec::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Validate resource attributes
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = validate_attributes(&self.attributes, attributes);

        for constraint in &self.constraints {
            if let Err(e) = constraint.check(attributes) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Fill in defaults for unset attributes
    pub fn apply_defaults(&self, attributes: &mut HashMap<String, Value>) {
        for (name, schema) in &self.attributes {
            if let Some(default) = &schema.default
                && !attributes.contains_key(name)
            {
                attributes.insert(name.clone(), default.clone());
            }
        }
    }

    /// Names of attributes whose change forces replacement
    pub fn force_new_attributes(&self) -> Vec<&str> {
        self.attributes
            .values()
            .filter(|a| a.force_new)
            .map(|a| a.name.as_str())
            .collect()
    }

    /// Names of secret attributes
    pub fn sensitive_attributes(&self) -> Vec<String> {
        self.attributes
            .values()
            .filter(|a| a.sensitive)
            .map(|a| a.name.clone())
            .collect()
    }

    /// Names of attributes a read cannot return and which are kept from state
    pub fn write_only_attributes(&self) -> Vec<String> {
        self.attributes
            .values()
            .filter(|a| a.write_only)
            .map(|a| a.name.clone())
            .collect()
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;
    use std::sync::LazyLock;

    use regex::Regex;

    static ARM_ID: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^/subscriptions/[^/]+(/resourceGroups/[^/]+)?(/providers/[^/]+(/[^/]+/[^/]+)+)?$")
            .expect("valid regex")
    });

    static ISO8601_DURATION: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^P(\d+Y)?(\d+M)?(\d+W)?(\d+D)?(T(\d+H)?(\d+M)?(\d+(\.\d+)?S)?)?$")
            .expect("valid regex")
    });

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: Validator::new(|value| match value {
                Value::Int(n) if *n > 0 => Ok(()),
                Value::Int(_) => Err("Value must be positive".to_string()),
                _ => Err("Expected integer".to_string()),
            }),
        }
    }

    /// Integer greater than or equal to zero
    pub fn non_negative_int() -> AttributeType {
        AttributeType::Custom {
            name: "NonNegativeInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: Validator::new(|value| match value {
                Value::Int(n) if *n >= 0 => Ok(()),
                Value::Int(_) => Err("Value must not be negative".to_string()),
                _ => Err("Expected integer".to_string()),
            }),
        }
    }

    /// Non-empty string
    pub fn non_empty_string() -> AttributeType {
        AttributeType::Custom {
            name: "NonEmptyString".to_string(),
            base: Box::new(AttributeType::String),
            validate: Validator::new(|value| match value {
                Value::String(s) if s.trim().is_empty() => {
                    Err("Value must not be empty".to_string())
                }
                _ => Ok(()),
            }),
        }
    }

    /// UUID string
    pub fn uuid() -> AttributeType {
        AttributeType::Custom {
            name: "Uuid".to_string(),
            base: Box::new(AttributeType::String),
            validate: Validator::new(|value| match value {
                Value::String(s) => ::uuid::Uuid::parse_str(s)
                    .map(|_| ())
                    .map_err(|_| format!("'{}' is not a valid UUID", s)),
                _ => Ok(()),
            }),
        }
    }

    /// Azure Resource Manager resource ID
    pub fn azure_resource_id() -> AttributeType {
        AttributeType::Custom {
            name: "AzureResourceId".to_string(),
            base: Box::new(AttributeType::String),
            validate: Validator::new(|value| match value {
                Value::String(s) if ARM_ID.is_match(s) => Ok(()),
                Value::String(s) => Err(format!("'{}' is not a valid Azure resource ID", s)),
                _ => Ok(()),
            }),
        }
    }

    /// ISO 8601 duration (e.g., "PT30M")
    pub fn iso8601_duration() -> AttributeType {
        AttributeType::Custom {
            name: "Iso8601Duration".to_string(),
            base: Box::new(AttributeType::String),
            validate: Validator::new(|value| match value {
                Value::String(s) if s != "P" && s != "PT" && ISO8601_DURATION.is_match(s) => Ok(()),
                Value::String(s) => Err(format!("'{}' is not a valid ISO 8601 duration", s)),
                _ => Ok(()),
            }),
        }
    }

    /// Azure location (e.g., "westeurope" or "West Europe")
    pub fn location() -> AttributeType {
        AttributeType::Custom {
            name: "Location".to_string(),
            base: Box::new(AttributeType::String),
            validate: Validator::new(|value| match value {
                Value::String(s) if s.trim().is_empty() => {
                    Err("location must not be empty".to_string())
                }
                _ => Ok(()),
            }),
        }
    }

    /// Integer within an inclusive range
    pub fn int_between(min: i64, max: i64) -> AttributeType {
        AttributeType::Custom {
            name: format!("Int({}..={})", min, max),
            base: Box::new(AttributeType::Int),
            validate: Validator::new(move |value| match value {
                Value::Int(n) if (min..=max).contains(n) => Ok(()),
                Value::Int(n) => Err(format!(
                    "expected a value between {} and {}, got {}",
                    min, max, n
                )),
                _ => Ok(()),
            }),
        }
    }

    /// String matching a regular expression, with a message describing the rule
    pub fn name_matching(name: &str, pattern: &str, rule: &str) -> AttributeType {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => panic!("invalid pattern for {}: {}", name, e),
        };
        let rule = rule.to_string();
        AttributeType::Custom {
            name: name.to_string(),
            base: Box::new(AttributeType::String),
            validate: Validator::new(move |value| match value {
                Value::String(s) if re.is_match(s) => Ok(()),
                Value::String(s) => Err(format!("'{}' is invalid: {}", s, rule)),
                _ => Ok(()),
            }),
        }
    }

    /// Tags map
    pub fn tags() -> AttributeType {
        AttributeType::Map(Box::new(AttributeType::String))
    }
}

/// Normalize an Azure location ("West Europe" -> "westeurope")
pub fn normalize_location(location: &str) -> String {
    location.replace(' ', "").to_lowercase()
}
