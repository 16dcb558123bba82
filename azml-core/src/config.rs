//! Config - Load the JSON configuration file
//!
//! A configuration holds a provider block, an optional state backend block
//! and the list of desired resources. Resources may refer to attributes of
//! other resources with `${binding.attribute}` strings; they are returned in
//! dependency order.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::resource::{Resource, ResourceId, Value};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "main.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Resource at index {0} has an empty name")]
    EmptyName(usize),

    #[error("Binding '{0}' is declared more than once")]
    DuplicateBinding(String),

    #[error("{resource} refers to unknown binding '{binding}'")]
    UnknownReference { resource: String, binding: String },

    #[error("Reference cycle between: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// State backend declared in configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BackendBlock {
    pub backend_type: String,
    pub attributes: HashMap<String, Value>,
}

/// Parsed configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw provider block; the provider crate deserializes its own settings
    pub provider: serde_json::Value,
    pub backend: Option<BackendBlock>,
    /// Resources in dependency order
    pub resources: Vec<Resource>,
}

impl Config {
    pub fn resource(&self, binding: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id.name == binding)
    }
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    provider: serde_json::Value,
    backend: Option<RawBackend>,
    #[serde(default)]
    resources: Vec<RawResource>,
}

#[derive(Deserialize)]
struct RawBackend {
    #[serde(rename = "type")]
    backend_type: String,
    #[serde(flatten)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct RawResource {
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

fn convert_attributes(
    attributes: &serde_json::Map<String, serde_json::Value>,
) -> HashMap<String, Value> {
    attributes
        .iter()
        .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
        .collect()
}

/// Load a configuration file from disk
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&content)
}

/// Parse configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = serde_json::from_str(content)?;

    let backend = raw.backend.map(|b| BackendBlock {
        backend_type: b.backend_type,
        attributes: convert_attributes(&b.attributes),
    });

    let mut seen = HashSet::new();
    let mut resources = Vec::with_capacity(raw.resources.len());
    for (index, r) in raw.resources.iter().enumerate() {
        if r.name.trim().is_empty() {
            return Err(ConfigError::EmptyName(index));
        }
        if !seen.insert(r.name.clone()) {
            return Err(ConfigError::DuplicateBinding(r.name.clone()));
        }
        resources.push(Resource {
            id: ResourceId::new(&r.resource_type, &r.name),
            attributes: convert_attributes(&r.attributes),
        });
    }

    let resources = sort_by_dependencies(resources)?;
    debug!("Loaded {} resources from configuration", resources.len());

    Ok(Config {
        provider: raw.provider,
        backend,
        resources,
    })
}

/// Collect every `(binding, attribute)` reference inside a value
pub fn collect_references(value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::ResourceRef(binding, attr) => out.push((binding.clone(), attr.clone())),
        Value::List(items) => items.iter().for_each(|v| collect_references(v, out)),
        Value::Map(map) => map.values().for_each(|v| collect_references(v, out)),
        _ => {}
    }
}

/// Bindings a resource depends on
pub fn dependencies(resource: &Resource) -> BTreeSet<String> {
    let mut refs = Vec::new();
    for value in resource.attributes.values() {
        collect_references(value, &mut refs);
    }
    refs.into_iter().map(|(binding, _)| binding).collect()
}

/// Order resources so that every resource comes after the ones it references
///
/// Declaration order is kept among independent resources.
pub fn sort_by_dependencies(resources: Vec<Resource>) -> Result<Vec<Resource>, ConfigError> {
    let names: HashSet<&str> = resources.iter().map(|r| r.id.name.as_str()).collect();
    let mut deps: Vec<BTreeSet<String>> = Vec::with_capacity(resources.len());
    for resource in &resources {
        let d = dependencies(resource);
        if let Some(unknown) = d.iter().find(|b| !names.contains(b.as_str())) {
            return Err(ConfigError::UnknownReference {
                resource: resource.id.to_string(),
                binding: unknown.clone(),
            });
        }
        deps.push(d);
    }

    let mut placed: HashSet<String> = HashSet::new();
    let mut order = Vec::with_capacity(resources.len());
    let mut remaining: Vec<usize> = (0..resources.len()).collect();

    while !remaining.is_empty() {
        let ready = remaining
            .iter()
            .position(|&i| deps[i].iter().all(|d| placed.contains(d)));
        match ready {
            Some(pos) => {
                let i = remaining.remove(pos);
                placed.insert(resources[i].id.name.clone());
                order.push(i);
            }
            None => {
                return Err(ConfigError::Cycle(
                    remaining
                        .iter()
                        .map(|&i| resources[i].id.name.clone())
                        .collect(),
                ));
            }
        }
    }

    let mut slots: Vec<Option<Resource>> = resources.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Replace references with values returned by `lookup`
///
/// References that `lookup` cannot answer are left in place, so a plan can
/// still be computed before the referenced resource exists.
pub fn resolve_references<F>(value: &Value, lookup: &F) -> Value
where
    F: Fn(&str, &str) -> Option<Value>,
{
    match value {
        Value::ResourceRef(binding, attr) => {
            lookup(binding, attr).unwrap_or_else(|| value.clone())
        }
        Value::List(items) => Value::List(items.iter().map(|v| resolve_references(v, lookup)).collect()),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_references(v, lookup)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve every attribute of a resource
pub fn resolve_resource<F>(resource: &Resource, lookup: &F) -> Resource
where
    F: Fn(&str, &str) -> Option<Value>,
{
    Resource {
        id: resource.id.clone(),
        attributes: resource
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), resolve_references(v, lookup)))
            .collect(),
    }
}

/// Whether any reference is still unresolved
pub fn has_references(resource: &Resource) -> bool {
    !dependencies(resource).is_empty()
}
