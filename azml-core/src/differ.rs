//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the desired state declared in configuration with the current state
//! fetched from the Provider, and generates the list of required Effects (Plan).

use std::collections::{HashMap, HashSet};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::{AttributeType, ResourceSchema, normalize_location};

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// A force-new attribute changed -> needs delete and create
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
    /// Resource exists but not in desired state -> needs deletion
    Delete(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, schema: Option<&ResourceSchema>) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let mut desired = desired.clone();
    if let Some(schema) = schema {
        schema.apply_defaults(&mut desired.attributes);
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes, schema);

    if changed.is_empty() {
        return Diff::NoChange(desired.id.clone());
    }

    let force_new = schema.is_some_and(|s| {
        changed
            .iter()
            .any(|name| s.attributes.get(name).is_some_and(|a| a.force_new))
    });

    if force_new {
        Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
///
/// Computed attributes never show up as changes unless they are configured.
/// With a schema, an optional attribute that is set remotely but no longer
/// configured is a change too: it has to be cleared.
pub fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    schema: Option<&ResourceSchema>,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        let attr_type = schema
            .and_then(|s| s.attributes.get(key))
            .map(|a| &a.attr_type);

        let same = match current.get(key) {
            Some(current_value) => values_match(desired_value, current_value, attr_type),
            None => is_empty(desired_value),
        };

        if !same {
            changed.push(key.clone());
        }
    }

    if let Some(schema) = schema {
        for (key, current_value) in current {
            if desired.contains_key(key) || is_empty(current_value) {
                continue;
            }
            if schema
                .attributes
                .get(key)
                .is_some_and(|a| a.optional && !a.computed)
            {
                changed.push(key.clone());
            }
        }
    }

    changed.sort();
    changed
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::List(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        _ => false,
    }
}

/// Whether a type is, or is derived from, the named custom type
fn is_custom(attr_type: Option<&AttributeType>, wanted: &str) -> bool {
    match attr_type {
        Some(AttributeType::Custom { name, base, .. }) => {
            name == wanted || is_custom(Some(base.as_ref()), wanted)
        }
        _ => false,
    }
}

/// Compare a desired value against an observed one
///
/// Maps only compare the keys the desired side sets. Sets ignore order.
/// Locations and ARM IDs are compared the way Azure treats them.
pub fn values_match(desired: &Value, current: &Value, attr_type: Option<&AttributeType>) -> bool {
    match (desired, current) {
        // Unresolved references are only known after apply
        (Value::ResourceRef(_, _), _) => false,

        (Value::String(d), Value::String(c)) => {
            if is_custom(attr_type, "Location") {
                normalize_location(d) == normalize_location(c)
            } else if is_custom(attr_type, "AzureResourceId") {
                d.eq_ignore_ascii_case(c)
            } else {
                d == c
            }
        }

        (Value::Map(d), Value::Map(c)) => {
            let inner_type = |key: &str| match attr_type {
                Some(AttributeType::Block(block)) => block.attributes.get(key).map(|a| &a.attr_type),
                Some(AttributeType::Map(inner)) => Some(inner.as_ref()),
                _ => None,
            };
            let maps_are_tags = matches!(attr_type, Some(AttributeType::Map(_)));
            if maps_are_tags && d.len() != c.len() {
                return false;
            }
            d.iter().all(|(k, dv)| match c.get(k) {
                Some(cv) => values_match(dv, cv, inner_type(k)),
                None => is_empty(dv),
            })
        }

        (Value::List(d), Value::List(c)) => {
            if d.len() != c.len() {
                return false;
            }
            match attr_type {
                Some(AttributeType::Set(inner)) => {
                    let mut unmatched: Vec<&Value> = c.iter().collect();
                    d.iter().all(|dv| {
                        match unmatched
                            .iter()
                            .position(|cv| values_match(dv, cv, Some(inner.as_ref())))
                        {
                            Some(pos) => {
                                unmatched.remove(pos);
                                true
                            }
                            None => false,
                        }
                    })
                }
                Some(AttributeType::List(inner)) => d
                    .iter()
                    .zip(c)
                    .all(|(dv, cv)| values_match(dv, cv, Some(inner.as_ref()))),
                other => d.iter().zip(c).all(|(dv, cv)| values_match(dv, cv, other)),
            }
        }

        // A single map written without list brackets matches a one-item block
        (Value::Map(_), Value::List(c)) if c.len() == 1 => values_match(desired, &c[0], attr_type),

        (d, c) => d == c,
    }
}

/// Compute Diff for multiple resources and generate a Plan
///
/// Resources present in `current_states` but absent from `desired` are deleted,
/// after every create and update, in reverse order.
pub fn create_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
    schemas: &HashMap<String, ResourceSchema>,
) -> Plan {
    let mut plan = Plan::new();
    let mut wanted = HashSet::new();

    for resource in desired {
        wanted.insert(resource.id.clone());

        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        let d = diff(resource, &current, schemas.get(&resource.id.resource_type));

        match d {
            Diff::Create(r) => plan.add(Effect::Create(r)),
            Diff::Update {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Update {
                id,
                from,
                to,
                changed_attributes,
            }),
            Diff::Replace {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Replace {
                id,
                from,
                to,
                changed_attributes,
            }),
            Diff::NoChange(_) => {}
            Diff::Delete(id) => {
                if let Some(identifier) = current.identifier.clone() {
                    plan.add(Effect::Delete { id, identifier });
                }
            }
        }
    }

    let mut orphans: Vec<&State> = current_states
        .values()
        .filter(|s| s.exists && !wanted.contains(&s.id))
        .collect();
    orphans.sort_by(|a, b| b.id.cmp(&a.id));
    for state in orphans {
        if let Some(identifier) = &state.identifier {
            plan.add(Effect::Delete {
                id: state.id.clone(),
                identifier: identifier.clone(),
            });
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeSchema, BlockSchema, types};

    fn compute_schema() -> ResourceSchema {
        ResourceSchema::new("machine_learning_compute_cluster")
            .attribute(
                AttributeSchema::new("vm_size", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("location", types::location()).force_new())
            .attribute(AttributeSchema::new(
                "scale_settings",
                AttributeType::Block(
                    BlockSchema::single()
                        .attribute(AttributeSchema::new("max_node_count", AttributeType::Int))
                        .attribute(AttributeSchema::new("min_node_count", AttributeType::Int)),
                ),
            ))
            .attribute(AttributeSchema::new(
                "identity_ids",
                AttributeType::Set(Box::new(AttributeType::String)),
            ))
    }

    fn block(pairs: &[(&str, Value)]) -> Value {
        Value::block(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn diff_create_when_not_exists() {
        let desired = Resource::new("machine_learning_workspace", "ws");
        let current = State::not_found(ResourceId::new("machine_learning_workspace", "ws"));

        let result = diff(&desired, &current, None);
        assert!(matches!(result, Diff::Create(_)));
    }

    #[test]
    fn diff_no_change_ignores_computed_attributes() {
        let desired = Resource::new("machine_learning_workspace", "ws")
            .with_attribute("description", "hello");

        let mut attrs = HashMap::new();
        attrs.insert("description".to_string(), Value::from("hello"));
        attrs.insert("discovery_url".to_string(), Value::from("https://x"));
        let current = State::existing(ResourceId::new("machine_learning_workspace", "ws"), attrs);

        let result = diff(&desired, &current, None);
        assert!(matches!(result, Diff::NoChange(_)));
    }

    #[test]
    fn diff_update_when_different() {
        let desired = Resource::new("machine_learning_workspace", "ws")
            .with_attribute("description", "new");

        let mut attrs = HashMap::new();
        attrs.insert("description".to_string(), Value::from("old"));
        let current = State::existing(ResourceId::new("machine_learning_workspace", "ws"), attrs);

        match diff(&desired, &current, None) {
            Diff::Update {
                changed_attributes, ..
            } => {
                assert_eq!(changed_attributes, vec!["description".to_string()]);
            }
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn diff_replace_on_force_new_attribute() {
        let schema = compute_schema();
        let desired = Resource::new("machine_learning_compute_cluster", "cc")
            .with_attribute("vm_size", "STANDARD_DS3_V2");
        let mut attrs = HashMap::new();
        attrs.insert("vm_size".to_string(), Value::from("STANDARD_DS2_V2"));
        let current =
            State::existing(ResourceId::new("machine_learning_compute_cluster", "cc"), attrs);

        assert!(matches!(
            diff(&desired, &current, Some(&schema)),
            Diff::Replace { .. }
        ));
    }

    fn workspace_schema() -> ResourceSchema {
        ResourceSchema::new("machine_learning_workspace")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(AttributeSchema::new("tags", types::tags()))
            .attribute(
                AttributeSchema::new("public_network_access_enabled", AttributeType::Bool)
                    .with_default(true),
            )
            .attribute(
                AttributeSchema::new("high_business_impact", AttributeType::Bool)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("kind", AttributeType::String).force_new())
            .attribute(AttributeSchema::new("discovery_url", AttributeType::String).computed())
    }

    fn workspace_state(pairs: &[(&str, Value)]) -> State {
        let attrs = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        State::existing(ResourceId::new("machine_learning_workspace", "ws"), attrs)
    }

    #[test]
    fn removed_optional_attributes_are_changes() {
        let schema = workspace_schema();
        let tags: HashMap<String, Value> =
            [("env".to_string(), Value::from("prod"))].into_iter().collect();
        let current = workspace_state(&[
            ("name", Value::from("ws")),
            ("description", Value::from("old")),
            ("tags", Value::Map(tags)),
            ("public_network_access_enabled", Value::Bool(false)),
            ("high_business_impact", Value::Bool(false)),
            ("discovery_url", Value::from("https://x")),
        ]);
        let desired = Resource::new("machine_learning_workspace", "ws").with_attribute("name", "ws");

        match diff(&desired, &current, Some(&schema)) {
            Diff::Update {
                changed_attributes,
                to,
                ..
            } => {
                assert_eq!(
                    changed_attributes,
                    vec!["description", "public_network_access_enabled", "tags"]
                );
                assert_eq!(to.attributes["public_network_access_enabled"], Value::Bool(true));
            }
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn removed_force_new_attribute_replaces() {
        let schema = workspace_schema();
        let current = workspace_state(&[
            ("name", Value::from("ws")),
            ("kind", Value::from("FeatureStore")),
            ("public_network_access_enabled", Value::Bool(true)),
        ]);
        let desired = Resource::new("machine_learning_workspace", "ws").with_attribute("name", "ws");

        assert!(matches!(
            diff(&desired, &current, Some(&schema)),
            Diff::Replace { changed_attributes, .. } if changed_attributes == vec!["kind"]
        ));
    }

    #[test]
    fn empty_remote_values_need_no_clearing() {
        let schema = workspace_schema();
        let current = workspace_state(&[
            ("name", Value::from("ws")),
            ("description", Value::from("")),
            ("tags", Value::Map(HashMap::new())),
            ("public_network_access_enabled", Value::Bool(true)),
        ]);
        let desired = Resource::new("machine_learning_workspace", "ws").with_attribute("name", "ws");

        assert!(matches!(
            diff(&desired, &current, Some(&schema)),
            Diff::NoChange(_)
        ));
    }

    #[test]
    fn nested_block_compares_only_configured_keys() {
        let schema = compute_schema();
        let desired_block = block(&[("max_node_count", Value::Int(2))]);
        let current_block = block(&[
            ("max_node_count", Value::Int(2)),
            ("min_node_count", Value::Int(0)),
        ]);
        let attr_type = &schema.attributes["scale_settings"].attr_type;
        assert!(values_match(&desired_block, &current_block, Some(attr_type)));

        let changed = block(&[("max_node_count", Value::Int(3))]);
        assert!(!values_match(&changed, &current_block, Some(attr_type)));
    }

    #[test]
    fn sets_ignore_order_and_locations_ignore_spacing() {
        let schema = compute_schema();
        let desired = Value::List(vec![Value::from("a"), Value::from("b")]);
        let current = Value::List(vec![Value::from("b"), Value::from("a")]);
        assert!(values_match(
            &desired,
            &current,
            Some(&schema.attributes["identity_ids"].attr_type)
        ));
        assert!(values_match(
            &Value::from("West Europe"),
            &Value::from("westeurope"),
            Some(&schema.attributes["location"].attr_type)
        ));
    }

    #[test]
    fn tags_maps_must_match_exactly() {
        let tags = types::tags();
        let mut desired = HashMap::new();
        desired.insert("env".to_string(), Value::from("test"));
        let mut current = desired.clone();
        current.insert("extra".to_string(), Value::from("x"));
        assert!(!values_match(
            &Value::Map(desired.clone()),
            &Value::Map(current),
            Some(&tags)
        ));
        assert!(values_match(
            &Value::Map(desired.clone()),
            &Value::Map(desired),
            Some(&tags)
        ));
    }

    #[test]
    fn unresolved_reference_is_a_change() {
        let desired = Value::ResourceRef("ws".to_string(), "id".to_string());
        assert!(!values_match(&desired, &Value::from("/subscriptions/x"), None));
    }

    #[test]
    fn create_plan_from_resources() {
        let resources = vec![
            Resource::new("machine_learning_workspace", "new"),
            Resource::new("machine_learning_workspace", "existing")
                .with_attribute("description", "desired"),
        ];

        let mut current_states = HashMap::new();
        let mut attrs = HashMap::new();
        attrs.insert("description".to_string(), Value::from("current"));
        current_states.insert(
            ResourceId::new("machine_learning_workspace", "existing"),
            State::existing(
                ResourceId::new("machine_learning_workspace", "existing"),
                attrs,
            ),
        );
        let orphan = ResourceId::new("machine_learning_registry", "old");
        current_states.insert(
            orphan.clone(),
            State::existing(orphan.clone(), HashMap::new()).with_identifier("/subscriptions/x"),
        );

        let plan = create_plan(&resources, &current_states, &HashMap::new());

        assert_eq!(plan.effects().len(), 3);
        assert!(matches!(plan.effects()[0], Effect::Create(_)));
        assert!(matches!(plan.effects()[1], Effect::Update { .. }));
        assert!(matches!(
            &plan.effects()[2],
            Effect::Delete { id, .. } if id == &orphan
        ));
    }
}
