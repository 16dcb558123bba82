//! Effect - A side effect represented as a value
//!
//! Effects describe what should happen to a resource. Nothing is executed
//! until an Interpreter hands them to a Provider.

use crate::resource::{Resource, ResourceId, State};

/// A single operation against the infrastructure
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Refresh a resource without modifying it
    Read { resource: Resource },
    /// Create a new resource
    Create(Resource),
    /// Update a resource in place
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Delete and recreate because a force-new attribute changed
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Delete a resource identified by its remote ID
    Delete { id: ResourceId, identifier: String },
}

impl Effect {
    /// Whether this Effect changes the infrastructure
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Effect::Read { .. })
    }

    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Read { resource } | Effect::Create(resource) => &resource.id,
            Effect::Update { id, .. } | Effect::Replace { id, .. } | Effect::Delete { id, .. } => {
                id
            }
        }
    }

    /// Short verb used when printing plans
    pub fn verb(&self) -> &'static str {
        match self {
            Effect::Read { .. } => "read",
            Effect::Create(_) => "create",
            Effect::Update { .. } => "update",
            Effect::Replace { .. } => "replace",
            Effect::Delete { .. } => "delete",
        }
    }
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.verb(), self.resource_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_is_not_mutating() {
        let read = Effect::Read {
            resource: Resource::new("machine_learning_workspace", "ws"),
        };
        assert!(!read.is_mutating());
        assert!(Effect::Create(Resource::new("machine_learning_workspace", "ws")).is_mutating());
    }

    #[test]
    fn display_uses_verb_and_id() {
        let effect = Effect::Delete {
            id: ResourceId::new("machine_learning_registry", "reg"),
            identifier: "/subscriptions/x".to_string(),
        };
        assert_eq!(effect.to_string(), "delete machine_learning_registry.reg");
    }
}
