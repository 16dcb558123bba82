//! The `identity` block shared by workspaces, computes and registries
//!
//! ARM spells the combined type both as `SystemAssigned,UserAssigned` and
//! `SystemAssigned, UserAssigned` depending on the service and API version.
//! State always uses the spaced form.

use std::collections::HashMap;

use azml_core::provider::ProviderError;
use azml_core::resource::Value;
use azml_core::schema::{AttributeSchema, AttributeType, BlockSchema};
use serde_json::json;

use crate::arm::id::UserAssignedIdentityId;
use crate::resources::common::arm_id_type;
use crate::utils::{Attributes, get_str, get_strings};

pub const SYSTEM_ASSIGNED: &str = "SystemAssigned";
pub const USER_ASSIGNED: &str = "UserAssigned";
pub const SYSTEM_ASSIGNED_USER_ASSIGNED: &str = "SystemAssigned, UserAssigned";

/// Wire spelling of the combined identity type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityFlavour {
    /// `SystemAssigned,UserAssigned`
    Compact,
    /// `SystemAssigned, UserAssigned`
    Spaced,
}

/// Schema of the `identity` block
pub fn identity_schema(required: bool) -> AttributeSchema {
    let block = BlockSchema::single()
        .attribute(
            AttributeSchema::new(
                "type",
                AttributeType::Enum(vec![
                    SYSTEM_ASSIGNED.to_string(),
                    USER_ASSIGNED.to_string(),
                    SYSTEM_ASSIGNED_USER_ASSIGNED.to_string(),
                ]),
            )
            .required(),
        )
        .attribute(
            AttributeSchema::new(
                "identity_ids",
                AttributeType::Set(Box::new(arm_id_type("UserAssignedIdentityId", |s| {
                    UserAssignedIdentityId::parse(s).map(|_| ())
                }))),
            )
            .with_description("User assigned identity IDs"),
        )
        .attribute(AttributeSchema::new("principal_id", AttributeType::String).computed())
        .attribute(AttributeSchema::new("tenant_id", AttributeType::String).computed());

    let block = if required { block.min_items(1) } else { block };
    let schema = AttributeSchema::new("identity", AttributeType::Block(block));
    if required { schema.required() } else { schema }
}

/// Canonical state spelling of an identity type as returned by ARM
pub fn normalize_identity_type(raw: &str) -> Option<&'static str> {
    let parts: Vec<String> = raw
        .split(',')
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    let system = parts.iter().any(|p| p == "systemassigned");
    let user = parts.iter().any(|p| p == "userassigned");
    match (system, user) {
        (true, true) => Some(SYSTEM_ASSIGNED_USER_ASSIGNED),
        (true, false) => Some(SYSTEM_ASSIGNED),
        (false, true) => Some(USER_ASSIGNED),
        (false, false) => None,
    }
}

/// Build the ARM `identity` object from the `identity` block
pub fn expand_identity(
    block: Option<&Attributes>,
    flavour: IdentityFlavour,
) -> Result<serde_json::Value, ProviderError> {
    let Some(block) = block else {
        return Ok(json!({ "type": "None" }));
    };

    let identity_type = get_str(block, "type")
        .and_then(normalize_identity_type)
        .ok_or_else(|| ProviderError::validation("identity.type must be set"))?;
    let ids = get_strings(block, "identity_ids");

    let has_user = identity_type != SYSTEM_ASSIGNED;
    if has_user && ids.is_empty() {
        return Err(ProviderError::validation(format!(
            "`identity_ids` must be specified when `type` is {:?}",
            identity_type
        )));
    }
    if !has_user && !ids.is_empty() {
        return Err(ProviderError::validation(
            "`identity_ids` can only be specified when `type` includes `UserAssigned`",
        ));
    }

    let wire_type = match (identity_type, flavour) {
        (SYSTEM_ASSIGNED_USER_ASSIGNED, IdentityFlavour::Compact) => "SystemAssigned,UserAssigned",
        (t, _) => t,
    };

    let mut identity = json!({ "type": wire_type });
    if has_user {
        let user_assigned: serde_json::Map<String, serde_json::Value> =
            ids.into_iter().map(|id| (id, json!({}))).collect();
        identity["userAssignedIdentities"] = serde_json::Value::Object(user_assigned);
    }
    Ok(identity)
}

/// Read the ARM `identity` object back into an `identity` block
///
/// A missing object or type `None` produces no block.
pub fn flatten_identity(json: Option<&serde_json::Value>) -> Option<Value> {
    let json = json?;
    let identity_type = json
        .get("type")
        .and_then(|t| t.as_str())
        .and_then(normalize_identity_type)?;

    let mut block = HashMap::new();
    block.insert("type".to_string(), Value::from(identity_type));

    let mut ids: Vec<String> = json
        .get("userAssignedIdentities")
        .and_then(|u| u.as_object())
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default();
    ids.sort();
    block.insert(
        "identity_ids".to_string(),
        Value::List(ids.into_iter().map(Value::String).collect()),
    );

    for (attr, field) in [("principal_id", "principalId"), ("tenant_id", "tenantId")] {
        if let Some(s) = json.get(field).and_then(|v| v.as_str()) {
            block.insert(attr.to_string(), Value::from(s));
        }
    }

    Some(Value::block(block))
}
