//! Schema pieces and body helpers shared by several handlers

use std::collections::HashMap;

use azml_core::provider::{ProviderError, ProviderResult};
use azml_core::resource::Value;
use azml_core::schema::{
    AttributeSchema, AttributeType, BlockSchema, ResourceSchema, Validator, types,
};
use serde_json::json;

use crate::arm::IdParseError;
use crate::arm::id::{DatastoreId, SubnetId, WorkspaceId};
use crate::utils::{
    Attributes, expand_tags, flatten_tags, get_block, get_str, prune_nulls, require_str, set_bool,
    set_str,
};

/// Custom string type holding an ARM ID accepted by `parse`
pub fn arm_id_type(name: &str, parse: fn(&str) -> Result<(), IdParseError>) -> AttributeType {
    AttributeType::Custom {
        name: name.to_string(),
        base: Box::new(types::azure_resource_id()),
        validate: Validator::new(move |value| match value {
            Value::String(s) => parse(s).map_err(|e| e.to_string()),
            _ => Ok(()),
        }),
    }
}

pub fn workspace_id_type() -> AttributeType {
    arm_id_type("WorkspaceId", |s| WorkspaceId::parse(s).map(|_| ()))
}

pub fn subnet_id_type() -> AttributeType {
    arm_id_type("SubnetId", |s| SubnetId::parse(s).map(|_| ()))
}

pub fn name_attr(attr_type: AttributeType) -> AttributeSchema {
    AttributeSchema::new("name", attr_type).required().force_new()
}

pub fn location_attr() -> AttributeSchema {
    AttributeSchema::new("location", types::location())
        .required()
        .force_new()
}

pub fn resource_group_attr() -> AttributeSchema {
    AttributeSchema::new(
        "resource_group_name",
        types::name_matching(
            "ResourceGroupName",
            r"^[-\w\._\(\)]{1,90}$",
            "resource group names are 1-90 characters of letters, digits, '-', '_', '.', '(' and ')'",
        ),
    )
    .required()
    .force_new()
}

pub fn tags_attr() -> AttributeSchema {
    AttributeSchema::new("tags", types::tags())
}

/// `machine_learning_workspace_id` (or another name) pointing at a workspace
pub fn workspace_ref_attr(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, workspace_id_type())
        .required()
        .force_new()
}

/// Parse the workspace a child resource lives in
pub fn parent_workspace(attrs: &Attributes, key: &str) -> ProviderResult<WorkspaceId> {
    let raw = require_str(attrs, key)?;
    WorkspaceId::parse(raw).map_err(|e| ProviderError::validation(e.to_string()).with_cause(e))
}

/// `encryption` block of workspaces and hubs (customer-managed key)
pub fn encryption_schema() -> AttributeSchema {
    AttributeSchema::new(
        "encryption",
        AttributeType::Block(
            BlockSchema::single()
                .attribute(
                    AttributeSchema::new("key_vault_id", types::azure_resource_id()).required(),
                )
                .attribute(AttributeSchema::new("key_id", types::non_empty_string()).required())
                .attribute(AttributeSchema::new(
                    "user_assigned_identity_id",
                    types::azure_resource_id(),
                )),
        ),
    )
    .force_new()
}

pub fn expand_encryption(attrs: &Attributes) -> Option<serde_json::Value> {
    let block = get_block(attrs, "encryption")?;
    let mut encryption = json!({
        "status": "Enabled",
        "keyVaultProperties": {
            "keyVaultArmId": get_str(block, "key_vault_id"),
            "keyIdentifier": get_str(block, "key_id"),
        }
    });
    if let Some(identity) = get_str(block, "user_assigned_identity_id") {
        encryption["identity"] = json!({ "userAssignedIdentity": identity });
    }
    Some(encryption)
}

pub fn flatten_encryption(json: Option<&serde_json::Value>) -> Option<Value> {
    let json = json?;
    let status = json.get("status").and_then(|s| s.as_str())?;
    if !status.eq_ignore_ascii_case("Enabled") {
        return None;
    }
    let mut block = HashMap::new();
    set_str(
        &mut block,
        "key_vault_id",
        json.pointer("/keyVaultProperties/keyVaultArmId"),
    );
    set_str(
        &mut block,
        "key_id",
        json.pointer("/keyVaultProperties/keyIdentifier"),
    );
    set_str(
        &mut block,
        "user_assigned_identity_id",
        json.pointer("/identity/userAssignedIdentity"),
    );
    Some(Value::block(block))
}

pub const ISOLATION_MODES: [&str; 3] = [
    "Disabled",
    "AllowInternetOutbound",
    "AllowOnlyApprovedOutbound",
];

/// `managed_network` block of workspaces and hubs
pub fn managed_network_schema() -> AttributeSchema {
    AttributeSchema::new(
        "managed_network",
        AttributeType::Block(
            BlockSchema::single().attribute(
                AttributeSchema::new(
                    "isolation_mode",
                    AttributeType::Enum(ISOLATION_MODES.iter().map(|s| s.to_string()).collect()),
                )
                .optional_computed(),
            ),
        ),
    )
    .optional_computed()
}

pub fn expand_managed_network(attrs: &Attributes) -> Option<serde_json::Value> {
    let block = get_block(attrs, "managed_network")?;
    let mode = get_str(block, "isolation_mode").unwrap_or("Disabled");
    Some(json!({ "isolationMode": mode }))
}

pub fn flatten_managed_network(json: Option<&serde_json::Value>) -> Option<Value> {
    let mode = json?.get("isolationMode").and_then(|m| m.as_str())?;
    let mut block = HashMap::new();
    block.insert("isolation_mode".to_string(), Value::from(mode));
    Some(Value::block(block))
}

pub const SERVICE_DATA_AUTH_IDENTITIES: [&str; 3] = [
    "None",
    "WorkspaceSystemAssignedIdentity",
    "WorkspaceUserAssignedIdentity",
];

pub fn datastore_name_type() -> AttributeType {
    types::name_matching(
        "DatastoreName",
        r"^[a-zA-Z0-9_]{1,255}$",
        "datastore names contain only letters, digits and '_'",
    )
}

/// Schema attributes every datastore type shares
pub fn datastore_schema(resource_type: &str, description: &str) -> ResourceSchema {
    ResourceSchema::new(resource_type)
        .with_description(description)
        .attribute(name_attr(datastore_name_type()))
        .attribute(workspace_ref_attr("workspace_id"))
        .attribute(AttributeSchema::new("description", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("is_default", AttributeType::Bool).computed())
        .attribute(
            AttributeSchema::new(
                "service_data_auth_identity",
                AttributeType::Enum(
                    SERVICE_DATA_AUTH_IDENTITIES
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                ),
            )
            .with_default("None"),
        )
        .attribute(tags_attr().force_new())
}

pub fn datastore_id(attrs: &Attributes) -> ProviderResult<DatastoreId> {
    let workspace = parent_workspace(attrs, "workspace_id")?;
    Ok(DatastoreId::new(
        workspace.subscription_id,
        workspace.resource_group_name,
        workspace.workspace_name,
        require_str(attrs, "name")?,
    ))
}

/// PUT body of a datastore; `properties` holds the type-specific fields
pub fn expand_datastore(
    attrs: &Attributes,
    datastore_type: &str,
    properties: serde_json::Value,
    credentials: serde_json::Value,
) -> serde_json::Value {
    let mut body = json!({
        "properties": {
            "datastoreType": datastore_type,
            "description": get_str(attrs, "description"),
            "serviceDataAccessAuthIdentity": get_str(attrs, "service_data_auth_identity").unwrap_or("None"),
            "tags": expand_tags(attrs),
            "credentials": credentials,
        }
    });
    if let (Some(target), Some(extra)) = (body["properties"].as_object_mut(), properties.as_object())
    {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
    prune_nulls(&mut body);
    body
}

/// Attributes every datastore flatten starts from
pub fn flatten_datastore(id: &str, body: &serde_json::Value) -> ProviderResult<Attributes> {
    let parsed = DatastoreId::parse(id)
        .map_err(|e| ProviderError::new(e.to_string()).with_cause(e))?;
    let props = body.get("properties").cloned().unwrap_or_else(|| json!({}));

    let mut attrs = Attributes::new();
    attrs.insert("name".to_string(), Value::from(parsed.datastore_name.as_str()));
    attrs.insert(
        "workspace_id".to_string(),
        Value::from(parsed.workspace_id().to_string()),
    );
    set_str(&mut attrs, "description", props.get("description"));
    set_bool(&mut attrs, "is_default", props.get("isDefault"));
    set_str(
        &mut attrs,
        "service_data_auth_identity",
        props.get("serviceDataAccessAuthIdentity"),
    );
    attrs.insert("tags".to_string(), flatten_tags(props.get("tags")));
    Ok(attrs)
}

/// Credentials for an account key or SAS token, whichever is set
pub fn storage_credentials(attrs: &Attributes) -> serde_json::Value {
    if let Some(key) = get_str(attrs, "account_key") {
        json!({
            "credentialsType": "AccountKey",
            "secrets": { "secretsType": "AccountKey", "key": key }
        })
    } else if let Some(sas) = get_str(attrs, "shared_access_signature") {
        json!({
            "credentialsType": "Sas",
            "secrets": { "secretsType": "Sas", "sasToken": sas }
        })
    } else {
        json!({ "credentialsType": "None" })
    }
}

/// Set `value` at a JSON pointer, creating intermediate objects
pub fn set_pointer(target: &mut serde_json::Value, pointer: &str, value: serde_json::Value) {
    let mut current = target;
    let mut parts = pointer.trim_start_matches('/').split('/').peekable();
    while let Some(part) = parts.next() {
        if !current.is_object() {
            *current = json!({});
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        current = map.entry(part.to_string()).or_insert_with(|| json!({}));
    }
}

/// PATCH body holding only the changed attributes
///
/// `fields` maps attribute names to JSON pointers; values are copied from the
/// full request body, and an attribute missing there is sent as null to clear it.
pub fn patch_body(
    full: &serde_json::Value,
    changed: &[String],
    fields: &[(&str, &str)],
) -> serde_json::Value {
    let mut patch = json!({});
    for name in changed {
        if let Some((_, pointer)) = fields.iter().find(|(attr, _)| *attr == name.as_str()) {
            let value = full
                .pointer(pointer)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            set_pointer(&mut patch, pointer, value);
        }
    }
    patch
}
