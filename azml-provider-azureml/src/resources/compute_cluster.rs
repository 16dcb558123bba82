//! machine_learning_compute_cluster

use azml_core::provider::{ProviderError, ProviderResult};
use azml_core::resource::Value;
use azml_core::schema::{
    AttributeSchema, AttributeType, BlockSchema, ResourceSchema, normalize_location, types,
};
use serde_json::json;

use super::common::{
    location_attr, name_attr, parent_workspace, subnet_id_type, tags_attr, workspace_ref_attr,
};
use super::{ProviderContext, ResourceHandler, UpdateRequest};
use crate::arm::IdParseError;
use crate::arm::id::ComputeId;
use crate::identity::{IdentityFlavour, expand_identity, flatten_identity, identity_schema};
use crate::utils::{
    Attributes, enabled_str, expand_tags, flatten_tags, get_block, get_bool, get_int, get_str,
    prune_nulls, require_str, set_bool, set_int, set_str,
};

/// Compute names: 2-16 characters, letters, digits and '-', no trailing '-'
pub fn compute_name_type() -> AttributeType {
    types::name_matching(
        "ComputeName",
        r"^[a-zA-Z][a-zA-Z0-9-]{0,14}[a-zA-Z0-9]$",
        "compute names are 2-16 characters of letters, digits and '-', start with a letter and do not end with '-'",
    )
}

/// Build the compute ARM ID from `name` and the parent workspace attribute
pub(super) fn compute_id(attrs: &Attributes) -> ProviderResult<ComputeId> {
    let workspace = parent_workspace(attrs, "machine_learning_workspace_id")?;
    Ok(ComputeId::new(
        workspace.subscription_id,
        workspace.resource_group_name,
        workspace.workspace_name,
        require_str(attrs, "name")?,
    ))
}

/// Attributes common to the flatten of every compute type
pub(super) fn flatten_compute_common(id: &str, body: &serde_json::Value) -> ProviderResult<Attributes> {
    let parsed = ComputeId::parse(id).map_err(|e| ProviderError::new(e.to_string()).with_cause(e))?;
    let mut attrs = Attributes::new();
    attrs.insert("name".to_string(), Value::from(parsed.compute_name.as_str()));
    attrs.insert(
        "machine_learning_workspace_id".to_string(),
        Value::from(parsed.workspace_id().to_string()),
    );
    if let Some(location) = body.get("location").and_then(|l| l.as_str()) {
        attrs.insert("location".to_string(), Value::from(normalize_location(location)));
    }
    set_str(&mut attrs, "description", body.pointer("/properties/description"));
    if let Some(disabled) = body
        .pointer("/properties/disableLocalAuth")
        .and_then(|v| v.as_bool())
    {
        attrs.insert("local_auth_enabled".to_string(), Value::Bool(!disabled));
    }
    if let Some(identity) = flatten_identity(body.get("identity")) {
        attrs.insert("identity".to_string(), identity);
    }
    attrs.insert("tags".to_string(), flatten_tags(body.get("tags")));
    Ok(attrs)
}

const VM_PRIORITIES: [&str; 2] = ["Dedicated", "LowPriority"];

pub struct ComputeClusterHandler;

fn scale_settings_schema() -> AttributeSchema {
    AttributeSchema::new(
        "scale_settings",
        AttributeType::Block(
            BlockSchema::single()
                .min_items(1)
                .attribute(
                    AttributeSchema::new("max_node_count", types::non_negative_int()).required(),
                )
                .attribute(
                    AttributeSchema::new("min_node_count", types::non_negative_int()).required(),
                )
                .attribute(
                    AttributeSchema::new(
                        "scale_down_nodes_after_idle_duration",
                        types::iso8601_duration(),
                    )
                    .required(),
                ),
        ),
    )
    .required()
}

fn ssh_schema() -> AttributeSchema {
    AttributeSchema::new(
        "ssh",
        AttributeType::Block(
            BlockSchema::single()
                .attribute(
                    AttributeSchema::new("admin_username", types::non_empty_string()).required(),
                )
                .attribute(AttributeSchema::new("admin_password", AttributeType::String).sensitive())
                .attribute(AttributeSchema::new("key_value", AttributeType::String)),
        ),
    )
    .force_new()
    .write_only()
}

/// An `ssh` block needs a password or a public key
pub(super) fn validate_ssh(attrs: &Attributes) -> ProviderResult<()> {
    if let Some(ssh) = get_block(attrs, "ssh")
        && get_str(ssh, "admin_password").is_none()
        && get_str(ssh, "key_value").is_none()
    {
        return Err(ProviderError::validation(
            "one of `ssh.admin_password` or `ssh.key_value` must be set",
        ));
    }
    Ok(())
}

fn scale_settings_json(attrs: &Attributes) -> ProviderResult<serde_json::Value> {
    let block = get_block(attrs, "scale_settings")
        .ok_or_else(|| ProviderError::validation("'scale_settings' is required"))?;
    let max = get_int(block, "max_node_count").unwrap_or(0);
    let min = get_int(block, "min_node_count").unwrap_or(0);
    if min > max {
        return Err(ProviderError::validation(format!(
            "scale_settings.min_node_count ({}) must not exceed max_node_count ({})",
            min, max
        )));
    }
    Ok(json!({
        "maxNodeCount": max,
        "minNodeCount": min,
        "nodeIdleTimeBeforeScaleDown": get_str(block, "scale_down_nodes_after_idle_duration"),
    }))
}

impl ResourceHandler for ComputeClusterHandler {
    fn resource_type(&self) -> &'static str {
        "machine_learning_compute_cluster"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.resource_type())
            .with_description("Azure Machine Learning compute cluster (AmlCompute)")
            .attribute(name_attr(compute_name_type()))
            .attribute(workspace_ref_attr("machine_learning_workspace_id"))
            .attribute(location_attr())
            .attribute(
                AttributeSchema::new(
                    "vm_priority",
                    AttributeType::Enum(VM_PRIORITIES.iter().map(|s| s.to_string()).collect()),
                )
                .required()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new("vm_size", types::non_empty_string())
                    .required()
                    .force_new(),
            )
            .attribute(scale_settings_schema())
            .attribute(
                AttributeSchema::new("description", AttributeType::String).force_new(),
            )
            .attribute(
                AttributeSchema::new("local_auth_enabled", AttributeType::Bool)
                    .with_default(true)
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("node_public_ip_enabled", AttributeType::Bool)
                    .with_default(true)
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("ssh_public_access_enabled", AttributeType::Bool)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("subnet_resource_id", subnet_id_type()).force_new(),
            )
            .attribute(ssh_schema())
            .attribute(identity_schema(false).force_new())
            .attribute(tags_attr().force_new())
    }

    fn resource_id(&self, attrs: &Attributes, _ctx: &ProviderContext) -> ProviderResult<String> {
        Ok(compute_id(attrs)?.to_string())
    }

    fn validate_id(&self, id: &str) -> Result<(), IdParseError> {
        ComputeId::parse(id).map(|_| ())
    }

    fn validate(&self, attrs: &Attributes) -> ProviderResult<()> {
        if get_bool(attrs, "node_public_ip_enabled") == Some(false)
            && get_str(attrs, "subnet_resource_id").is_none()
        {
            return Err(ProviderError::validation(
                "`subnet_resource_id` must be set if `node_public_ip_enabled` is false",
            ));
        }
        validate_ssh(attrs)?;
        scale_settings_json(attrs).map(|_| ())
    }

    fn expand(
        &self,
        attrs: &Attributes,
        _ctx: &ProviderContext,
    ) -> ProviderResult<serde_json::Value> {
        let ssh_access = get_bool(attrs, "ssh_public_access_enabled").map(enabled_str);
        let credentials = get_block(attrs, "ssh").map(|ssh| {
            json!({
                "adminUserName": get_str(ssh, "admin_username"),
                "adminUserPassword": get_str(ssh, "admin_password"),
                "adminUserSshPublicKey": get_str(ssh, "key_value"),
            })
        });

        let mut body = json!({
            "location": require_str(attrs, "location")?,
            "identity": expand_identity(get_block(attrs, "identity"), IdentityFlavour::Compact)?,
            "tags": expand_tags(attrs),
            "properties": {
                "computeType": "AmlCompute",
                "description": get_str(attrs, "description"),
                "disableLocalAuth": !get_bool(attrs, "local_auth_enabled").unwrap_or(true),
                "properties": {
                    "vmSize": require_str(attrs, "vm_size")?,
                    "vmPriority": require_str(attrs, "vm_priority")?,
                    "scaleSettings": scale_settings_json(attrs)?,
                    "userAccountCredentials": credentials,
                    "enableNodePublicIp": get_bool(attrs, "node_public_ip_enabled").unwrap_or(true),
                    "remoteLoginPortPublicAccess": ssh_access.unwrap_or("NotSpecified"),
                    "subnet": get_str(attrs, "subnet_resource_id").map(|id| json!({ "id": id })),
                }
            }
        });
        prune_nulls(&mut body);
        Ok(body)
    }

    fn flatten(
        &self,
        id: &str,
        body: &serde_json::Value,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Attributes> {
        let mut attrs = flatten_compute_common(id, body)?;
        let props = body
            .pointer("/properties/properties")
            .cloned()
            .unwrap_or_else(|| json!({}));

        set_str(&mut attrs, "vm_size", props.get("vmSize"));
        set_str(&mut attrs, "vm_priority", props.get("vmPriority"));
        set_bool(&mut attrs, "node_public_ip_enabled", props.get("enableNodePublicIp"));
        set_str(&mut attrs, "subnet_resource_id", props.pointer("/subnet/id"));
        match props.get("remoteLoginPortPublicAccess").and_then(|v| v.as_str()) {
            Some("Enabled") => {
                attrs.insert("ssh_public_access_enabled".to_string(), Value::Bool(true));
            }
            Some("Disabled") => {
                attrs.insert("ssh_public_access_enabled".to_string(), Value::Bool(false));
            }
            _ => {}
        }

        if let Some(scale) = props.get("scaleSettings") {
            let mut block = Attributes::new();
            set_int(&mut block, "max_node_count", scale.get("maxNodeCount"));
            set_int(&mut block, "min_node_count", scale.get("minNodeCount"));
            set_str(
                &mut block,
                "scale_down_nodes_after_idle_duration",
                scale.get("nodeIdleTimeBeforeScaleDown"),
            );
            attrs.insert("scale_settings".to_string(), Value::block(block));
        }

        // `ssh` is kept from state; ARM never returns the password

        Ok(attrs)
    }

    fn update(
        &self,
        attrs: &Attributes,
        _changed: &[String],
        _ctx: &ProviderContext,
    ) -> ProviderResult<UpdateRequest> {
        Ok(UpdateRequest::Patch(json!({
            "properties": {
                "properties": {
                    "scaleSettings": scale_settings_json(attrs)?,
                }
            }
        })))
    }

    fn delete_query(&self, _ctx: &ProviderContext) -> Vec<(&'static str, &'static str)> {
        vec![("underlyingResourceAction", "Delete")]
    }
}
