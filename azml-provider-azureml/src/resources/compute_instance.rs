//! machine_learning_compute_instance
//!
//! Every attribute forces a new instance; ARM offers no update for them.

use azml_core::provider::{ProviderError, ProviderResult};
use azml_core::resource::Value;
use azml_core::schema::{AttributeSchema, AttributeType, BlockSchema, ResourceSchema, types};
use serde_json::json;

use super::common::{location_attr, name_attr, subnet_id_type, tags_attr, workspace_ref_attr};
use super::compute_cluster::{compute_id, compute_name_type, flatten_compute_common};
use super::{ProviderContext, ResourceHandler};
use crate::arm::IdParseError;
use crate::arm::id::ComputeId;
use crate::identity::{IdentityFlavour, expand_identity, identity_schema};
use crate::utils::{
    Attributes, enabled_str, expand_tags, get_block, get_bool, get_str, prune_nulls,
    require_str, set_bool, set_int, set_str,
};

pub struct ComputeInstanceHandler;

fn assign_to_user_schema() -> AttributeSchema {
    AttributeSchema::new(
        "assign_to_user",
        AttributeType::Block(
            BlockSchema::single()
                .attribute(AttributeSchema::new("object_id", types::uuid()))
                .attribute(AttributeSchema::new("tenant_id", types::uuid())),
        ),
    )
    .force_new()
}

fn ssh_schema() -> AttributeSchema {
    AttributeSchema::new(
        "ssh",
        AttributeType::Block(
            BlockSchema::single()
                .attribute(AttributeSchema::new("public_key", types::non_empty_string()).required())
                .attribute(AttributeSchema::new("username", AttributeType::String).computed())
                .attribute(AttributeSchema::new("port", AttributeType::Int).computed()),
        ),
    )
    .force_new()
}

impl ResourceHandler for ComputeInstanceHandler {
    fn resource_type(&self) -> &'static str {
        "machine_learning_compute_instance"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.resource_type())
            .with_description("Azure Machine Learning compute instance")
            .attribute(name_attr(compute_name_type()))
            .attribute(workspace_ref_attr("machine_learning_workspace_id"))
            .attribute(location_attr())
            .attribute(
                AttributeSchema::new("virtual_machine_size", types::non_empty_string())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "authorization_type",
                    AttributeType::Enum(vec!["personal".to_string()]),
                )
                .force_new(),
            )
            .attribute(assign_to_user_schema())
            .attribute(AttributeSchema::new("description", AttributeType::String).force_new())
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
            .attribute(ssh_schema())
            .attribute(
                AttributeSchema::new("subnet_resource_id", subnet_id_type()).force_new(),
            )
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
        Ok(())
    }

    fn expand(
        &self,
        attrs: &Attributes,
        _ctx: &ProviderContext,
    ) -> ProviderResult<serde_json::Value> {
        let ssh = get_block(attrs, "ssh");
        let ssh_settings = json!({
            "sshPublicAccess": enabled_str(ssh.is_some()),
            "adminPublicKey": ssh.and_then(|s| get_str(s, "public_key")),
        });
        let assigned_user = get_block(attrs, "assign_to_user").map(|user| {
            json!({
                "assignedUser": {
                    "objectId": get_str(user, "object_id"),
                    "tenantId": get_str(user, "tenant_id"),
                }
            })
        });

        let mut body = json!({
            "location": require_str(attrs, "location")?,
            "identity": expand_identity(get_block(attrs, "identity"), IdentityFlavour::Compact)?,
            "tags": expand_tags(attrs),
            "properties": {
                "computeType": "ComputeInstance",
                "description": get_str(attrs, "description"),
                "disableLocalAuth": !get_bool(attrs, "local_auth_enabled").unwrap_or(true),
                "properties": {
                    "vmSize": require_str(attrs, "virtual_machine_size")?,
                    "subnet": get_str(attrs, "subnet_resource_id").map(|id| json!({ "id": id })),
                    "sshSettings": ssh_settings,
                    "computeInstanceAuthorizationType": get_str(attrs, "authorization_type"),
                    "personalComputeInstanceSettings": assigned_user,
                    "enableNodePublicIp": get_bool(attrs, "node_public_ip_enabled").unwrap_or(true),
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

        set_str(&mut attrs, "virtual_machine_size", props.get("vmSize"));
        set_str(
            &mut attrs,
            "authorization_type",
            props.get("computeInstanceAuthorizationType"),
        );
        set_bool(&mut attrs, "node_public_ip_enabled", props.get("enableNodePublicIp"));
        set_str(&mut attrs, "subnet_resource_id", props.pointer("/subnet/id"));

        if let Some(user) = props.pointer("/personalComputeInstanceSettings/assignedUser") {
            let mut block = Attributes::new();
            set_str(&mut block, "object_id", user.get("objectId"));
            set_str(&mut block, "tenant_id", user.get("tenantId"));
            attrs.insert("assign_to_user".to_string(), Value::block(block));
        }

        if let Some(ssh) = props.get("sshSettings")
            && ssh.get("sshPublicAccess").and_then(|v| v.as_str()) == Some("Enabled")
        {
            let mut block = Attributes::new();
            set_str(&mut block, "public_key", ssh.get("adminPublicKey"));
            set_str(&mut block, "username", ssh.get("adminUserName"));
            set_int(&mut block, "port", ssh.get("sshPort"));
            attrs.insert("ssh".to_string(), Value::block(block));
        }

        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;

    const WS: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/ws";

    fn ctx() -> ProviderContext {
        ProviderContext {
            subscription_id: "sub".to_string(),
            features: Features::default(),
            storage_endpoint_suffix: "core.windows.net".to_string(),
        }
    }

    fn attrs() -> Attributes {
        let mut user = Attributes::new();
        user.insert(
            "object_id".to_string(),
            Value::from("00000000-0000-0000-0000-000000000001"),
        );
        user.insert(
            "tenant_id".to_string(),
            Value::from("00000000-0000-0000-0000-000000000002"),
        );
        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from("ci1"));
        attrs.insert("machine_learning_workspace_id".to_string(), Value::from(WS));
        attrs.insert("location".to_string(), Value::from("westeurope"));
        attrs.insert("virtual_machine_size".to_string(), Value::from("STANDARD_DS2_V2"));
        attrs.insert("authorization_type".to_string(), Value::from("personal"));
        attrs.insert("assign_to_user".to_string(), Value::block(user));
        attrs
    }

    #[test]
    fn every_attribute_forces_replacement() {
        let schema = ComputeInstanceHandler.schema();
        assert!(schema.validate(&attrs()).is_ok());
        for (name, attr) in &schema.attributes {
            assert!(attr.force_new || attr.computed, "{} is updatable", name);
        }
    }

    #[test]
    fn expand_sets_personal_settings() {
        let body = ComputeInstanceHandler.expand(&attrs(), &ctx()).unwrap();
        let inner = &body["properties"]["properties"];
        assert_eq!(body["properties"]["computeType"], "ComputeInstance");
        assert_eq!(inner["computeInstanceAuthorizationType"], "personal");
        assert_eq!(
            inner["personalComputeInstanceSettings"]["assignedUser"]["objectId"],
            "00000000-0000-0000-0000-000000000001"
        );
        assert_eq!(inner["sshSettings"]["sshPublicAccess"], "Disabled");
    }

    #[test]
    fn flatten_reads_ssh_settings() {
        let id = format!("{}/computes/ci1", WS);
        let body = json!({
            "location": "westeurope",
            "properties": {
                "computeType": "ComputeInstance",
                "disableLocalAuth": true,
                "properties": {
                    "vmSize": "STANDARD_DS2_V2",
                    "sshSettings": {
                        "sshPublicAccess": "Enabled",
                        "adminUserName": "azureuser",
                        "sshPort": 50000,
                        "adminPublicKey": "ssh-rsa AAAA"
                    }
                }
            }
        });
        let flat = ComputeInstanceHandler.flatten(&id, &body, &ctx()).unwrap();
        assert_eq!(flat["local_auth_enabled"], Value::Bool(false));
        let ssh = flat["ssh"].as_block().unwrap();
        assert_eq!(ssh["username"], Value::from("azureuser"));
        assert_eq!(ssh["port"], Value::Int(50000));
        assert!(!flat.contains_key("assign_to_user"));
    }
}
