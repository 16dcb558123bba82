//! ai_foundry
//!
//! An AI Foundry hub is a workspace of kind `Hub`. Projects attach to it and
//! inherit its storage, key vault and networking.

use azml_core::provider::{ProviderError, ProviderResult};
use azml_core::resource::Value;
use azml_core::schema::{AttributeSchema, AttributeType, ResourceSchema, normalize_location, types};
use serde_json::json;

use super::common::{
    encryption_schema, expand_encryption, expand_managed_network, flatten_encryption,
    flatten_managed_network, location_attr, managed_network_schema, name_attr, patch_body,
    resource_group_attr, tags_attr,
};
use super::workspace::workspace_name_type;
use super::{ProviderContext, ResourceHandler, UpdateRequest};
use crate::arm::IdParseError;
use crate::arm::id::WorkspaceId;
use crate::identity::{IdentityFlavour, expand_identity, flatten_identity, identity_schema};
use crate::utils::{
    Attributes, enabled_str, expand_tags, flatten_tags, get_block, get_bool, get_str, is_enabled,
    prune_nulls, require_str, set_bool, set_str, tags_match,
};

const PATCH_FIELDS: &[(&str, &str)] = &[
    ("tags", "/tags"),
    ("identity", "/identity"),
    ("description", "/properties/description"),
    ("friendly_name", "/properties/friendlyName"),
    ("image_build_compute_name", "/properties/imageBuildCompute"),
    ("public_network_access", "/properties/publicNetworkAccess"),
    (
        "primary_user_assigned_identity",
        "/properties/primaryUserAssignedIdentity",
    ),
    ("container_registry_id", "/properties/containerRegistry"),
    ("application_insights_id", "/properties/applicationInsights"),
    ("managed_network", "/properties/managedNetwork"),
];

pub struct AiFoundryHandler;

impl ResourceHandler for AiFoundryHandler {
    fn resource_type(&self) -> &'static str {
        "ai_foundry"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.resource_type())
            .with_description("AI Foundry hub")
            .attribute(name_attr(workspace_name_type()))
            .attribute(location_attr())
            .attribute(resource_group_attr())
            .attribute(
                AttributeSchema::new("storage_account_id", types::azure_resource_id())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("key_vault_id", types::azure_resource_id())
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new(
                "application_insights_id",
                types::azure_resource_id(),
            ))
            .attribute(AttributeSchema::new(
                "container_registry_id",
                types::azure_resource_id(),
            ))
            .attribute(
                AttributeSchema::new(
                    "public_network_access",
                    AttributeType::Enum(vec!["Enabled".to_string(), "Disabled".to_string()]),
                )
                .with_default("Enabled"),
            )
            .attribute(AttributeSchema::new(
                "image_build_compute_name",
                AttributeType::String,
            ))
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(AttributeSchema::new("friendly_name", AttributeType::String))
            .attribute(
                AttributeSchema::new("high_business_impact_enabled", AttributeType::Bool)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new(
                "primary_user_assigned_identity",
                types::azure_resource_id(),
            ))
            .attribute(identity_schema(true))
            .attribute(encryption_schema())
            .attribute(managed_network_schema())
            .attribute(tags_attr())
            .attribute(AttributeSchema::new("discovery_url", AttributeType::String).computed())
            .attribute(AttributeSchema::new("workspace_id", AttributeType::String).computed())
    }

    fn resource_id(&self, attrs: &Attributes, ctx: &ProviderContext) -> ProviderResult<String> {
        Ok(WorkspaceId::new(
            &ctx.subscription_id,
            require_str(attrs, "resource_group_name")?,
            require_str(attrs, "name")?,
        )
        .to_string())
    }

    fn validate_id(&self, id: &str) -> Result<(), IdParseError> {
        WorkspaceId::parse(id).map(|_| ())
    }

    fn expand(
        &self,
        attrs: &Attributes,
        _ctx: &ProviderContext,
    ) -> ProviderResult<serde_json::Value> {
        let public_access = get_str(attrs, "public_network_access").unwrap_or("Enabled");
        let mut body = json!({
            "location": require_str(attrs, "location")?,
            "kind": "Hub",
            "tags": expand_tags(attrs),
            "identity": expand_identity(get_block(attrs, "identity"), IdentityFlavour::Compact)?,
            "properties": {
                "storageAccount": get_str(attrs, "storage_account_id"),
                "keyVault": get_str(attrs, "key_vault_id"),
                "applicationInsights": get_str(attrs, "application_insights_id"),
                "containerRegistry": get_str(attrs, "container_registry_id"),
                "publicNetworkAccess": public_access,
                "imageBuildCompute": get_str(attrs, "image_build_compute_name"),
                "description": get_str(attrs, "description"),
                "friendlyName": get_str(attrs, "friendly_name"),
                "hbiWorkspace": get_bool(attrs, "high_business_impact_enabled"),
                "primaryUserAssignedIdentity": get_str(attrs, "primary_user_assigned_identity"),
                "encryption": expand_encryption(attrs),
                "managedNetwork": expand_managed_network(attrs),
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
        let parsed = WorkspaceId::parse(id)
            .map_err(|e| ProviderError::new(e.to_string()).with_cause(e))?;
        if let Some(kind) = body.get("kind").and_then(|k| k.as_str())
            && !kind.eq_ignore_ascii_case("Hub")
        {
            return Err(ProviderError::validation(format!(
                "workspace {} is of kind {:?}, not an AI Foundry hub",
                id, kind
            )));
        }
        let props = body.get("properties").cloned().unwrap_or_else(|| json!({}));

        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from(parsed.workspace_name.as_str()));
        attrs.insert(
            "resource_group_name".to_string(),
            Value::from(parsed.resource_group_name.as_str()),
        );
        if let Some(location) = body.get("location").and_then(|l| l.as_str()) {
            attrs.insert("location".to_string(), Value::from(normalize_location(location)));
        }
        set_str(&mut attrs, "storage_account_id", props.get("storageAccount"));
        set_str(&mut attrs, "key_vault_id", props.get("keyVault"));
        set_str(&mut attrs, "application_insights_id", props.get("applicationInsights"));
        set_str(&mut attrs, "container_registry_id", props.get("containerRegistry"));
        attrs.insert(
            "public_network_access".to_string(),
            Value::from(enabled_str(is_enabled(props.get("publicNetworkAccess")))),
        );
        set_str(&mut attrs, "image_build_compute_name", props.get("imageBuildCompute"));
        set_str(&mut attrs, "description", props.get("description"));
        set_str(&mut attrs, "friendly_name", props.get("friendlyName"));
        set_bool(&mut attrs, "high_business_impact_enabled", props.get("hbiWorkspace"));
        set_str(
            &mut attrs,
            "primary_user_assigned_identity",
            props.get("primaryUserAssignedIdentity"),
        );
        set_str(&mut attrs, "discovery_url", props.get("discoveryUrl"));
        set_str(&mut attrs, "workspace_id", props.get("workspaceId"));

        if let Some(identity) = flatten_identity(body.get("identity")) {
            attrs.insert("identity".to_string(), identity);
        }
        if let Some(encryption) = flatten_encryption(props.get("encryption")) {
            attrs.insert("encryption".to_string(), encryption);
        }
        if let Some(network) = flatten_managed_network(props.get("managedNetwork")) {
            attrs.insert("managed_network".to_string(), network);
        }
        attrs.insert("tags".to_string(), flatten_tags(body.get("tags")));
        Ok(attrs)
    }

    fn update(
        &self,
        attrs: &Attributes,
        changed: &[String],
        ctx: &ProviderContext,
    ) -> ProviderResult<UpdateRequest> {
        let full = self.expand(attrs, ctx)?;
        Ok(UpdateRequest::Patch(patch_body(&full, changed, PATCH_FIELDS)))
    }

    fn delete_query(&self, ctx: &ProviderContext) -> Vec<(&'static str, &'static str)> {
        ctx.features.workspace_delete_query()
    }

    fn converged(&self, attrs: &Attributes, body: &serde_json::Value) -> Option<bool> {
        Some(tags_match(attrs, body))
    }
}
