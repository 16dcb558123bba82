//! ai_foundry_project
//!
//! A project is a workspace of kind `Project` living in its hub's resource
//! group. Storage, key vault, insights and registry come from the hub.

use azml_core::provider::{ProviderError, ProviderResult};
use azml_core::resource::Value;
use azml_core::schema::{AttributeSchema, AttributeType, ResourceSchema, normalize_location, types};
use serde_json::json;

use super::common::{location_attr, name_attr, parent_workspace, tags_attr, workspace_id_type};
use super::workspace::workspace_name_type;
use super::{ProviderContext, ResourceHandler, UpdateRequest};
use crate::arm::IdParseError;
use crate::arm::id::WorkspaceId;
use crate::identity::{IdentityFlavour, expand_identity, flatten_identity, identity_schema};
use crate::utils::{
    Attributes, expand_tags, flatten_tags, get_block, get_bool, get_str, prune_nulls,
    require_str, set_bool, set_str, tags_match,
};

/// Fields the hub owns; ARM rejects a project PUT that carries them
const HUB_INHERITED: [&str; 4] = [
    "storageAccount",
    "keyVault",
    "applicationInsights",
    "containerRegistry",
];

pub struct AiFoundryProjectHandler;

impl AiFoundryProjectHandler {
    fn arm_id(attrs: &Attributes) -> ProviderResult<WorkspaceId> {
        let hub = parent_workspace(attrs, "ai_services_hub_id")?;
        Ok(WorkspaceId::new(
            hub.subscription_id,
            hub.resource_group_name,
            require_str(attrs, "name")?,
        ))
    }
}

impl ResourceHandler for AiFoundryProjectHandler {
    fn resource_type(&self) -> &'static str {
        "ai_foundry_project"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.resource_type())
            .with_description("AI Foundry project")
            .attribute(name_attr(workspace_name_type()))
            .attribute(location_attr())
            .attribute(
                AttributeSchema::new("ai_services_hub_id", workspace_id_type())
                    .required()
                    .force_new(),
            )
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
            .attribute(identity_schema(false))
            .attribute(tags_attr())
            .attribute(AttributeSchema::new("project_id", AttributeType::String).computed())
    }

    fn resource_id(&self, attrs: &Attributes, _ctx: &ProviderContext) -> ProviderResult<String> {
        Ok(Self::arm_id(attrs)?.to_string())
    }

    fn validate_id(&self, id: &str) -> Result<(), IdParseError> {
        WorkspaceId::parse(id).map(|_| ())
    }

    fn expand(
        &self,
        attrs: &Attributes,
        _ctx: &ProviderContext,
    ) -> ProviderResult<serde_json::Value> {
        let mut body = json!({
            "location": require_str(attrs, "location")?,
            "kind": "Project",
            "tags": expand_tags(attrs),
            "identity": expand_identity(get_block(attrs, "identity"), IdentityFlavour::Compact)?,
            "properties": {
                "hubResourceId": require_str(attrs, "ai_services_hub_id")?,
                "description": get_str(attrs, "description"),
                "friendlyName": get_str(attrs, "friendly_name"),
                "hbiWorkspace": get_bool(attrs, "high_business_impact_enabled"),
                "primaryUserAssignedIdentity": get_str(attrs, "primary_user_assigned_identity"),
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
        let props = body.get("properties").cloned().unwrap_or_else(|| json!({}));

        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from(parsed.workspace_name.as_str()));
        if let Some(location) = body.get("location").and_then(|l| l.as_str()) {
            attrs.insert("location".to_string(), Value::from(normalize_location(location)));
        }
        set_str(&mut attrs, "ai_services_hub_id", props.get("hubResourceId"));
        set_str(&mut attrs, "description", props.get("description"));
        set_str(&mut attrs, "friendly_name", props.get("friendlyName"));
        set_bool(&mut attrs, "high_business_impact_enabled", props.get("hbiWorkspace"));
        set_str(
            &mut attrs,
            "primary_user_assigned_identity",
            props.get("primaryUserAssignedIdentity"),
        );
        set_str(&mut attrs, "project_id", props.get("workspaceId"));
        if let Some(identity) = flatten_identity(body.get("identity")) {
            attrs.insert("identity".to_string(), identity);
        }
        attrs.insert("tags".to_string(), flatten_tags(body.get("tags")));
        Ok(attrs)
    }

    /// Full PUT with the hub-owned fields explicitly cleared
    fn update(
        &self,
        attrs: &Attributes,
        _changed: &[String],
        ctx: &ProviderContext,
    ) -> ProviderResult<UpdateRequest> {
        let mut body = self.expand(attrs, ctx)?;
        if let Some(props) = body["properties"].as_object_mut() {
            for field in HUB_INHERITED {
                props.insert(field.to_string(), serde_json::Value::Null);
            }
        }
        Ok(UpdateRequest::Put(body))
    }

    fn delete_query(&self, ctx: &ProviderContext) -> Vec<(&'static str, &'static str)> {
        ctx.features.workspace_delete_query()
    }

    fn converged(&self, attrs: &Attributes, body: &serde_json::Value) -> Option<bool> {
        Some(tags_match(attrs, body))
    }
}
