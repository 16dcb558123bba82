//! machine_learning_workspace

use azml_core::provider::{ProviderError, ProviderResult};
use azml_core::resource::Value;
use azml_core::schema::{
    AttributeSchema, AttributeType, BlockSchema, ResourceSchema, normalize_location, types,
};
use serde_json::json;

use super::common::{
    encryption_schema, expand_encryption, expand_managed_network, flatten_encryption,
    flatten_managed_network, location_attr, managed_network_schema, name_attr, patch_body,
    resource_group_attr, tags_attr,
};
use super::{ProviderContext, ResourceHandler, UpdateRequest};
use crate::arm::IdParseError;
use crate::arm::id::WorkspaceId;
use crate::identity::{IdentityFlavour, expand_identity, flatten_identity, identity_schema};
use crate::utils::{
    Attributes, enabled_str, expand_tags, flatten_tags, get_block, get_bool, get_str, is_enabled,
    prune_nulls, require_str, set_bool, set_str, tags_match,
};

pub const SKU_NAMES: [&str; 4] = ["Free", "Basic", "Standard", "Premium"];

/// Workspace names: 3-33 characters, starting with a letter or digit
pub fn workspace_name_type() -> AttributeType {
    types::name_matching(
        "WorkspaceName",
        r"^[a-zA-Z0-9][a-zA-Z0-9_-]{2,32}$",
        "workspace names are 3-33 characters of letters, digits, '-' and '_' and start with a letter or digit",
    )
}

/// Attribute to ARM field mapping used for PATCH
const PATCH_FIELDS: &[(&str, &str)] = &[
    ("tags", "/tags"),
    ("sku_name", "/sku"),
    ("identity", "/identity"),
    ("description", "/properties/description"),
    ("friendly_name", "/properties/friendlyName"),
    ("image_build_compute_name", "/properties/imageBuildCompute"),
    ("public_network_access_enabled", "/properties/publicNetworkAccess"),
    (
        "primary_user_assigned_identity",
        "/properties/primaryUserAssignedIdentity",
    ),
    ("container_registry_id", "/properties/containerRegistry"),
    ("v1_legacy_mode_enabled", "/properties/v1LegacyMode"),
    ("managed_network", "/properties/managedNetwork"),
    ("feature_store", "/properties/featureStoreSettings"),
    ("serverless_compute", "/properties/serverlessComputeSettings"),
];

pub struct WorkspaceHandler;

impl WorkspaceHandler {
    fn arm_id(attrs: &Attributes, ctx: &ProviderContext) -> ProviderResult<WorkspaceId> {
        Ok(WorkspaceId::new(
            &ctx.subscription_id,
            require_str(attrs, "resource_group_name")?,
            require_str(attrs, "name")?,
        ))
    }
}

fn feature_store_schema() -> AttributeSchema {
    AttributeSchema::new(
        "feature_store",
        AttributeType::Block(
            BlockSchema::single()
                .attribute(AttributeSchema::new(
                    "computer_spark_runtime_version",
                    AttributeType::String,
                ))
                .attribute(AttributeSchema::new(
                    "offline_connection_name",
                    AttributeType::String,
                ))
                .attribute(AttributeSchema::new(
                    "online_connection_name",
                    AttributeType::String,
                )),
        ),
    )
}

fn serverless_compute_schema() -> AttributeSchema {
    AttributeSchema::new(
        "serverless_compute",
        AttributeType::Block(
            BlockSchema::single()
                .attribute(AttributeSchema::new("subnet_id", types::azure_resource_id()))
                .attribute(
                    AttributeSchema::new("public_ip_enabled", AttributeType::Bool)
                        .with_default(false),
                ),
        ),
    )
}

impl ResourceHandler for WorkspaceHandler {
    fn resource_type(&self) -> &'static str {
        "machine_learning_workspace"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.resource_type())
            .with_description("Azure Machine Learning workspace")
            .attribute(name_attr(workspace_name_type()))
            .attribute(location_attr())
            .attribute(resource_group_attr())
            .attribute(
                AttributeSchema::new("application_insights_id", types::azure_resource_id())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("key_vault_id", types::azure_resource_id())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("storage_account_id", types::azure_resource_id())
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new(
                "container_registry_id",
                types::azure_resource_id(),
            ))
            .attribute(
                AttributeSchema::new("public_network_access_enabled", AttributeType::Bool)
                    .with_default(true),
            )
            .attribute(AttributeSchema::new(
                "image_build_compute_name",
                AttributeType::String,
            ))
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(AttributeSchema::new("friendly_name", AttributeType::String))
            .attribute(
                AttributeSchema::new("high_business_impact", AttributeType::Bool)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new(
                "primary_user_assigned_identity",
                types::azure_resource_id(),
            ))
            .attribute(
                AttributeSchema::new("v1_legacy_mode_enabled", AttributeType::Bool)
                    .with_default(false),
            )
            .attribute(
                AttributeSchema::new(
                    "sku_name",
                    AttributeType::Enum(SKU_NAMES.iter().map(|s| s.to_string()).collect()),
                )
                .with_default("Basic"),
            )
            .attribute(
                AttributeSchema::new(
                    "kind",
                    AttributeType::Enum(vec!["Default".to_string(), "FeatureStore".to_string()]),
                )
                .with_default("Default")
                .force_new(),
            )
            .attribute(identity_schema(true))
            .attribute(encryption_schema())
            .attribute(managed_network_schema())
            .attribute(feature_store_schema())
            .attribute(serverless_compute_schema())
            .attribute(tags_attr())
            .attribute(AttributeSchema::new("discovery_url", AttributeType::String).computed())
            .attribute(AttributeSchema::new("workspace_id", AttributeType::String).computed())
    }

    fn resource_id(&self, attrs: &Attributes, ctx: &ProviderContext) -> ProviderResult<String> {
        Ok(Self::arm_id(attrs, ctx)?.to_string())
    }

    fn validate_id(&self, id: &str) -> Result<(), IdParseError> {
        WorkspaceId::parse(id).map(|_| ())
    }

    fn validate(&self, attrs: &Attributes) -> ProviderResult<()> {
        let feature_store = get_block(attrs, "feature_store").is_some();
        let is_feature_store = get_str(attrs, "kind") == Some("FeatureStore");
        if is_feature_store && !feature_store {
            return Err(ProviderError::validation(
                "`feature_store` must be set when `kind` is \"FeatureStore\"",
            ));
        }
        if feature_store && !is_feature_store {
            return Err(ProviderError::validation(
                "`feature_store` can only be set when `kind` is \"FeatureStore\"",
            ));
        }
        Ok(())
    }

    fn expand(
        &self,
        attrs: &Attributes,
        _ctx: &ProviderContext,
    ) -> ProviderResult<serde_json::Value> {
        let sku = get_str(attrs, "sku_name").unwrap_or("Basic");
        let mut body = json!({
            "location": require_str(attrs, "location")?,
            "kind": get_str(attrs, "kind").unwrap_or("Default"),
            "tags": expand_tags(attrs),
            "sku": { "name": sku, "tier": sku },
            "identity": expand_identity(get_block(attrs, "identity"), IdentityFlavour::Compact)?,
            "properties": {
                "applicationInsights": get_str(attrs, "application_insights_id"),
                "keyVault": get_str(attrs, "key_vault_id"),
                "storageAccount": get_str(attrs, "storage_account_id"),
                "containerRegistry": get_str(attrs, "container_registry_id"),
                "publicNetworkAccess": enabled_str(get_bool(attrs, "public_network_access_enabled").unwrap_or(true)),
                "imageBuildCompute": get_str(attrs, "image_build_compute_name"),
                "description": get_str(attrs, "description"),
                "friendlyName": get_str(attrs, "friendly_name"),
                "hbiWorkspace": get_bool(attrs, "high_business_impact"),
                "primaryUserAssignedIdentity": get_str(attrs, "primary_user_assigned_identity"),
                "v1LegacyMode": get_bool(attrs, "v1_legacy_mode_enabled").unwrap_or(false),
                "encryption": expand_encryption(attrs),
                "managedNetwork": expand_managed_network(attrs),
            }
        });

        if let Some(fs) = get_block(attrs, "feature_store") {
            body["properties"]["featureStoreSettings"] = json!({
                "computeRuntime": { "sparkRuntimeVersion": get_str(fs, "computer_spark_runtime_version") },
                "offlineStoreConnectionName": get_str(fs, "offline_connection_name"),
                "onlineStoreConnectionName": get_str(fs, "online_connection_name"),
            });
        }
        if let Some(sc) = get_block(attrs, "serverless_compute") {
            body["properties"]["serverlessComputeSettings"] = json!({
                "serverlessComputeCustomSubnet": get_str(sc, "subnet_id"),
                "serverlessComputeNoPublicIP": !get_bool(sc, "public_ip_enabled").unwrap_or(false),
            });
        }

        prune_nulls(&mut body);
        Ok(body)
    }

    fn flatten(
        &self,
        id: &str,
        body: &serde_json::Value,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Attributes> {
        let parsed = WorkspaceId::parse(id).map_err(|e| ProviderError::new(e.to_string()))?;
        let props = body.get("properties").cloned().unwrap_or_else(|| json!({}));

        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from(parsed.workspace_name));
        attrs.insert(
            "resource_group_name".to_string(),
            Value::from(parsed.resource_group_name),
        );
        if let Some(location) = body.get("location").and_then(|l| l.as_str()) {
            attrs.insert("location".to_string(), Value::from(normalize_location(location)));
        }
        set_str(&mut attrs, "kind", body.get("kind"));
        set_str(&mut attrs, "sku_name", body.pointer("/sku/name"));

        set_str(&mut attrs, "application_insights_id", props.get("applicationInsights"));
        set_str(&mut attrs, "key_vault_id", props.get("keyVault"));
        set_str(&mut attrs, "storage_account_id", props.get("storageAccount"));
        set_str(&mut attrs, "container_registry_id", props.get("containerRegistry"));
        attrs.insert(
            "public_network_access_enabled".to_string(),
            Value::Bool(is_enabled(props.get("publicNetworkAccess"))),
        );
        set_str(&mut attrs, "image_build_compute_name", props.get("imageBuildCompute"));
        set_str(&mut attrs, "description", props.get("description"));
        set_str(&mut attrs, "friendly_name", props.get("friendlyName"));
        set_bool(&mut attrs, "high_business_impact", props.get("hbiWorkspace"));
        set_str(
            &mut attrs,
            "primary_user_assigned_identity",
            props.get("primaryUserAssignedIdentity"),
        );
        set_bool(&mut attrs, "v1_legacy_mode_enabled", props.get("v1LegacyMode"));
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
        if let Some(fs) = props.get("featureStoreSettings").filter(|v| v.is_object()) {
            let mut block = Attributes::new();
            set_str(
                &mut block,
                "computer_spark_runtime_version",
                fs.pointer("/computeRuntime/sparkRuntimeVersion"),
            );
            set_str(&mut block, "offline_connection_name", fs.get("offlineStoreConnectionName"));
            set_str(&mut block, "online_connection_name", fs.get("onlineStoreConnectionName"));
            attrs.insert("feature_store".to_string(), Value::block(block));
        }
        if let Some(sc) = props.get("serverlessComputeSettings").filter(|v| v.is_object()) {
            let mut block = Attributes::new();
            set_str(&mut block, "subnet_id", sc.get("serverlessComputeCustomSubnet"));
            let no_public_ip = sc
                .get("serverlessComputeNoPublicIP")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            block.insert("public_ip_enabled".to_string(), Value::Bool(!no_public_ip));
            attrs.insert("serverless_compute".to_string(), Value::block(block));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;
    use std::collections::HashMap;

    const ID: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/ws";

    fn ctx() -> ProviderContext {
        ProviderContext {
            subscription_id: "sub".to_string(),
            features: Features::default(),
            storage_endpoint_suffix: "core.windows.net".to_string(),
        }
    }

    fn attrs() -> Attributes {
        let mut identity = HashMap::new();
        identity.insert("type".to_string(), Value::from("SystemAssigned"));

        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from("ws"));
        attrs.insert("location".to_string(), Value::from("westeurope"));
        attrs.insert("resource_group_name".to_string(), Value::from("rg"));
        attrs.insert("application_insights_id".to_string(), Value::from("/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Insights/components/ai"));
        attrs.insert("key_vault_id".to_string(), Value::from("/subscriptions/sub/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv"));
        attrs.insert("storage_account_id".to_string(), Value::from("/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/sa"));
        attrs.insert("identity".to_string(), Value::block(identity));
        attrs
    }

    #[test]
    fn schema_accepts_minimal_workspace() {
        let schema = WorkspaceHandler.schema();
        assert!(schema.validate(&attrs()).is_ok());

        let mut bad = attrs();
        bad.insert("name".to_string(), Value::from("-ws"));
        bad.insert("discovery_url".to_string(), Value::from("x"));
        let errors = schema.validate(&bad).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn expand_builds_request_body() {
        let body = WorkspaceHandler.expand(&attrs(), &ctx()).unwrap();
        assert_eq!(body["kind"], "Default");
        assert_eq!(body["sku"]["name"], "Basic");
        assert_eq!(body["identity"]["type"], "SystemAssigned");
        assert_eq!(body["properties"]["publicNetworkAccess"], "Enabled");
        assert!(body["properties"].get("containerRegistry").is_none());
        assert_eq!(WorkspaceHandler.resource_id(&attrs(), &ctx()).unwrap(), ID);
    }

    #[test]
    fn flatten_reads_response() {
        let body = json!({
            "id": ID,
            "location": "West Europe",
            "kind": "Default",
            "sku": { "name": "Basic", "tier": "Basic" },
            "identity": { "type": "SystemAssigned", "principalId": "p", "tenantId": "t" },
            "tags": { "env": "dev" },
            "properties": {
                "applicationInsights": "ai",
                "keyVault": "kv",
                "storageAccount": "sa",
                "publicNetworkAccess": "Disabled",
                "v1LegacyMode": false,
                "discoveryUrl": "https://westeurope.api.azureml.ms/discovery",
                "workspaceId": "0000"
            }
        });
        let attrs = WorkspaceHandler.flatten(ID, &body, &ctx()).unwrap();
        assert_eq!(attrs["name"], Value::from("ws"));
        assert_eq!(attrs["location"], Value::from("westeurope"));
        assert_eq!(attrs["public_network_access_enabled"], Value::Bool(false));
        assert_eq!(attrs["workspace_id"], Value::from("0000"));
        assert!(attrs.contains_key("identity"));
        assert!(!attrs.contains_key("encryption"));
    }

    #[test]
    fn update_patches_changed_fields_only() {
        let mut desired = attrs();
        desired.insert("description".to_string(), Value::from("new"));
        let request = WorkspaceHandler
            .update(&desired, &["description".to_string()], &ctx())
            .unwrap();
        assert_eq!(
            request,
            UpdateRequest::Patch(json!({ "properties": { "description": "new" } }))
        );
    }

    #[test]
    fn update_sends_null_for_removed_description() {
        let request = WorkspaceHandler
            .update(&attrs(), &["description".to_string()], &ctx())
            .unwrap();
        assert_eq!(
            request,
            UpdateRequest::Patch(json!({ "properties": { "description": null } }))
        );
    }

    #[test]
    fn feature_store_requires_kind() {
        let mut fs = attrs();
        fs.insert("feature_store".to_string(), Value::block(HashMap::new()));
        assert!(WorkspaceHandler.validate(&fs).is_err());

        fs.insert("kind".to_string(), Value::from("FeatureStore"));
        assert!(WorkspaceHandler.validate(&fs).is_ok());
    }

    #[test]
    fn purge_on_destroy_adds_query() {
        let mut c = ctx();
        assert!(WorkspaceHandler.delete_query(&c).is_empty());
        c.features
            .machine_learning
            .purge_soft_deleted_workspace_on_destroy = true;
        assert_eq!(WorkspaceHandler.delete_query(&c), vec![("forceToPurge", "true")]);
    }
}
