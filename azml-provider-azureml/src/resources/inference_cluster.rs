//! machine_learning_inference_cluster
//!
//! Attaches an existing AKS cluster to a workspace. Destroy detaches it and
//! leaves the AKS cluster running.

use azml_core::provider::{ProviderError, ProviderResult};
use azml_core::resource::Value;
use azml_core::schema::{AttributeSchema, AttributeType, BlockSchema, ResourceSchema, types};
use serde_json::json;

use super::common::{arm_id_type, location_attr, name_attr, tags_attr, workspace_ref_attr};
use super::compute_cluster::{compute_id, compute_name_type, flatten_compute_common};
use super::{ProviderContext, ResourceHandler};
use crate::arm::IdParseError;
use crate::arm::id::{ComputeId, KubernetesClusterId};
use crate::identity::{IdentityFlavour, expand_identity, identity_schema};
use crate::utils::{
    Attributes, expand_tags, get_block, get_bool, get_str, prune_nulls, require_str, set_str,
};

pub const CLUSTER_PURPOSES: [&str; 3] = ["DevTest", "FastProd", "DenseProd"];

/// Node count AKS must provide for a cluster purpose
pub fn agent_count(purpose: &str) -> i64 {
    match purpose {
        "DevTest" => 1,
        _ => 3,
    }
}

pub struct InferenceClusterHandler;

fn ssl_schema() -> AttributeSchema {
    AttributeSchema::new(
        "ssl",
        AttributeType::Block(
            BlockSchema::single()
                .attribute(AttributeSchema::new("cert", AttributeType::String).sensitive())
                .attribute(AttributeSchema::new("key", AttributeType::String).sensitive())
                .attribute(AttributeSchema::new("cname", AttributeType::String))
                .attribute(AttributeSchema::new("leaf_domain_label", AttributeType::String))
                .attribute(
                    AttributeSchema::new("overwrite_existing_domain", AttributeType::Bool)
                        .with_default(false),
                ),
        ),
    )
    .force_new()
    .write_only()
}

/// `Auto` lets Microsoft issue a certificate for the leaf domain label
fn ssl_json(attrs: &Attributes) -> serde_json::Value {
    let Some(ssl) = get_block(attrs, "ssl") else {
        return json!({ "status": "Disabled" });
    };
    let status = if get_str(ssl, "leaf_domain_label").is_some() {
        "Auto"
    } else {
        "Enabled"
    };
    json!({
        "status": status,
        "cert": get_str(ssl, "cert"),
        "key": get_str(ssl, "key"),
        "cname": get_str(ssl, "cname"),
        "leafDomainLabel": get_str(ssl, "leaf_domain_label"),
        "overwriteExistingDomain": get_bool(ssl, "overwrite_existing_domain").unwrap_or(false),
    })
}

impl ResourceHandler for InferenceClusterHandler {
    fn resource_type(&self) -> &'static str {
        "machine_learning_inference_cluster"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.resource_type())
            .with_description("AKS cluster attached to an Azure Machine Learning workspace")
            .attribute(name_attr(compute_name_type()))
            .attribute(workspace_ref_attr("machine_learning_workspace_id"))
            .attribute(location_attr())
            .attribute(
                AttributeSchema::new(
                    "kubernetes_cluster_id",
                    arm_id_type("KubernetesClusterId", |s| {
                        KubernetesClusterId::parse(s).map(|_| ())
                    }),
                )
                .required()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "cluster_purpose",
                    AttributeType::Enum(CLUSTER_PURPOSES.iter().map(|s| s.to_string()).collect()),
                )
                .with_default("FastProd")
                .force_new(),
            )
            .attribute(AttributeSchema::new("description", AttributeType::String).force_new())
            .attribute(ssl_schema())
            .attribute(identity_schema(false).force_new())
            .attribute(tags_attr().force_new())
            .attribute(
                AttributeSchema::new("agent_count", types::positive_int()).computed(),
            )
    }

    fn resource_id(&self, attrs: &Attributes, _ctx: &ProviderContext) -> ProviderResult<String> {
        Ok(compute_id(attrs)?.to_string())
    }

    fn validate_id(&self, id: &str) -> Result<(), IdParseError> {
        ComputeId::parse(id).map(|_| ())
    }

    fn validate(&self, attrs: &Attributes) -> ProviderResult<()> {
        if let Some(ssl) = get_block(attrs, "ssl")
            && get_str(ssl, "leaf_domain_label").is_none()
            && (get_str(ssl, "cert").is_none() || get_str(ssl, "key").is_none())
        {
            return Err(ProviderError::validation(
                "`ssl` needs either `leaf_domain_label` or both `cert` and `key`",
            ));
        }
        Ok(())
    }

    fn expand(
        &self,
        attrs: &Attributes,
        _ctx: &ProviderContext,
    ) -> ProviderResult<serde_json::Value> {
        let purpose = get_str(attrs, "cluster_purpose").unwrap_or("FastProd");
        let mut body = json!({
            "location": require_str(attrs, "location")?,
            "identity": expand_identity(get_block(attrs, "identity"), IdentityFlavour::Compact)?,
            "tags": expand_tags(attrs),
            "properties": {
                "computeType": "AKS",
                "resourceId": require_str(attrs, "kubernetes_cluster_id")?,
                "description": get_str(attrs, "description"),
                "properties": {
                    "clusterPurpose": purpose,
                    "agentCount": agent_count(purpose),
                    "sslConfiguration": ssl_json(attrs),
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
        attrs.remove("local_auth_enabled");
        set_str(
            &mut attrs,
            "kubernetes_cluster_id",
            body.pointer("/properties/resourceId"),
        );
        let props = body
            .pointer("/properties/properties")
            .cloned()
            .unwrap_or_else(|| json!({}));
        set_str(&mut attrs, "cluster_purpose", props.get("clusterPurpose"));
        if let Some(count) = props.get("agentCount").and_then(|v| v.as_i64()) {
            attrs.insert("agent_count".to_string(), Value::Int(count));
        }
        // ARM never returns the certificate or key, so `ssl` is kept from state
        Ok(attrs)
    }

    fn delete_query(&self, _ctx: &ProviderContext) -> Vec<(&'static str, &'static str)> {
        vec![("underlyingResourceAction", "Detach")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;

    const WS: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/ws";
    const AKS: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/aks";

    fn ctx() -> ProviderContext {
        ProviderContext {
            subscription_id: "sub".to_string(),
            features: Features::default(),
            storage_endpoint_suffix: "core.windows.net".to_string(),
        }
    }

    fn attrs() -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from("aks-inf"));
        attrs.insert("machine_learning_workspace_id".to_string(), Value::from(WS));
        attrs.insert("location".to_string(), Value::from("westeurope"));
        attrs.insert("kubernetes_cluster_id".to_string(), Value::from(AKS));
        attrs
    }

    #[test]
    fn cluster_purpose_sets_agent_count() {
        assert_eq!(agent_count("DevTest"), 1);
        assert_eq!(agent_count("FastProd"), 3);
        assert_eq!(agent_count("DenseProd"), 3);

        let body = InferenceClusterHandler.expand(&attrs(), &ctx()).unwrap();
        let inner = &body["properties"]["properties"];
        assert_eq!(inner["clusterPurpose"], "FastProd");
        assert_eq!(inner["agentCount"], 3);
        assert_eq!(inner["sslConfiguration"], json!({ "status": "Disabled" }));
        assert_eq!(body["properties"]["resourceId"], AKS);
    }

    #[test]
    fn ssl_status_follows_block() {
        let mut ssl = Attributes::new();
        ssl.insert("leaf_domain_label".to_string(), Value::from("contoso"));
        let mut with_label = attrs();
        with_label.insert("ssl".to_string(), Value::block(ssl));
        assert!(InferenceClusterHandler.validate(&with_label).is_ok());
        assert_eq!(ssl_json(&with_label)["status"], "Auto");

        let mut ssl = Attributes::new();
        ssl.insert("cert".to_string(), Value::from("CERT"));
        ssl.insert("key".to_string(), Value::from("KEY"));
        ssl.insert("cname".to_string(), Value::from("www.contoso.com"));
        let mut with_cert = attrs();
        with_cert.insert("ssl".to_string(), Value::block(ssl));
        assert_eq!(ssl_json(&with_cert)["status"], "Enabled");

        let mut missing = attrs();
        let mut ssl = Attributes::new();
        ssl.insert("cert".to_string(), Value::from("CERT"));
        missing.insert("ssl".to_string(), Value::block(ssl));
        assert!(InferenceClusterHandler.validate(&missing).is_err());
    }

    #[test]
    fn schema_rejects_non_aks_cluster() {
        let schema = InferenceClusterHandler.schema();
        assert!(schema.validate(&attrs()).is_ok());
        let mut bad = attrs();
        bad.insert("kubernetes_cluster_id".to_string(), Value::from(WS));
        assert!(schema.validate(&bad).is_err());
        assert_eq!(schema.write_only_attributes(), vec!["ssl".to_string()]);
    }

    #[test]
    fn destroy_detaches() {
        assert_eq!(
            InferenceClusterHandler.delete_query(&ctx()),
            vec![("underlyingResourceAction", "Detach")]
        );
    }
}
