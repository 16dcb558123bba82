//! machine_learning_registry
//!
//! Registries replicate to extra regions asynchronously: the PUT returns
//! before every region is provisioned, so writes wait until the returned
//! region list matches the requested one.

use std::collections::BTreeSet;

use azml_core::provider::{ProviderError, ProviderResult};
use azml_core::resource::Value;
use azml_core::schema::{AttributeSchema, AttributeType, ResourceSchema, normalize_location, types};
use serde_json::json;

use super::common::{location_attr, name_attr, resource_group_attr, tags_attr};
use super::{ProviderContext, ResourceHandler};
use crate::arm::IdParseError;
use crate::arm::id::RegistryId;
use crate::identity::{IdentityFlavour, expand_identity, flatten_identity, identity_schema};
use crate::utils::{
    Attributes, enabled_str, expand_tags, flatten_tags, get_block, get_bool, get_str,
    get_strings, is_enabled, prune_nulls, require_str, set_str, tags_match,
};

pub struct RegistryHandler;

fn region_detail(location: &str) -> serde_json::Value {
    json!({
        "location": location,
        "acrDetails": [
            { "systemCreatedAcrAccount": { "acrAccountSku": "Premium" } }
        ],
        "storageAccountDetails": [
            {
                "systemCreatedStorageAccount": {
                    "storageAccountType": "Standard_LRS",
                    "storageAccountHnsEnabled": false
                }
            }
        ]
    })
}

/// Normalized locations the registry should be present in
fn wanted_regions(attrs: &Attributes) -> BTreeSet<String> {
    let mut regions: BTreeSet<String> = get_strings(attrs, "replication_regions")
        .iter()
        .map(|r| normalize_location(r))
        .collect();
    if let Some(location) = get_str(attrs, "location") {
        regions.insert(normalize_location(location));
    }
    regions
}

fn returned_regions(body: &serde_json::Value) -> BTreeSet<String> {
    body.pointer("/properties/regionDetails")
        .and_then(|r| r.as_array())
        .map(|regions| {
            regions
                .iter()
                .filter_map(|r| r.get("location").and_then(|l| l.as_str()))
                .map(normalize_location)
                .collect()
        })
        .unwrap_or_default()
}

impl ResourceHandler for RegistryHandler {
    fn resource_type(&self) -> &'static str {
        "machine_learning_registry"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.resource_type())
            .with_description("Azure Machine Learning registry")
            .attribute(name_attr(types::name_matching(
                "RegistryName",
                r"^[a-zA-Z0-9][a-zA-Z0-9_-]{2,32}$",
                "registry names are 3-33 characters of letters, digits, '-' and '_' and start with a letter or digit",
            )))
            .attribute(resource_group_attr())
            .attribute(location_attr())
            .attribute(identity_schema(true))
            .attribute(
                AttributeSchema::new("public_network_access_enabled", AttributeType::Bool)
                    .with_default(true),
            )
            .attribute(AttributeSchema::new(
                "replication_regions",
                AttributeType::Set(Box::new(types::location())),
            ))
            .attribute(tags_attr())
            .attribute(AttributeSchema::new("discovery_url", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("ml_flow_registry_uri", AttributeType::String).computed(),
            )
    }

    fn resource_id(&self, attrs: &Attributes, ctx: &ProviderContext) -> ProviderResult<String> {
        Ok(RegistryId::new(
            &ctx.subscription_id,
            require_str(attrs, "resource_group_name")?,
            require_str(attrs, "name")?,
        )
        .to_string())
    }

    fn validate_id(&self, id: &str) -> Result<(), IdParseError> {
        RegistryId::parse(id).map(|_| ())
    }

    fn validate(&self, attrs: &Attributes) -> ProviderResult<()> {
        if let Some(location) = get_str(attrs, "location") {
            let main = normalize_location(location);
            if get_strings(attrs, "replication_regions")
                .iter()
                .any(|r| normalize_location(r) == main)
            {
                return Err(ProviderError::validation(format!(
                    "`replication_regions` must not contain the main location {:?}",
                    location
                )));
            }
        }
        Ok(())
    }

    fn expand(
        &self,
        attrs: &Attributes,
        _ctx: &ProviderContext,
    ) -> ProviderResult<serde_json::Value> {
        let location = normalize_location(require_str(attrs, "location")?);
        // Main region first, replicas after in a stable order
        let mut regions = vec![region_detail(&location)];
        regions.extend(
            wanted_regions(attrs)
                .into_iter()
                .filter(|r| *r != location)
                .map(|r| region_detail(&r)),
        );

        let mut body = json!({
            "location": location,
            "identity": expand_identity(get_block(attrs, "identity"), IdentityFlavour::Spaced)?,
            "tags": expand_tags(attrs),
            "properties": {
                "publicNetworkAccess": enabled_str(get_bool(attrs, "public_network_access_enabled").unwrap_or(true)),
                "regionDetails": regions,
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
        let parsed = RegistryId::parse(id)
            .map_err(|e| ProviderError::new(e.to_string()).with_cause(e))?;
        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from(parsed.registry_name.as_str()));
        attrs.insert(
            "resource_group_name".to_string(),
            Value::from(parsed.resource_group_name.as_str()),
        );
        let location = body
            .get("location")
            .and_then(|l| l.as_str())
            .map(normalize_location);
        if let Some(location) = &location {
            attrs.insert("location".to_string(), Value::from(location.as_str()));
        }

        let replicas: Vec<Value> = returned_regions(body)
            .into_iter()
            .filter(|r| Some(r) != location.as_ref())
            .map(Value::String)
            .collect();
        attrs.insert("replication_regions".to_string(), Value::List(replicas));

        attrs.insert(
            "public_network_access_enabled".to_string(),
            Value::Bool(is_enabled(body.pointer("/properties/publicNetworkAccess"))),
        );
        set_str(&mut attrs, "discovery_url", body.pointer("/properties/discoveryUrl"));
        set_str(
            &mut attrs,
            "ml_flow_registry_uri",
            body.pointer("/properties/mlFlowRegistryUri"),
        );
        if let Some(identity) = flatten_identity(body.get("identity")) {
            attrs.insert("identity".to_string(), identity);
        }
        attrs.insert("tags".to_string(), flatten_tags(body.get("tags")));
        Ok(attrs)
    }

    fn converged(&self, attrs: &Attributes, body: &serde_json::Value) -> Option<bool> {
        Some(returned_regions(body) == wanted_regions(attrs) && tags_match(attrs, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;
    use std::collections::HashMap;

    const ID: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/registries/reg";

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
        attrs.insert("name".to_string(), Value::from("reg"));
        attrs.insert("resource_group_name".to_string(), Value::from("rg"));
        attrs.insert("location".to_string(), Value::from("West Europe"));
        attrs.insert("identity".to_string(), Value::block(identity));
        attrs.insert(
            "replication_regions".to_string(),
            Value::List(vec![Value::from("eastus"), Value::from("northeurope")]),
        );
        attrs
    }

    #[test]
    fn expand_lists_main_region_first() {
        let body = RegistryHandler.expand(&attrs(), &ctx()).unwrap();
        let locations: Vec<&str> = body["properties"]["regionDetails"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["location"].as_str().unwrap())
            .collect();
        assert_eq!(locations, vec!["westeurope", "eastus", "northeurope"]);
        assert_eq!(RegistryHandler.resource_id(&attrs(), &ctx()).unwrap(), ID);
    }

    #[test]
    fn converged_once_all_regions_exist() {
        let partial = json!({
            "properties": { "regionDetails": [ { "location": "westeurope" }, { "location": "eastus" } ] }
        });
        assert_eq!(RegistryHandler.converged(&attrs(), &partial), Some(false));

        let body = RegistryHandler.expand(&attrs(), &ctx()).unwrap();
        assert_eq!(RegistryHandler.converged(&attrs(), &body), Some(true));
    }

    #[test]
    fn flatten_separates_replicas() {
        let body = RegistryHandler.expand(&attrs(), &ctx()).unwrap();
        let flat = RegistryHandler.flatten(ID, &body, &ctx()).unwrap();
        assert_eq!(flat["location"], Value::from("westeurope"));
        assert_eq!(
            flat["replication_regions"],
            Value::List(vec![Value::from("eastus"), Value::from("northeurope")])
        );
        assert_eq!(flat["public_network_access_enabled"], Value::Bool(true));
    }

    #[test]
    fn main_location_cannot_be_replica() {
        let mut attrs = attrs();
        attrs.insert(
            "replication_regions".to_string(),
            Value::List(vec![Value::from("westeurope")]),
        );
        assert!(RegistryHandler.validate(&attrs).is_err());
    }
}
