//! machine_learning_datastore_blobstorage

use azml_core::provider::{ProviderError, ProviderResult};
use azml_core::schema::{AttributeSchema, AttributeType, Constraint, ResourceSchema};
use serde_json::json;

use super::common::{
    arm_id_type, datastore_id, datastore_schema, expand_datastore, flatten_datastore,
    storage_credentials,
};
use super::{ProviderContext, ResourceHandler};
use crate::arm::IdParseError;
use crate::arm::id::{DatastoreId, StorageContainerId};
use crate::utils::{Attributes, require_str};

pub struct DatastoreBlobStorageHandler;

fn container_id(attrs: &Attributes) -> ProviderResult<StorageContainerId> {
    let raw = require_str(attrs, "storage_container_id")?;
    StorageContainerId::parse(raw)
        .map_err(|e| ProviderError::validation(e.to_string()).with_cause(e))
}

impl ResourceHandler for DatastoreBlobStorageHandler {
    fn resource_type(&self) -> &'static str {
        "machine_learning_datastore_blobstorage"
    }

    fn schema(&self) -> ResourceSchema {
        datastore_schema(self.resource_type(), "Blob container datastore")
            .attribute(
                AttributeSchema::new(
                    "storage_container_id",
                    arm_id_type("StorageContainerId", |s| {
                        StorageContainerId::parse(s).map(|_| ())
                    }),
                )
                .required()
                .force_new()
                .write_only(),
            )
            .attribute(AttributeSchema::new("account_key", AttributeType::String).sensitive())
            .attribute(
                AttributeSchema::new("shared_access_signature", AttributeType::String).sensitive(),
            )
            .constraint(Constraint::ExactlyOneOf(vec![
                "account_key".to_string(),
                "shared_access_signature".to_string(),
            ]))
    }

    fn resource_id(&self, attrs: &Attributes, _ctx: &ProviderContext) -> ProviderResult<String> {
        Ok(datastore_id(attrs)?.to_string())
    }

    fn validate_id(&self, id: &str) -> Result<(), IdParseError> {
        DatastoreId::parse(id).map(|_| ())
    }

    fn expand(
        &self,
        attrs: &Attributes,
        ctx: &ProviderContext,
    ) -> ProviderResult<serde_json::Value> {
        let container = container_id(attrs)?;
        Ok(expand_datastore(
            attrs,
            "AzureBlob",
            json!({
                "accountName": container.storage_account_name,
                "containerName": container.container_name,
                "endpoint": ctx.storage_endpoint_suffix,
                "protocol": "https",
            }),
            storage_credentials(attrs),
        ))
    }

    fn flatten(
        &self,
        id: &str,
        body: &serde_json::Value,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Attributes> {
        // The response names the account but not its resource group, so
        // `storage_container_id` is kept from state
        flatten_datastore(id, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;
    use azml_core::resource::Value;

    const WS: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/ws";
    const CONTAINER: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/sa/blobServices/default/containers/data";

    fn ctx() -> ProviderContext {
        ProviderContext {
            subscription_id: "sub".to_string(),
            features: Features::default(),
            storage_endpoint_suffix: "core.windows.net".to_string(),
        }
    }

    fn attrs() -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from("blob_ds"));
        attrs.insert("workspace_id".to_string(), Value::from(WS));
        attrs.insert("storage_container_id".to_string(), Value::from(CONTAINER));
        attrs.insert("account_key".to_string(), Value::from("c2VjcmV0"));
        attrs
    }

    #[test]
    fn exactly_one_credential() {
        let schema = DatastoreBlobStorageHandler.schema();
        assert!(schema.validate(&attrs()).is_ok());

        let mut both = attrs();
        both.insert("shared_access_signature".to_string(), Value::from("sv=1"));
        assert!(schema.validate(&both).is_err());

        let mut neither = attrs();
        neither.remove("account_key");
        assert!(schema.validate(&neither).is_err());
    }

    #[test]
    fn secrets_are_kept_from_state() {
        let mut write_only = DatastoreBlobStorageHandler.schema().write_only_attributes();
        write_only.sort();
        assert_eq!(
            write_only,
            vec!["account_key", "shared_access_signature", "storage_container_id"]
        );
    }

    #[test]
    fn expand_uses_container_and_key() {
        let body = DatastoreBlobStorageHandler.expand(&attrs(), &ctx()).unwrap();
        let props = &body["properties"];
        assert_eq!(props["datastoreType"], "AzureBlob");
        assert_eq!(props["accountName"], "sa");
        assert_eq!(props["containerName"], "data");
        assert_eq!(props["endpoint"], "core.windows.net");
        assert_eq!(props["credentials"]["credentialsType"], "AccountKey");
        assert_eq!(props["credentials"]["secrets"]["key"], "c2VjcmV0");
        assert_eq!(props["serviceDataAccessAuthIdentity"], "None");
        assert!(props.get("description").is_none());
    }

    #[test]
    fn sas_token_credentials() {
        let mut attrs = attrs();
        attrs.remove("account_key");
        attrs.insert("shared_access_signature".to_string(), Value::from("sv=1"));
        let body = DatastoreBlobStorageHandler.expand(&attrs, &ctx()).unwrap();
        assert_eq!(
            body["properties"]["credentials"],
            json!({ "credentialsType": "Sas", "secrets": { "secretsType": "Sas", "sasToken": "sv=1" } })
        );
    }

    #[test]
    fn flatten_reads_common_fields() {
        let id = format!("{}/datastores/blob_ds", WS);
        let body = json!({
            "properties": {
                "datastoreType": "AzureBlob",
                "accountName": "sa",
                "containerName": "data",
                "isDefault": false,
                "serviceDataAccessAuthIdentity": "None",
                "credentials": { "credentialsType": "AccountKey" },
                "tags": {}
            }
        });
        let flat = DatastoreBlobStorageHandler.flatten(&id, &body, &ctx()).unwrap();
        assert_eq!(flat["name"], Value::from("blob_ds"));
        assert_eq!(flat["workspace_id"], Value::from(WS));
        assert_eq!(flat["is_default"], Value::Bool(false));
        assert!(!flat.contains_key("account_key"));
    }
}
