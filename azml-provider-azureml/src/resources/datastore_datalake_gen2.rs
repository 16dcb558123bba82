//! machine_learning_datastore_datalake_gen2

use azml_core::provider::{ProviderError, ProviderResult};
use azml_core::schema::{AttributeSchema, AttributeType, Constraint, ResourceSchema, types};
use serde_json::json;

use super::common::{
    arm_id_type, datastore_id, datastore_schema, expand_datastore, flatten_datastore,
};
use super::{ProviderContext, ResourceHandler};
use crate::arm::IdParseError;
use crate::arm::id::{DatastoreId, StorageContainerId};
use crate::utils::{Attributes, get_str, require_str, set_str};

pub struct DatastoreDataLakeGen2Handler;

/// Service principal credentials when `client_id` is set, otherwise identity-based access
fn credentials(attrs: &Attributes) -> serde_json::Value {
    match get_str(attrs, "client_id") {
        Some(client_id) => json!({
            "credentialsType": "ServicePrincipal",
            "authorityUrl": get_str(attrs, "authority_url"),
            "tenantId": get_str(attrs, "tenant_id"),
            "clientId": client_id,
            "secrets": {
                "secretsType": "ServicePrincipal",
                "clientSecret": get_str(attrs, "client_secret"),
            }
        }),
        None => json!({ "credentialsType": "None" }),
    }
}

impl ResourceHandler for DatastoreDataLakeGen2Handler {
    fn resource_type(&self) -> &'static str {
        "machine_learning_datastore_datalake_gen2"
    }

    fn schema(&self) -> ResourceSchema {
        datastore_schema(self.resource_type(), "Data Lake Storage Gen2 datastore")
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
            .attribute(AttributeSchema::new("tenant_id", types::uuid()))
            .attribute(AttributeSchema::new("client_id", types::uuid()))
            .attribute(AttributeSchema::new("client_secret", AttributeType::String).sensitive())
            .attribute(AttributeSchema::new("authority_url", AttributeType::String))
            .constraint(Constraint::RequiredWith(
                "client_id".to_string(),
                vec!["tenant_id".to_string(), "client_secret".to_string()],
            ))
            .constraint(Constraint::RequiredWith(
                "client_secret".to_string(),
                vec!["client_id".to_string()],
            ))
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
        let container = StorageContainerId::parse(require_str(attrs, "storage_container_id")?)
            .map_err(|e| ProviderError::validation(e.to_string()).with_cause(e))?;
        Ok(expand_datastore(
            attrs,
            "AzureDataLakeGen2",
            json!({
                "accountName": container.storage_account_name,
                "filesystem": container.container_name,
                "endpoint": ctx.storage_endpoint_suffix,
                "protocol": "https",
            }),
            credentials(attrs),
        ))
    }

    fn flatten(
        &self,
        id: &str,
        body: &serde_json::Value,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Attributes> {
        let mut attrs = flatten_datastore(id, body)?;
        if let Some(creds) = body.pointer("/properties/credentials")
            && creds.get("credentialsType").and_then(|t| t.as_str()) == Some("ServicePrincipal")
        {
            set_str(&mut attrs, "tenant_id", creds.get("tenantId"));
            set_str(&mut attrs, "client_id", creds.get("clientId"));
            set_str(&mut attrs, "authority_url", creds.get("authorityUrl"));
        }
        Ok(attrs)
    }
}
