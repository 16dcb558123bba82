//! machine_learning_datastore_fileshare

use azml_core::provider::{ProviderError, ProviderResult};
use azml_core::schema::{AttributeSchema, AttributeType, Constraint, ResourceSchema};
use serde_json::json;

use super::common::{
    arm_id_type, datastore_id, datastore_schema, expand_datastore, flatten_datastore,
    storage_credentials,
};
use super::{ProviderContext, ResourceHandler};
use crate::arm::IdParseError;
use crate::arm::id::{DatastoreId, StorageShareId};
use crate::utils::{Attributes, require_str};

pub struct DatastoreFileShareHandler;

impl ResourceHandler for DatastoreFileShareHandler {
    fn resource_type(&self) -> &'static str {
        "machine_learning_datastore_fileshare"
    }

    fn schema(&self) -> ResourceSchema {
        datastore_schema(self.resource_type(), "File share datastore")
            .attribute(
                AttributeSchema::new(
                    "storage_fileshare_id",
                    arm_id_type("StorageShareId", |s| StorageShareId::parse(s).map(|_| ())),
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
        let share = StorageShareId::parse(require_str(attrs, "storage_fileshare_id")?)
            .map_err(|e| ProviderError::validation(e.to_string()).with_cause(e))?;
        Ok(expand_datastore(
            attrs,
            "AzureFile",
            json!({
                "accountName": share.storage_account_name,
                "fileShareName": share.share_name,
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
        flatten_datastore(id, body)
    }
}
