//! Resource handlers
//!
//! One handler per resource type. A handler owns the schema of its type and
//! the translation between flat attributes and the ARM request/response
//! bodies; the provider drives the HTTP calls.

use azml_core::provider::{ProviderResult, ResourceType};
use azml_core::schema::ResourceSchema;

use crate::arm::IdParseError;
use crate::features::Features;
use crate::utils::Attributes;

pub mod ai_foundry;
pub mod ai_foundry_project;
pub mod common;
pub mod compute_cluster;
pub mod compute_instance;
pub mod datastore_blobstorage;
pub mod datastore_datalake_gen2;
pub mod datastore_fileshare;
pub mod inference_cluster;
pub mod outbound_rule;
pub mod registry;
pub mod workspace;

/// API version of Microsoft.MachineLearningServices used by every handler
pub const API_VERSION: &str = "2024-04-01";

/// Provider-wide values handlers need to build requests
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub subscription_id: String,
    pub features: Features,
    pub storage_endpoint_suffix: String,
}

/// How an in-place update is sent
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateRequest {
    Patch(serde_json::Value),
    Put(serde_json::Value),
}

pub trait ResourceHandler: Send + Sync {
    /// Resource type name (e.g., "machine_learning_workspace")
    fn resource_type(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    fn api_version(&self) -> &'static str {
        API_VERSION
    }

    /// ARM ID of the resource the attributes describe
    fn resource_id(&self, attrs: &Attributes, ctx: &ProviderContext) -> ProviderResult<String>;

    /// Check that an imported ID belongs to this resource type
    fn validate_id(&self, id: &str) -> Result<(), IdParseError>;

    /// Cross-field checks the schema cannot express
    fn validate(&self, _attrs: &Attributes) -> ProviderResult<()> {
        Ok(())
    }

    /// Request body for create
    fn expand(&self, attrs: &Attributes, ctx: &ProviderContext)
    -> ProviderResult<serde_json::Value>;

    /// Flat attributes from a GET response
    fn flatten(
        &self,
        id: &str,
        body: &serde_json::Value,
        ctx: &ProviderContext,
    ) -> ProviderResult<Attributes>;

    /// Request for an in-place update; `changed` lists the attributes that differ
    fn update(
        &self,
        attrs: &Attributes,
        _changed: &[String],
        ctx: &ProviderContext,
    ) -> ProviderResult<UpdateRequest> {
        Ok(UpdateRequest::Put(self.expand(attrs, ctx)?))
    }

    /// Extra query parameters for DELETE
    fn delete_query(&self, _ctx: &ProviderContext) -> Vec<(&'static str, &'static str)> {
        Vec::new()
    }

    /// Whether a GET body reflects a completed write of `attrs`
    ///
    /// `None` means reads are consistent right after the write and there is
    /// nothing to wait for.
    fn converged(&self, _attrs: &Attributes, _body: &serde_json::Value) -> Option<bool> {
        None
    }
}

static WORKSPACE: workspace::WorkspaceHandler = workspace::WorkspaceHandler;
static COMPUTE_CLUSTER: compute_cluster::ComputeClusterHandler =
    compute_cluster::ComputeClusterHandler;
static COMPUTE_INSTANCE: compute_instance::ComputeInstanceHandler =
    compute_instance::ComputeInstanceHandler;
static INFERENCE_CLUSTER: inference_cluster::InferenceClusterHandler =
    inference_cluster::InferenceClusterHandler;
static DATASTORE_BLOBSTORAGE: datastore_blobstorage::DatastoreBlobStorageHandler =
    datastore_blobstorage::DatastoreBlobStorageHandler;
static DATASTORE_FILESHARE: datastore_fileshare::DatastoreFileShareHandler =
    datastore_fileshare::DatastoreFileShareHandler;
static DATASTORE_DATALAKE_GEN2: datastore_datalake_gen2::DatastoreDataLakeGen2Handler =
    datastore_datalake_gen2::DatastoreDataLakeGen2Handler;
static REGISTRY: registry::RegistryHandler = registry::RegistryHandler;
static OUTBOUND_RULE_FQDN: outbound_rule::OutboundRuleHandler =
    outbound_rule::OutboundRuleHandler::FQDN;
static OUTBOUND_RULE_PRIVATE_ENDPOINT: outbound_rule::OutboundRuleHandler =
    outbound_rule::OutboundRuleHandler::PRIVATE_ENDPOINT;
static OUTBOUND_RULE_SERVICE_TAG: outbound_rule::OutboundRuleHandler =
    outbound_rule::OutboundRuleHandler::SERVICE_TAG;
static AI_FOUNDRY: ai_foundry::AiFoundryHandler = ai_foundry::AiFoundryHandler;
static AI_FOUNDRY_PROJECT: ai_foundry_project::AiFoundryProjectHandler =
    ai_foundry_project::AiFoundryProjectHandler;

/// Returns all handlers supported by this provider
pub fn handlers() -> Vec<&'static dyn ResourceHandler> {
    vec![
        &WORKSPACE,
        &COMPUTE_CLUSTER,
        &COMPUTE_INSTANCE,
        &INFERENCE_CLUSTER,
        &DATASTORE_BLOBSTORAGE,
        &DATASTORE_FILESHARE,
        &DATASTORE_DATALAKE_GEN2,
        &REGISTRY,
        &OUTBOUND_RULE_FQDN,
        &OUTBOUND_RULE_PRIVATE_ENDPOINT,
        &OUTBOUND_RULE_SERVICE_TAG,
        &AI_FOUNDRY,
        &AI_FOUNDRY_PROJECT,
    ]
}

pub fn handler(resource_type: &str) -> Option<&'static dyn ResourceHandler> {
    handlers()
        .into_iter()
        .find(|h| h.resource_type() == resource_type)
}

/// Exposes a handler through the core `ResourceType` trait
pub struct HandlerType(&'static dyn ResourceHandler);

impl ResourceType for HandlerType {
    fn name(&self) -> &'static str {
        self.0.resource_type()
    }

    fn schema(&self) -> ResourceSchema {
        self.0.schema()
    }
}

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    handlers()
        .into_iter()
        .map(|h| Box::new(HandlerType(h)) as Box<dyn ResourceType>)
        .collect()
}
