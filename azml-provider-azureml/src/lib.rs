//! azml Azure Machine Learning Provider
//!
//! Manages Azure Machine Learning resources through Azure Resource Manager.
//!
//! ## Module Structure
//!
//! - `arm` - ARM HTTP client, authentication and resource IDs
//! - `config` - `provider` block settings with environment fallbacks
//! - `features` - Opt-in behaviour toggles
//! - `identity` - Managed identity blocks shared by several resources
//! - `poll` - Waiting for eventually consistent reads
//! - `provider` - AzureMlProvider implementation
//! - `resources` - One handler per resource type
//! - `utils` - Attribute and JSON helpers

pub mod arm;
pub mod config;
pub mod features;
pub mod identity;
pub mod poll;
pub mod provider;
pub mod resources;
pub mod utils;

// Re-export main types
pub use config::ProviderConfig;
pub use provider::AzureMlProvider;

use azml_core::provider::{BoxFuture, Provider, ProviderResult};
use azml_core::resource::{Resource, ResourceId, State};

use resources::resource_types;

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for AzureMlProvider {
    fn name(&self) -> &'static str {
        "azureml"
    }

    fn resource_types(&self) -> Vec<Box<dyn azml_core::provider::ResourceType>> {
        resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.update_resource(id, &identifier, &from, to).await })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_resource(&id, &identifier).await })
    }
}
