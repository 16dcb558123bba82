//! Azure Machine Learning provider implementation
//!
//! Dispatches each operation to the handler of the resource type and drives
//! the ARM calls: existence checks before create, long-running operations,
//! and polling until reads reflect a write.

use std::time::Duration;

use azml_core::config::collect_references;
use azml_core::differ::find_changed_attributes;
use azml_core::provider::{ProviderError, ProviderErrorKind, ProviderResult};
use azml_core::resource::{Resource, ResourceId, State};
use log::{debug, info};

use crate::arm::{ArmClient, ArmError};
use crate::config::{ConfigError, ProviderConfig, Timeouts};
use crate::poll::{PollError, StateChangeConf};
use crate::resources::{self, ProviderContext, ResourceHandler, UpdateRequest};
use crate::utils::Attributes;

const CONVERGED: &str = "Converged";
const PENDING: &str = "Pending";

/// Azure Machine Learning provider
pub struct AzureMlProvider {
    client: ArmClient,
    ctx: ProviderContext,
    timeouts: Timeouts,
}

impl AzureMlProvider {
    pub fn new(client: ArmClient, ctx: ProviderContext, timeouts: Timeouts) -> Self {
        Self {
            client,
            ctx,
            timeouts,
        }
    }

    /// Build the provider from the `provider` block (with environment fallbacks applied)
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let client = ArmClient::new(config.endpoint(), config.credential()?)
            .with_poll_interval(config.poll_interval());
        let ctx = ProviderContext {
            subscription_id: config.subscription_id()?.to_string(),
            features: config.features.clone(),
            storage_endpoint_suffix: config.storage_endpoint_suffix().to_string(),
        };
        Ok(Self::new(client, ctx, config.timeouts()))
    }

    fn handler_for(id: &ResourceId) -> ProviderResult<&'static dyn ResourceHandler> {
        resources::handler(&id.resource_type).ok_or_else(|| {
            ProviderError::validation(format!("Unknown resource type: {}", id.resource_type))
                .for_resource(id.clone())
        })
    }

    /// GET bounded by the read timeout
    async fn fetch(
        &self,
        handler: &dyn ResourceHandler,
        arm_id: &str,
    ) -> Result<Option<serde_json::Value>, ArmError> {
        let timeout = self.timeouts.read;
        match tokio::time::timeout(timeout, self.client.get(arm_id, handler.api_version())).await {
            Ok(result) => result,
            Err(_) => Err(ArmError::Timeout(timeout, format!("reading {}", arm_id))),
        }
    }

    fn state_from(
        &self,
        handler: &dyn ResourceHandler,
        id: &ResourceId,
        arm_id: &str,
        body: &serde_json::Value,
    ) -> ProviderResult<State> {
        let attributes = handler
            .flatten(arm_id, body, &self.ctx)
            .map_err(|e| e.for_resource(id.clone()))?;
        Ok(State::existing(id.clone(), attributes).with_identifier(arm_id))
    }

    /// Check the desired attributes against the schema and the handler's own rules
    pub fn validate_resource(&self, resource: &Resource) -> ProviderResult<()> {
        let handler = Self::handler_for(&resource.id)?;
        handler
            .schema()
            .validate(&resource.attributes)
            .map_err(|errors| {
                let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                ProviderError::validation(messages.join("; ")).for_resource(resource.id.clone())
            })?;
        handler
            .validate(&resource.attributes)
            .map_err(|e| e.for_resource(resource.id.clone()))
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Read a resource by its ARM ID; without one there is nothing to look up
    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let handler = Self::handler_for(id)?;
        let Some(arm_id) = identifier else {
            return Ok(State::not_found(id.clone()));
        };

        debug!("Reading {} ({})", id, arm_id);
        match self
            .fetch(handler, arm_id)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?
        {
            Some(body) => self.state_from(handler, id, arm_id, &body),
            None => {
                debug!("{} no longer exists", arm_id);
                Ok(State::not_found(id.clone()))
            }
        }
    }

    /// Create a resource
    ///
    /// Fails with `AlreadyExists` when the ARM ID is already taken by an
    /// object the state does not track.
    pub async fn create_resource(&self, resource: Resource) -> ProviderResult<State> {
        let id = resource.id.clone();
        let handler = Self::handler_for(&id)?;
        let schema = handler.schema();

        let mut attrs = resource.attributes.clone();
        schema.apply_defaults(&mut attrs);
        self.validate_resource(&Resource {
            id: id.clone(),
            attributes: attrs.clone(),
        })?;

        let arm_id = handler
            .resource_id(&attrs, &self.ctx)
            .map_err(|e| e.for_resource(id.clone()))?;
        let in_context = |e: ArmError| ProviderError::from(e).for_resource(id.clone());

        if self.fetch(handler, &arm_id).await.map_err(in_context)?.is_some() {
            return Err(
                ProviderError::already_exists(&arm_id, handler.resource_type())
                    .for_resource(id.clone()),
            );
        }

        let body = handler
            .expand(&attrs, &self.ctx)
            .map_err(|e| e.for_resource(id.clone()))?;
        info!("Creating {} ({})", id, arm_id);
        let created = self
            .client
            .put(&arm_id, handler.api_version(), &body, self.timeouts.create)
            .await
            .map_err(in_context)?;

        let created = self
            .wait_for_convergence(handler, &arm_id, &attrs, created, self.timeouts.create)
            .await
            .map_err(|e| e.for_resource(id.clone()))?;

        let mut state = self.state_from(handler, &id, &arm_id, &created)?;
        state.preserve_from(&attrs, &schema.write_only_attributes());
        Ok(state)
    }

    /// Update a resource in place with the attributes that differ from `from`
    pub async fn update_resource(
        &self,
        id: ResourceId,
        arm_id: &str,
        from: &State,
        to: Resource,
    ) -> ProviderResult<State> {
        let handler = Self::handler_for(&id)?;
        let schema = handler.schema();

        let mut attrs = to.attributes.clone();
        schema.apply_defaults(&mut attrs);
        self.validate_resource(&Resource {
            id: id.clone(),
            attributes: attrs.clone(),
        })?;

        let changed = find_changed_attributes(&attrs, &from.attributes, Some(&schema));
        let in_context = |e: ArmError| ProviderError::from(e).for_resource(id.clone());

        let updated = if changed.is_empty() {
            debug!("{} has no changes to send", id);
            self.fetch(handler, arm_id).await.map_err(in_context)?.ok_or_else(|| {
                ProviderError::new(format!("{} disappeared during update", arm_id))
                    .with_kind(ProviderErrorKind::NotFound)
                    .for_resource(id.clone())
            })?
        } else {
            info!("Updating {} ({}): {}", id, arm_id, changed.join(", "));
            let request = handler
                .update(&attrs, &changed, &self.ctx)
                .map_err(|e| e.for_resource(id.clone()))?;
            let api = handler.api_version();
            let timeout = self.timeouts.update;
            match request {
                UpdateRequest::Patch(body) => self.client.patch(arm_id, api, &body, timeout).await,
                UpdateRequest::Put(body) => self.client.put(arm_id, api, &body, timeout).await,
            }
            .map_err(in_context)?
        };

        let updated = self
            .wait_for_convergence(handler, arm_id, &attrs, updated, self.timeouts.update)
            .await
            .map_err(|e| e.for_resource(id.clone()))?;

        let mut state = self.state_from(handler, &id, arm_id, &updated)?;
        state.preserve_from(&attrs, &schema.write_only_attributes());
        Ok(state)
    }

    /// Delete a resource; one that is already gone counts as deleted
    pub async fn delete_resource(&self, id: &ResourceId, arm_id: &str) -> ProviderResult<()> {
        let handler = Self::handler_for(id)?;
        let query = handler.delete_query(&self.ctx);
        info!("Deleting {} ({})", id, arm_id);
        self.client
            .delete(arm_id, handler.api_version(), &query, self.timeouts.delete)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))
    }

    /// Read an existing object so it can be brought under management
    ///
    /// ARM never returns write-only attributes, so their values are taken
    /// from `configured` when they hold no unresolved references.
    pub async fn import_resource(
        &self,
        id: &ResourceId,
        arm_id: &str,
        configured: &Attributes,
    ) -> ProviderResult<State> {
        let handler = Self::handler_for(id)?;
        handler.validate_id(arm_id).map_err(|e| {
            ProviderError::validation(e.to_string())
                .with_cause(e)
                .for_resource(id.clone())
        })?;

        let mut state = self.read_resource(id, Some(arm_id)).await?;
        if !state.exists {
            return Err(ProviderError::new(format!(
                "Cannot import non-existent remote object {:?}",
                arm_id
            ))
            .with_kind(ProviderErrorKind::NotFound)
            .for_resource(id.clone()));
        }

        let known: Attributes = configured
            .iter()
            .filter(|(_, v)| {
                let mut refs = Vec::new();
                collect_references(v, &mut refs);
                refs.is_empty()
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        state.preserve_from(&known, &handler.schema().write_only_attributes());
        Ok(state)
    }

    /// Poll until a read reflects the write of `attrs`
    ///
    /// ARM may report a finished operation while reads still return the old
    /// values (tags on workspaces, replica regions on registries).
    async fn wait_for_convergence(
        &self,
        handler: &'static dyn ResourceHandler,
        arm_id: &str,
        attrs: &Attributes,
        body: serde_json::Value,
        timeout: Duration,
    ) -> ProviderResult<serde_json::Value> {
        if handler.converged(attrs, &body) != Some(false) {
            return Ok(body);
        }

        debug!("Waiting for {} to converge", arm_id);
        let client = &self.client;
        let conf = StateChangeConf::new(&[PENDING], &[CONVERGED], timeout)
            .with_delay(client.poll_interval())
            .with_poll_interval(client.poll_interval())
            .with_continuous_target_occurence(2);

        conf.wait_for_state(move || async move {
            let body = client.get(arm_id, handler.api_version()).await?;
            Ok::<_, ArmError>(match body {
                Some(body) => {
                    let state = if handler.converged(attrs, &body) == Some(true) {
                        CONVERGED
                    } else {
                        PENDING
                    };
                    (Some(body), state.to_string())
                }
                None => (None, String::new()),
            })
        })
        .await
        .map_err(|e| match e {
            PollError::Refresh(arm) => ProviderError::from(arm),
            PollError::Timeout { .. } => {
                ProviderError::new(format!("waiting for {} to converge", arm_id))
                    .with_kind(ProviderErrorKind::Timeout)
                    .with_cause(e)
            }
            other => ProviderError::new(format!("waiting for {} to converge", arm_id))
                .with_cause(other),
        })
    }
}
