//! Provider configuration
//!
//! Settings come from the `provider` block of the configuration file. Unset
//! values fall back to the usual `ARM_*` environment variables.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::arm::{
    ClientSecretCredential, DEFAULT_ENDPOINT, StaticTokenCredential, TokenCredential,
};
use crate::features::Features;

pub const DEFAULT_STORAGE_ENDPOINT_SUFFIX: &str = "core.windows.net";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid provider configuration: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("subscription_id is not set (provider block or ARM_SUBSCRIPTION_ID)")]
    MissingSubscription,

    #[error(
        "No credentials: set access_token (ARM_ACCESS_TOKEN) or tenant_id, client_id and client_secret (ARM_TENANT_ID, ARM_CLIENT_ID, ARM_CLIENT_SECRET)"
    )]
    MissingCredentials,
}

/// Per-operation timeouts in minutes
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub create: u64,
    pub read: u64,
    pub update: u64,
    pub delete: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            create: 30,
            read: 5,
            update: 30,
            delete: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl From<&TimeoutsConfig> for Timeouts {
    fn from(c: &TimeoutsConfig) -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        Self {
            create: minutes(c.create),
            read: minutes(c.read),
            update: minutes(c.update),
            delete: minutes(c.delete),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts::from(&TimeoutsConfig::default())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_token: Option<String>,
    pub resource_manager_endpoint: Option<String>,
    pub authority_host: Option<String>,
    pub storage_endpoint_suffix: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub timeouts: TimeoutsConfig,
    pub features: Features,
}

impl ProviderConfig {
    /// Parse the raw `provider` block; a missing block gives the defaults
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConfigError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Fill unset values from `lookup` (normally the process environment)
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |slot: &mut Option<String>, var: &str| {
            if slot.is_none() {
                *slot = lookup(var).filter(|v| !v.is_empty());
            }
        };
        fill(&mut self.subscription_id, "ARM_SUBSCRIPTION_ID");
        fill(&mut self.tenant_id, "ARM_TENANT_ID");
        fill(&mut self.client_id, "ARM_CLIENT_ID");
        fill(&mut self.client_secret, "ARM_CLIENT_SECRET");
        fill(&mut self.access_token, "ARM_ACCESS_TOKEN");
        fill(
            &mut self.resource_manager_endpoint,
            "ARM_RESOURCE_MANAGER_ENDPOINT",
        );
        self
    }

    pub fn with_process_env(self) -> Self {
        self.with_env(|var| std::env::var(var).ok())
    }

    pub fn subscription_id(&self) -> Result<&str, ConfigError> {
        self.subscription_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSubscription)
    }

    pub fn endpoint(&self) -> &str {
        self.resource_manager_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
    }

    pub fn storage_endpoint_suffix(&self) -> &str {
        self.storage_endpoint_suffix
            .as_deref()
            .unwrap_or(DEFAULT_STORAGE_ENDPOINT_SUFFIX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.unwrap_or(10))
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts::from(&self.timeouts)
    }

    /// Pick a credential: a static token wins over a service principal
    pub fn credential(&self) -> Result<Arc<dyn TokenCredential>, ConfigError> {
        if let Some(token) = &self.access_token {
            return Ok(Arc::new(StaticTokenCredential::new(token.clone())));
        }
        match (&self.tenant_id, &self.client_id, &self.client_secret) {
            (Some(tenant), Some(client), Some(secret)) => {
                let mut credential =
                    ClientSecretCredential::new(tenant, client, secret, self.endpoint());
                if let Some(host) = &self.authority_host {
                    credential = credential.with_authority_host(host.clone());
                }
                Ok(Arc::new(credential))
            }
            _ => Err(ConfigError::MissingCredentials),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn environment_fills_unset_values_only() {
        let env: HashMap<&str, &str> = [
            ("ARM_SUBSCRIPTION_ID", "env-sub"),
            ("ARM_ACCESS_TOKEN", "token"),
        ]
        .into_iter()
        .collect();

        let config = ProviderConfig::from_json(&json!({ "subscription_id": "file-sub" }))
            .unwrap()
            .with_env(|var| env.get(var).map(|v| v.to_string()));

        assert_eq!(config.subscription_id().unwrap(), "file-sub");
        assert_eq!(config.access_token.as_deref(), Some("token"));
        assert!(config.credential().is_ok());
    }

    #[test]
    fn missing_values_are_errors() {
        let config = ProviderConfig::from_json(&serde_json::Value::Null).unwrap();
        assert!(matches!(
            config.subscription_id(),
            Err(ConfigError::MissingSubscription)
        ));
        assert!(matches!(
            config.credential(),
            Err(ConfigError::MissingCredentials)
        ));
        assert_eq!(config.endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(config.storage_endpoint_suffix(), "core.windows.net");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ProviderConfig::from_json(&json!({ "region": "westeurope" })).is_err());
    }

    #[test]
    fn parses_features_and_timeouts() {
        let config = ProviderConfig::from_json(&json!({
            "features": { "machine_learning": { "purge_soft_deleted_workspace_on_destroy": true } },
            "timeouts": { "create": 60 }
        }))
        .unwrap();
        assert!(config.features.machine_learning.purge_soft_deleted_workspace_on_destroy);
        let timeouts = config.timeouts();
        assert_eq!(timeouts.create, Duration::from_secs(3600));
        assert_eq!(timeouts.read, Duration::from_secs(300));
    }
}
