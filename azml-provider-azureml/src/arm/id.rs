//! Typed Azure Resource Manager resource IDs
//!
//! IDs are parsed with case-insensitive segment keys (ARM is not consistent
//! about casing) and printed in their canonical form.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parsing {id_type} from {input:?}: {reason}")]
pub struct IdParseError {
    pub id_type: &'static str,
    pub input: String,
    pub reason: String,
}

/// One `key/value` pair of an ID
enum Segment {
    /// Variable value captured into the typed ID
    Key(&'static str),
    /// Key whose value is fixed (e.g. `providers/Microsoft.Storage`)
    Fixed(&'static str, &'static str),
}

/// Split `input` into segments and return the captured values in order
fn parse_segments(
    input: &str,
    id_type: &'static str,
    expected: &[Segment],
) -> Result<Vec<String>, IdParseError> {
    let fail = |reason: String| IdParseError {
        id_type,
        input: input.to_string(),
        reason,
    };

    let trimmed = input
        .strip_prefix('/')
        .ok_or_else(|| fail("expected the ID to start with '/'".to_string()))?;
    let parts: Vec<&str> = trimmed.trim_end_matches('/').split('/').collect();
    if parts.len() != expected.len() * 2 {
        return Err(fail(format!(
            "expected {} segments, got {}",
            expected.len() * 2,
            parts.len()
        )));
    }

    let mut values = Vec::new();
    for (pair, segment) in parts.chunks(2).zip(expected) {
        let (key, value) = (pair[0], pair[1]);
        if value.is_empty() {
            return Err(fail(format!("segment {:?} has an empty value", key)));
        }
        match segment {
            Segment::Key(name) => {
                if !key.eq_ignore_ascii_case(name) {
                    return Err(fail(format!("expected segment {:?}, got {:?}", name, key)));
                }
                values.push(value.to_string());
            }
            Segment::Fixed(name, fixed) => {
                if !key.eq_ignore_ascii_case(name) || !value.eq_ignore_ascii_case(fixed) {
                    return Err(fail(format!(
                        "expected {}/{}, got {}/{}",
                        name, fixed, key, value
                    )));
                }
            }
        }
    }
    Ok(values)
}

/// Resource group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceGroupId {
    pub subscription_id: String,
    pub resource_group_name: String,
}

impl ResourceGroupId {
    pub fn new(subscription_id: impl Into<String>, resource_group_name: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group_name: resource_group_name.into(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, IdParseError> {
        let values = parse_segments(
            input,
            "ResourceGroupId",
            &[Segment::Key("subscriptions"), Segment::Key("resourceGroups")],
        )?;
        let mut values = values.into_iter();
        Ok(Self {
            subscription_id: values.next().unwrap_or_default(),
            resource_group_name: values.next().unwrap_or_default(),
        })
    }
}

impl fmt::Display for ResourceGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, self.resource_group_name
        )
    }
}

/// Defines a typed ID below `/subscriptions/{s}/resourceGroups/{rg}/providers/{namespace}`
macro_rules! provider_id {
    (
        $(#[$meta:meta])*
        $name:ident, $namespace:expr, [$($key:expr => $field:ident),+ $(,)?]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name {
            pub subscription_id: String,
            pub resource_group_name: String,
            $(pub $field: String,)+
        }

        impl $name {
            pub fn new(
                subscription_id: impl Into<String>,
                resource_group_name: impl Into<String>,
                $($field: impl Into<String>,)+
            ) -> Self {
                Self {
                    subscription_id: subscription_id.into(),
                    resource_group_name: resource_group_name.into(),
                    $($field: $field.into(),)+
                }
            }

            pub fn parse(input: &str) -> Result<Self, IdParseError> {
                let values = parse_segments(
                    input,
                    stringify!($name),
                    &[
                        Segment::Key("subscriptions"),
                        Segment::Key("resourceGroups"),
                        Segment::Fixed("providers", $namespace),
                        $(Segment::Key($key),)+
                    ],
                )?;
                let mut values = values.into_iter();
                Ok(Self {
                    subscription_id: values.next().unwrap_or_default(),
                    resource_group_name: values.next().unwrap_or_default(),
                    $($field: values.next().unwrap_or_default(),)+
                })
            }

            pub fn resource_group_id(&self) -> ResourceGroupId {
                ResourceGroupId::new(&self.subscription_id, &self.resource_group_name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    "/subscriptions/{}/resourceGroups/{}/providers/{}",
                    self.subscription_id, self.resource_group_name, $namespace
                )?;
                $(write!(f, "/{}/{}", $key, self.$field)?;)+
                Ok(())
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

const ML: &str = "Microsoft.MachineLearningServices";

provider_id!(
    /// Machine Learning workspace, also used for AI Foundry hubs and projects
    WorkspaceId, ML, ["workspaces" => workspace_name]
);

provider_id!(
    /// Compute attached to a workspace (cluster, instance or inference cluster)
    ComputeId, ML, ["workspaces" => workspace_name, "computes" => compute_name]
);

provider_id!(
    DatastoreId, ML, ["workspaces" => workspace_name, "datastores" => datastore_name]
);

provider_id!(
    /// Managed network outbound rule of a workspace
    OutboundRuleId, ML, ["workspaces" => workspace_name, "outboundRules" => outbound_rule_name]
);

provider_id!(RegistryId, ML, ["registries" => registry_name]);

provider_id!(
    StorageAccountId,
    "Microsoft.Storage",
    ["storageAccounts" => storage_account_name]
);

provider_id!(
    KubernetesClusterId,
    "Microsoft.ContainerService",
    ["managedClusters" => managed_cluster_name]
);

provider_id!(
    UserAssignedIdentityId,
    "Microsoft.ManagedIdentity",
    ["userAssignedIdentities" => identity_name]
);

provider_id!(
    SubnetId,
    "Microsoft.Network",
    ["virtualNetworks" => virtual_network_name, "subnets" => subnet_name]
);

impl ComputeId {
    pub fn workspace_id(&self) -> WorkspaceId {
        WorkspaceId::new(
            &self.subscription_id,
            &self.resource_group_name,
            &self.workspace_name,
        )
    }
}

impl DatastoreId {
    pub fn workspace_id(&self) -> WorkspaceId {
        WorkspaceId::new(
            &self.subscription_id,
            &self.resource_group_name,
            &self.workspace_name,
        )
    }
}

impl OutboundRuleId {
    pub fn workspace_id(&self) -> WorkspaceId {
        WorkspaceId::new(
            &self.subscription_id,
            &self.resource_group_name,
            &self.workspace_name,
        )
    }
}

/// Blob container (`.../storageAccounts/{a}/blobServices/default/containers/{c}`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageContainerId {
    pub subscription_id: String,
    pub resource_group_name: String,
    pub storage_account_name: String,
    pub container_name: String,
}

impl StorageContainerId {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group_name: impl Into<String>,
        storage_account_name: impl Into<String>,
        container_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group_name: resource_group_name.into(),
            storage_account_name: storage_account_name.into(),
            container_name: container_name.into(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, IdParseError> {
        let values = parse_segments(
            input,
            "StorageContainerId",
            &[
                Segment::Key("subscriptions"),
                Segment::Key("resourceGroups"),
                Segment::Fixed("providers", "Microsoft.Storage"),
                Segment::Key("storageAccounts"),
                Segment::Fixed("blobServices", "default"),
                Segment::Key("containers"),
            ],
        )?;
        let mut values = values.into_iter();
        Ok(Self {
            subscription_id: values.next().unwrap_or_default(),
            resource_group_name: values.next().unwrap_or_default(),
            storage_account_name: values.next().unwrap_or_default(),
            container_name: values.next().unwrap_or_default(),
        })
    }

    pub fn storage_account_id(&self) -> StorageAccountId {
        StorageAccountId::new(
            &self.subscription_id,
            &self.resource_group_name,
            &self.storage_account_name,
        )
    }
}

impl fmt::Display for StorageContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/blobServices/default/containers/{}",
            self.storage_account_id(),
            self.container_name
        )
    }
}

/// File share (`.../storageAccounts/{a}/fileServices/default/shares/{s}`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageShareId {
    pub subscription_id: String,
    pub resource_group_name: String,
    pub storage_account_name: String,
    pub share_name: String,
}

impl StorageShareId {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group_name: impl Into<String>,
        storage_account_name: impl Into<String>,
        share_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group_name: resource_group_name.into(),
            storage_account_name: storage_account_name.into(),
            share_name: share_name.into(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, IdParseError> {
        let values = parse_segments(
            input,
            "StorageShareId",
            &[
                Segment::Key("subscriptions"),
                Segment::Key("resourceGroups"),
                Segment::Fixed("providers", "Microsoft.Storage"),
                Segment::Key("storageAccounts"),
                Segment::Fixed("fileServices", "default"),
                Segment::Key("shares"),
            ],
        )?;
        let mut values = values.into_iter();
        Ok(Self {
            subscription_id: values.next().unwrap_or_default(),
            resource_group_name: values.next().unwrap_or_default(),
            storage_account_name: values.next().unwrap_or_default(),
            share_name: values.next().unwrap_or_default(),
        })
    }

    pub fn storage_account_id(&self) -> StorageAccountId {
        StorageAccountId::new(
            &self.subscription_id,
            &self.resource_group_name,
            &self.storage_account_name,
        )
    }
}

impl fmt::Display for StorageShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/fileServices/default/shares/{}",
            self.storage_account_id(),
            self.share_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WS: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/ws";

    #[test]
    fn parse_workspace_id() {
        let id = WorkspaceId::parse(WS).unwrap();
        assert_eq!(id.subscription_id, "sub");
        assert_eq!(id.resource_group_name, "rg");
        assert_eq!(id.workspace_name, "ws");
        assert_eq!(id.to_string(), WS);
    }

    #[test]
    fn parse_is_case_insensitive_on_keys() {
        let input = "/subscriptions/sub/resourcegroups/rg/providers/microsoft.machinelearningservices/Workspaces/ws/computes/cpu";
        let id = ComputeId::parse(input).unwrap();
        assert_eq!(id.compute_name, "cpu");
        assert_eq!(id.workspace_id().to_string(), WS);
    }

    #[test]
    fn parse_rejects_other_types() {
        assert!(ComputeId::parse(WS).is_err());
        assert!(WorkspaceId::parse(&format!("{}/computes/cpu", WS)).is_err());
        assert!(WorkspaceId::parse("subscriptions/sub").is_err());

        let err = RegistryId::parse(WS).unwrap_err();
        assert_eq!(err.id_type, "RegistryId");
    }

    #[test]
    fn parse_storage_container_id() {
        let input = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/acct/blobServices/default/containers/data";
        let id = StorageContainerId::parse(input).unwrap();
        assert_eq!(id.storage_account_name, "acct");
        assert_eq!(id.container_name, "data");
        assert_eq!(id.to_string(), input);

        let share = input
            .replace("blobServices", "fileServices")
            .replace("containers", "shares");
        assert!(StorageContainerId::parse(&share).is_err());
        assert_eq!(StorageShareId::parse(&share).unwrap().share_name, "data");
    }

    #[test]
    fn parse_subnet_id() {
        let input = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/default";
        let id: SubnetId = input.parse().unwrap();
        assert_eq!(id.virtual_network_name, "vnet");
        assert_eq!(id.subnet_name, "default");
    }
}
