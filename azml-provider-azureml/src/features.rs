//! Provider feature switches

use serde::Deserialize;

/// `features` block of the provider configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Features {
    pub machine_learning: MachineLearningFeatures,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MachineLearningFeatures {
    /// Purge workspaces (and AI Foundry hubs and projects) instead of soft-deleting them
    pub purge_soft_deleted_workspace_on_destroy: bool,
}

impl Features {
    /// Extra query parameters for deleting a workspace-like resource
    pub fn workspace_delete_query(&self) -> Vec<(&'static str, &'static str)> {
        if self.machine_learning.purge_soft_deleted_workspace_on_destroy {
            vec![("forceToPurge", "true")]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_soft_delete() {
        let features: Features = serde_json::from_str("{}").unwrap();
        assert!(!features.machine_learning.purge_soft_deleted_workspace_on_destroy);
        assert!(features.workspace_delete_query().is_empty());
    }

    #[test]
    fn purge_enabled() {
        let features: Features = serde_json::from_str(
            r#"{ "machine_learning": { "purge_soft_deleted_workspace_on_destroy": true } }"#,
        )
        .unwrap();
        assert_eq!(
            features.workspace_delete_query(),
            vec![("forceToPurge", "true")]
        );
    }
}
