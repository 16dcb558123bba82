//! Backend implementations for state storage

mod local;

pub use local::LocalBackend;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};

/// Create a backend from configuration
pub async fn create_backend(config: &BackendConfig) -> BackendResult<Box<dyn StateBackend>> {
    match config.backend_type.as_str() {
        "local" => {
            let backend = LocalBackend::from_config(config)?;
            backend.init().await?;
            Ok(Box::new(backend))
        }
        other => Err(BackendError::unsupported_backend(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_unsupported_backend() {
        let config = BackendConfig {
            backend_type: "s3".to_string(),
            attributes: HashMap::new(),
        };

        let result = create_backend(&config).await;
        assert!(result.is_err());

        if let Err(BackendError::UnsupportedBackend(name)) = result {
            assert_eq!(name, "s3");
        } else {
            panic!("Expected UnsupportedBackend error");
        }
    }

    #[tokio::test]
    async fn test_local_backend_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("azml.state.json");
        let config = BackendConfig::local(path.display().to_string());

        let backend = create_backend(&config).await.unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(backend.read_state().await.unwrap().is_none());
    }
}
