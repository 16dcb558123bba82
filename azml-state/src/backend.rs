//! State backend trait and error types

use std::collections::HashMap;

use async_trait::async_trait;
use azml_core::config::BackendBlock;
use azml_core::resource::Value;
use thiserror::Error;

use crate::lock::LockInfo;
use crate::state::StateFile;

/// Errors that can occur when interacting with a state backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The state is locked by another process
    #[error("State is locked by {who} (lock ID: {lock_id}, operation: {operation})")]
    Locked {
        lock_id: String,
        who: String,
        operation: String,
    },

    /// The lock was not found (for release/force-unlock operations)
    #[error("Lock not found: {0}")]
    LockNotFound(String),

    /// Lock ID mismatch when trying to release
    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    #[error("Backend configuration error: {0}")]
    Configuration(String),

    /// State file is corrupted or written by a newer version
    #[error("Invalid state file: {0}")]
    InvalidState(String),

    /// State lineage mismatch (prevents accidental state overwrites)
    #[error("State lineage mismatch: expected {expected}, got {actual}")]
    LineageMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Create a Locked error from a LockInfo
    pub fn locked(lock: &LockInfo) -> Self {
        Self::Locked {
            lock_id: lock.id.clone(),
            who: lock.who.clone(),
            operation: lock.operation.clone(),
        }
    }

    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Trait for state storage backends
///
/// Stores and retrieves state files and manages the lock that keeps two
/// runs from writing the same state.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read the current state from the backend
    ///
    /// Returns `None` if no state exists (first-time use)
    async fn read_state(&self) -> BackendResult<Option<StateFile>>;

    /// Write the state to the backend
    ///
    /// The state's serial number should be incremented before calling this.
    /// Fails with `LineageMismatch` when the stored state belongs to another
    /// lineage.
    async fn write_state(&self, state: &StateFile) -> BackendResult<()>;

    /// Acquire a lock for the given operation
    ///
    /// Fails if a lock is already held by another process, unless that
    /// lock has expired
    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo>;

    /// Release a previously acquired lock
    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()>;

    /// Force release a lock by its ID
    ///
    /// Administrative escape hatch for a lock left behind by a crashed run
    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()>;

    /// Prepare the storage location (create missing directories, etc.)
    async fn init(&self) -> BackendResult<()>;
}

/// Configuration for a state backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend type (only "local" is supported)
    pub backend_type: String,
    /// Backend-specific attributes
    pub attributes: HashMap<String, Value>,
}

impl BackendConfig {
    /// Local backend storing state at `path`
    pub fn local(path: impl Into<String>) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert("path".to_string(), Value::String(path.into()));
        Self {
            backend_type: "local".to_string(),
            attributes,
        }
    }

    /// Get a string attribute value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get an integer attribute value
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.attributes.get(key) {
            Some(Value::Int(i)) => Some(*i),
            _ => None,
        }
    }
}

impl From<&BackendBlock> for BackendConfig {
    fn from(block: &BackendBlock) -> Self {
        Self {
            backend_type: block.backend_type.clone(),
            attributes: block.attributes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockInfo;

    #[test]
    fn test_backend_error_locked() {
        let lock = LockInfo::new("apply");
        let error = BackendError::locked(&lock);

        match error {
            BackendError::Locked {
                lock_id,
                who,
                operation,
            } => {
                assert_eq!(lock_id, lock.id);
                assert_eq!(who, lock.who);
                assert_eq!(operation, "apply");
            }
            _ => panic!("Expected Locked error"),
        }
    }

    #[test]
    fn test_backend_error_display() {
        let error = BackendError::unsupported_backend("s3");
        assert_eq!(error.to_string(), "Unsupported backend type: s3");

        let error = BackendError::LineageMismatch {
            expected: "a".to_string(),
            actual: "b".to_string(),
        };
        assert_eq!(error.to_string(), "State lineage mismatch: expected a, got b");
    }

    #[test]
    fn test_backend_config_from_block() {
        let mut attributes = HashMap::new();
        attributes.insert("path".to_string(), Value::from("prod.state.json"));
        attributes.insert("lock_timeout_secs".to_string(), Value::Int(60));
        let block = BackendBlock {
            backend_type: "local".to_string(),
            attributes,
        };

        let config = BackendConfig::from(&block);
        assert_eq!(config.backend_type, "local");
        assert_eq!(config.get_string("path"), Some("prod.state.json"));
        assert_eq!(config.get_int("lock_timeout_secs"), Some(60));
        assert_eq!(config.get_string("lock_timeout_secs"), None);
    }
}
