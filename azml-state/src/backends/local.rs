//! Local file backend for state storage
//!
//! State is a pretty-printed JSON file (default: azml.state.json). A sibling
//! `.lock` file holds the `LockInfo` of the run currently applying changes.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::{DEFAULT_LOCK_TIMEOUT_SECS, LockInfo};
use crate::state::StateFile;

pub struct LocalBackend {
    state_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout_secs: i64,
}

impl LocalBackend {
    /// Default state file name
    pub const DEFAULT_STATE_FILE: &'static str = "azml.state.json";

    /// Create a new LocalBackend with default paths (azml.state.json in current directory)
    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    /// Create a new LocalBackend with a specific state file path
    pub fn with_path(state_path: PathBuf) -> Self {
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }

    /// Create a LocalBackend from the `backend` block
    ///
    /// Recognised attributes: `path` and `lock_timeout_secs`.
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let path = config
            .get_string("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_STATE_FILE));

        let mut backend = Self::with_path(path);
        if let Some(secs) = config.get_int("lock_timeout_secs") {
            if secs <= 0 {
                return Err(BackendError::configuration(
                    "lock_timeout_secs must be positive",
                ));
            }
            backend.lock_timeout_secs = secs;
        }
        Ok(backend)
    }

    pub fn state_path(&self) -> &PathBuf {
        &self.state_path
    }

    pub fn lock_path(&self) -> &PathBuf {
        &self.lock_path
    }

    fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        let content = match std::fs::read_to_string(&self.lock_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::Io(format!("Failed to read lock file: {}", e))),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| BackendError::InvalidState(format!("Failed to parse lock file: {}", e)))
    }

    /// Create the lock file; fails if another run created it first
    fn write_lock(&self, lock: &LockInfo) -> BackendResult<bool> {
        let content = serde_json::to_string_pretty(lock)
            .map_err(|e| BackendError::Serialization(format!("Failed to serialize lock: {}", e)))?;
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(BackendError::Io(format!("Failed to write lock file: {}", e))),
        };
        file.write_all(content.as_bytes())
            .map_err(|e| BackendError::Io(format!("Failed to write lock file: {}", e)))?;
        Ok(true)
    }

    fn remove_lock(&self) -> BackendResult<()> {
        std::fs::remove_file(&self.lock_path)
            .map_err(|e| BackendError::Io(format!("Failed to remove lock file: {}", e)))
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_state(content: &str, path: &Path) -> BackendResult<StateFile> {
    let state: StateFile = serde_json::from_str(content).map_err(|e| {
        BackendError::InvalidState(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    if state.version > StateFile::CURRENT_VERSION {
        return Err(BackendError::InvalidState(format!(
            "{} has format version {}, this azml understands up to {}",
            path.display(),
            state.version,
            StateFile::CURRENT_VERSION
        )));
    }
    Ok(state)
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        let content = match std::fs::read_to_string(&self.state_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::Io(format!("Failed to read state file: {}", e))),
        };
        debug!("Read state from {}", self.state_path.display());
        parse_state(&content, &self.state_path).map(Some)
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        if let Some(stored) = self.read_state().await?
            && stored.lineage != state.lineage
        {
            return Err(BackendError::LineageMismatch {
                expected: stored.lineage,
                actual: state.lineage.clone(),
            });
        }

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            BackendError::Serialization(format!("Failed to serialize state: {}", e))
        })?;

        // Write next to the target and rename so readers never see a partial file
        let tmp_path = self.state_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)
            .map_err(|e| BackendError::Io(format!("Failed to write state file: {}", e)))?;
        std::fs::rename(&tmp_path, &self.state_path)
            .map_err(|e| BackendError::Io(format!("Failed to replace state file: {}", e)))?;

        debug!(
            "Wrote state serial {} to {}",
            state.serial,
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
        if let Some(existing) = self.read_lock()? {
            if !existing.is_expired() {
                return Err(BackendError::locked(&existing));
            }
            warn!(
                "Taking over expired lock {} held by {}",
                existing.id, existing.who
            );
            self.remove_lock()?;
        }

        let lock = LockInfo::with_timeout(operation, self.lock_timeout_secs);
        if !self.write_lock(&lock)? {
            // Lost the race against another run
            return match self.read_lock()? {
                Some(existing) => Err(BackendError::locked(&existing)),
                None => Err(BackendError::Io(
                    "Lock file appeared and vanished while locking".to_string(),
                )),
            };
        }
        debug!("Acquired lock {} for {}", lock.id, operation);
        Ok(lock)
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        let existing = self
            .read_lock()?
            .ok_or_else(|| BackendError::LockNotFound(lock.id.clone()))?;

        if existing.id != lock.id {
            return Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            });
        }
        self.remove_lock()
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        if !self.lock_path.exists() {
            return Err(BackendError::LockNotFound(lock_id.to_string()));
        }

        // An unreadable lock file can still be removed by ID
        if let Ok(Some(existing)) = self.read_lock()
            && existing.id != lock_id
        {
            return Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            });
        }
        self.remove_lock()
    }

    async fn init(&self) -> BackendResult<()> {
        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                BackendError::Io(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceState;
    use azml_core::resource::Value;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_backend_read_write() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        assert!(backend.read_state().await.unwrap().is_none());

        let mut state = StateFile::new();
        state.upsert_resource(ResourceState::new("machine_learning_registry", "reg", "azureml"));
        state.increment_serial();
        backend.write_state(&state).await.unwrap();

        let read = backend.read_state().await.unwrap().unwrap();
        assert_eq!(read.serial, 1);
        assert_eq!(read.resources.len(), 1);
        assert!(!dir.path().join("test.state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_local_backend_rejects_other_lineage() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        backend.write_state(&StateFile::new()).await.unwrap();
        let result = backend.write_state(&StateFile::new()).await;
        assert!(matches!(result, Err(BackendError::LineageMismatch { .. })));
    }

    #[tokio::test]
    async fn test_local_backend_rejects_newer_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.state.json");
        let mut state = StateFile::new();
        state.version = StateFile::CURRENT_VERSION + 1;
        std::fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let backend = LocalBackend::with_path(path);
        assert!(matches!(
            backend.read_state().await,
            Err(BackendError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_local_backend_locking() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert_eq!(lock.operation, "apply");
        assert!(backend.lock_path().exists());

        let result = backend.acquire_lock("plan").await;
        assert!(matches!(result, Err(BackendError::Locked { .. })));

        backend.release_lock(&lock).await.unwrap();
        assert!(!backend.lock_path().exists());

        let lock2 = backend.acquire_lock("destroy").await.unwrap();
        assert_eq!(lock2.operation, "destroy");
        backend.release_lock(&lock2).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_backend_takes_over_expired_lock() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let stale = LockInfo::with_timeout("apply", -1);
        std::fs::write(backend.lock_path(), serde_json::to_string(&stale).unwrap()).unwrap();

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert_ne!(lock.id, stale.id);
    }

    #[tokio::test]
    async fn test_release_checks_lock_id() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let _lock = backend.acquire_lock("apply").await.unwrap();
        let other = LockInfo::new("apply");
        assert!(matches!(
            backend.release_lock(&other).await,
            Err(BackendError::LockMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        assert!(matches!(
            backend.force_unlock("nope").await,
            Err(BackendError::LockNotFound(_))
        ));

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert!(backend.force_unlock("wrong-id").await.is_err());
        backend.force_unlock(&lock.id).await.unwrap();
        assert!(!backend.lock_path().exists());
    }

    #[tokio::test]
    async fn test_local_backend_from_config() {
        let config = BackendConfig {
            backend_type: "local".to_string(),
            attributes: HashMap::new(),
        };

        let backend = LocalBackend::from_config(&config).unwrap();
        assert_eq!(backend.state_path(), &PathBuf::from("azml.state.json"));
        assert_eq!(backend.lock_path(), &PathBuf::from("azml.state.lock"));
    }

    #[tokio::test]
    async fn test_local_backend_custom_settings() {
        let mut config = BackendConfig::local("custom.state.json");
        config
            .attributes
            .insert("lock_timeout_secs".to_string(), Value::Int(30));

        let backend = LocalBackend::from_config(&config).unwrap();
        assert_eq!(backend.state_path(), &PathBuf::from("custom.state.json"));
        assert_eq!(backend.lock_timeout_secs, 30);

        config
            .attributes
            .insert("lock_timeout_secs".to_string(), Value::Int(0));
        assert!(LocalBackend::from_config(&config).is_err());
    }
}
