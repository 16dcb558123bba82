//! azml State Management
//!
//! Persists what azml manages: for every resource its ARM ID and the
//! attributes last read back from Azure. State lives in a local JSON file
//! next to a `.lock` file guarding concurrent runs.
//!
//! # Example
//!
//! ```ignore
//! use azml_state::{create_backend, BackendConfig};
//!
//! let backend = create_backend(&BackendConfig::local("azml.state.json")).await?;
//!
//! let lock = backend.acquire_lock("apply").await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//!
//! // ... apply changes, upsert resources ...
//!
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

// Re-export main types for convenience
pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile};
