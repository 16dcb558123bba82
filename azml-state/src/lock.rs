//! Lock held while a run reads and writes state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default lock timeout in seconds (one hour, long enough for slow ARM creates)
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique identifier, passed to `force-unlock`
    pub id: String,
    /// The operation being performed (e.g., "apply", "destroy", "import")
    pub operation: String,
    /// Who acquired the lock (username@hostname)
    pub who: String,
    pub created: DateTime<Utc>,
    /// After this instant another run may take the lock over
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    /// Create a new lock for an operation with the default timeout
    pub fn new(operation: impl Into<String>) -> Self {
        Self::with_timeout(operation, DEFAULT_LOCK_TIMEOUT_SECS)
    }

    pub fn with_timeout(operation: impl Into<String>, timeout_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            who: lock_owner(),
            created: now,
            expires: now + Duration::seconds(timeout_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }

    pub fn time_remaining(&self) -> Duration {
        self.expires - Utc::now()
    }
}

/// username@hostname
fn lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}
