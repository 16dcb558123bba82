//! Polling until a remote object reaches a target state
//!
//! ARM is eventually consistent: a write may succeed while reads keep
//! returning the old value for a while. Callers describe which refresh
//! results are still pending and which are the target, and wait here.

use std::future::Future;
use std::time::Duration;

use log::debug;
use thiserror::Error;
use tokio::time::{Instant, sleep, timeout_at};

use crate::arm::ArmError;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("unexpected state '{state}', wanted target {}", target.join(", "))]
    UnexpectedState { state: String, target: Vec<String> },

    #[error("timeout while waiting for state to become '{}' (last state: '{last_state}', timeout: {timeout:?})", target.join(", "))]
    Timeout {
        last_state: String,
        target: Vec<String>,
        timeout: Duration,
    },

    #[error("couldn't find resource ({0} retries)")]
    NotFound(u32),

    #[error(transparent)]
    Refresh(#[from] ArmError),
}

/// Describes a wait for state convergence
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    pub pending: Vec<String>,
    pub target: Vec<String>,
    /// Wait before the first refresh
    pub delay: Duration,
    /// Fixed interval between refreshes; when zero the wait backs off from `min_timeout`
    pub poll_interval: Duration,
    /// Smallest wait between refreshes when backing off
    pub min_timeout: Duration,
    pub timeout: Duration,
    /// Number of consecutive target results required
    pub continuous_target_occurence: u32,
    /// Number of consecutive "not found" results tolerated
    pub not_found_checks: u32,
}

const MAX_BACKOFF: Duration = Duration::from_secs(10);

impl StateChangeConf {
    pub fn new(pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            delay: Duration::ZERO,
            poll_interval: Duration::ZERO,
            min_timeout: Duration::from_millis(100),
            timeout,
            continuous_target_occurence: 1,
            not_found_checks: 20,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_continuous_target_occurence(mut self, n: u32) -> Self {
        self.continuous_target_occurence = n.max(1);
        self
    }

    /// Call `refresh` until it reports a target state
    ///
    /// `refresh` returns the object (or `None` when it does not exist yet) and
    /// its current state string.
    pub async fn wait_for_state<T, F, Fut>(&self, mut refresh: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(Option<T>, String), ArmError>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut last_state = String::new();
        let mut target_occurence = 0;
        let mut not_found = 0;
        let mut backoff = self.min_timeout.max(Duration::from_millis(1));

        let mut wait = self.delay;
        loop {
            if Instant::now() + wait > deadline {
                return Err(PollError::Timeout {
                    last_state,
                    target: self.target.clone(),
                    timeout: self.timeout,
                });
            }
            sleep(wait).await;

            let (object, state) = match timeout_at(deadline, refresh()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(PollError::Timeout {
                        last_state,
                        target: self.target.clone(),
                        timeout: self.timeout,
                    });
                }
            };
            debug!("Polled state: '{}'", state);

            match object {
                None => {
                    target_occurence = 0;
                    not_found += 1;
                    if not_found > self.not_found_checks {
                        return Err(PollError::NotFound(not_found - 1));
                    }
                }
                Some(object) => {
                    not_found = 0;
                    if self.target.contains(&state) {
                        target_occurence += 1;
                        if target_occurence >= self.continuous_target_occurence {
                            return Ok(object);
                        }
                    } else if self.pending.contains(&state) {
                        target_occurence = 0;
                    } else {
                        return Err(PollError::UnexpectedState {
                            state,
                            target: self.target.clone(),
                        });
                    }
                }
            }
            last_state = state;

            wait = if self.poll_interval > Duration::ZERO {
                self.poll_interval
            } else {
                let current = backoff;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                current
            };
        }
    }
}
