//! Per-identity call serialization with pacing and flood-wait retry.

use super::identity::ConnectionIdentity;
use crate::errors::{AutosignError, AutosignResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_FLOOD_PADDING: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallLimits {
    /// Minimum spacing between call starts on one identity.
    pub min_interval: Duration,
    /// Total attempts per call, counting the first. Zero behaves as one.
    pub max_retries: u32,
    /// Added to every backend-mandated wait.
    pub flood_padding: Duration,
}

impl Default for CallLimits {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            flood_padding: DEFAULT_FLOOD_PADDING,
        }
    }
}

#[derive(Debug, Default)]
struct RateState {
    last_call: Option<Instant>,
}

/// Funnels every remote call of an identity through one async lock.
pub struct CallSerializer {
    limits: CallLimits,
    lanes: Mutex<HashMap<ConnectionIdentity, Arc<tokio::sync::Mutex<RateState>>>>,
}

impl CallSerializer {
    pub fn new(limits: CallLimits) -> Self {
        Self {
            limits,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> CallLimits {
        self.limits
    }

    fn lane(&self, identity: &ConnectionIdentity) -> Arc<tokio::sync::Mutex<RateState>> {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(identity.clone())
            .or_default()
            .clone()
    }

    /// Run `operation` exclusively for `identity`.
    ///
    /// `operation` is invoked once per attempt. A `FloodWait` answer is slept
    /// out and retried until `max_retries` attempts have been made; any other
    /// error is returned as-is.
    pub async fn call<T, F, Fut>(
        &self,
        identity: &ConnectionIdentity,
        mut operation: F,
    ) -> AutosignResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AutosignResult<T>>,
    {
        let lane = self.lane(identity);
        let mut state = lane.lock().await;
        let max_attempts = self.limits.max_retries.max(1);
        let mut attempt: u32 = 0;

        loop {
            if let Some(last) = state.last_call {
                let elapsed = last.elapsed();
                if elapsed < self.limits.min_interval {
                    let wait = self.limits.min_interval - elapsed;
                    debug!("pacing {} for {:?}", identity, wait);
                    tokio::time::sleep(wait).await;
                }
            }
            state.last_call = Some(Instant::now());
            attempt += 1;

            match operation().await {
                Err(AutosignError::FloodWait { retry_after }) => {
                    if attempt >= max_attempts {
                        warn!(
                            "{} still throttled after {} attempts, giving up",
                            identity, attempt
                        );
                        return Err(AutosignError::RetriesExhausted {
                            attempts: attempt,
                            retry_after,
                        });
                    }
                    let wait = Duration::from_secs(retry_after) + self.limits.flood_padding;
                    warn!(
                        "{} flood wait {}s (attempt {}/{}), sleeping {:?}",
                        identity, retry_after, attempt, max_attempts, wait
                    );
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }
}

impl Default for CallSerializer {
    fn default() -> Self {
        Self::new(CallLimits::default())
    }
}

#[cfg(test)]
mod tests;
