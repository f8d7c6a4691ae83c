//! Bounded retry for reads that may observe a transient inconsistency
//!
//! Chain and atom discovery can race a commit that is still publishing. Those
//! reads report `Error::Inconsistent`; the `ConsistencyWrapper` re-runs them
//! with exponential backoff and gives up with `Error::RetriesExhausted`.
//! Every other error is returned immediately.

use revstore_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Retry policy for transient inconsistencies
///
/// # Example
/// ```ignore
/// let config = ConsistencyConfig {
///     max_attempts: 5,
///     base_delay_ms: 1,
///     max_delay_ms: 50,
/// };
/// let wrapper = ConsistencyWrapper::new(config);
/// let head = wrapper.run("chain of atom", || find_chain(atom))?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    /// Total attempts, including the first one (minimum 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds (exponential backoff)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> usize {
    5
}

fn default_base_delay_ms() -> u64 {
    1
}

fn default_max_delay_ms() -> u64 {
    50
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ConsistencyConfig {
    /// Create a new ConsistencyConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ConsistencyConfig that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set the total number of attempts
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between attempts
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Calculate delay after a given failed attempt (exponential backoff)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        // Cap the shift to prevent overflow
        let shift = attempt.min(63);
        let multiplier = 1u64 << shift;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Check the policy is usable
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "consistency.max_attempts must be at least 1".into(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(format!(
                "consistency.base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Runs operations under the retry policy
#[derive(Debug, Clone, Default)]
pub struct ConsistencyWrapper {
    config: ConsistencyConfig,
}

impl ConsistencyWrapper {
    /// Create a wrapper with the given policy
    pub fn new(config: ConsistencyConfig) -> Self {
        Self { config }
    }

    /// The retry policy
    pub fn config(&self) -> &ConsistencyConfig {
        &self.config
    }

    /// Run `op` until it succeeds, fails permanently, or the attempts run out
    ///
    /// `what` names the operation in logs and in the final error.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut last = String::new();

        for attempt in 0..attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    warn!(
                        target: "revstore::consistency",
                        what,
                        attempt = attempt + 1,
                        error = %e,
                        "Inconsistency detected, retrying"
                    );
                    last = e.to_string();
                    if attempt + 1 < attempts {
                        std::thread::sleep(self.config.calculate_delay(attempt));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::RetriesExhausted {
            attempts,
            last: format!("{}: {}", what, last),
        })
    }
}
