//! HrocmBuilder -- fluent builder for constructing [`HrocmDevice`] instances.
//!
//! Separates link configuration (recovery delay, timeouts, retry budgets,
//! sequence seed, exchange log) from construction.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use hrocm_device::HrocmBuilder;
//! use hrocm_test_harness::SimulatedModule;
//!
//! # async fn example() -> hrocm_core::Result<()> {
//! let sim = SimulatedModule::with_grid(1_913_125_000, 31_250, 1544);
//! let mut device = HrocmBuilder::new()
//!     .recovery_delay(Duration::from_millis(1))
//!     .timeout(Duration::from_secs(1))
//!     .build_with_transport(Box::new(sim))
//!     .await?;
//! device.ensure_initialized().await?;
//! # Ok(())
//! # }
//! ```

use std::io::Write;
use std::time::Duration;

use hrocm_core::error::{Error, Result};
use hrocm_core::transport::Transport;
use hrocm_transport::BinLogTransport;
use tracing::debug;

use crate::device::HrocmDevice;
use crate::link::{
    Link, RetryPolicy, DEFAULT_LONG_TIMEOUT, DEFAULT_RECOVERY_DELAY, DEFAULT_TIMEOUT,
};

/// Fluent builder for [`HrocmDevice`].
///
/// Every setting has a default, so the simplest usage is:
///
/// ```ignore
/// let device = HrocmBuilder::new()
///     .build_with_transport(Box::new(adapter))
///     .await?;
/// ```
pub struct HrocmBuilder {
    recovery_delay: Duration,
    timeout: Duration,
    long_timeout: Duration,
    attempts: Option<u32>,
    long_attempts: Option<u32>,
    initial_sequence: Option<u32>,
    exchange_log: Option<Box<dyn Write + Send + Sync>>,
}

impl HrocmBuilder {
    pub fn new() -> Self {
        HrocmBuilder {
            recovery_delay: DEFAULT_RECOVERY_DELAY,
            timeout: DEFAULT_TIMEOUT,
            long_timeout: DEFAULT_LONG_TIMEOUT,
            attempts: None,
            long_attempts: None,
            initial_sequence: None,
            exchange_log: None,
        }
    }

    /// Pause after every exchange (default: 5 ms).
    ///
    /// The module needs this time to settle; shortening it on real
    /// hardware produces corrupted frames.
    pub fn recovery_delay(mut self, delay: Duration) -> Self {
        self.recovery_delay = delay;
        self
    }

    /// Bound on a normal wait (default: 2 s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bound on reset and firmware save/execute (default: 3 min).
    pub fn long_timeout(mut self, timeout: Duration) -> Self {
        self.long_timeout = timeout;
        self
    }

    /// Use a fixed attempt count for normal waits instead of deriving it
    /// from the timeout.
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Fixed attempt count for long operations.
    pub fn long_attempts(mut self, attempts: u32) -> Self {
        self.long_attempts = Some(attempts);
        self
    }

    /// Seed the sequence counter. Random by default, so a restarted host
    /// does not repeat the numbers of its previous run.
    pub fn initial_sequence(mut self, sequence: u32) -> Self {
        self.initial_sequence = Some(sequence);
        self
    }

    /// Record every exchange to `sink` in the binary log format.
    pub fn exchange_log(mut self, sink: impl Write + Send + Sync + 'static) -> Self {
        self.exchange_log = Some(Box::new(sink));
        self
    }

    /// Retry policy these settings produce.
    pub fn policy(&self) -> RetryPolicy {
        let derived =
            RetryPolicy::from_timeouts(self.recovery_delay, self.timeout, self.long_timeout);
        RetryPolicy {
            attempts: self.attempts.unwrap_or(derived.attempts),
            long_attempts: self.long_attempts.unwrap_or(derived.long_attempts),
            ..derived
        }
    }

    /// Build an [`HrocmDevice`] on a caller-provided transport.
    ///
    /// No traffic is generated; the capability record is read by the
    /// first operation that needs it.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<HrocmDevice> {
        if self.attempts == Some(0) || self.long_attempts == Some(0) {
            return Err(Error::InvalidParameter(
                "attempt counts must be at least 1".into(),
            ));
        }
        let policy = self.policy();
        if policy.long_attempts < policy.attempts {
            return Err(Error::InvalidParameter(format!(
                "long attempts ({}) must not be fewer than normal attempts ({})",
                policy.long_attempts, policy.attempts
            )));
        }

        let transport: Box<dyn Transport> = match self.exchange_log {
            Some(sink) => Box::new(BinLogTransport::new(transport, sink)),
            None => transport,
        };
        let initial_sequence = self.initial_sequence.unwrap_or_else(rand::random);
        debug!(
            attempts = policy.attempts,
            long_attempts = policy.long_attempts,
            delay_ms = policy.recovery_delay.as_millis() as u64,
            "building HROCM session"
        );
        Ok(HrocmDevice::new(Link::new(transport, policy, initial_sequence)))
    }
}

impl Default for HrocmBuilder {
    fn default() -> Self {
        Self::new()
    }
}
