//! The link: one transport plus everything needed to drive it.
//!
//! [`Link`] owns the transport, the outgoing sequence counter, the retry
//! budget, the link counters and the diagnostics log. Every exchange goes
//! through [`Link::exchange`], which enforces the module's recovery delay
//! after each transfer. The polling loops live in [`poll`](crate::poll)
//! and the command shapes in [`dispatch`](crate::dispatch), both as
//! further `impl` blocks on `Link`.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use hrocm_core::diagnostics::{Diagnostics, LinkCounters};
use hrocm_core::error::{FrameError, Result};
use hrocm_core::transport::Transport;
use hrocm_wire::frame::Header;
use tracing::trace;

/// Default pause after every exchange.
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_millis(5);

/// Default bound on a normal wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Bound on firmware save/execute and reset.
pub const DEFAULT_LONG_TIMEOUT: Duration = Duration::from_secs(180);

/// Retry budget of a link, expressed in exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub recovery_delay: Duration,
    /// Attempts allowed for a normal wait.
    pub attempts: u32,
    /// Attempts allowed for a long-running operation.
    pub long_attempts: u32,
}

impl RetryPolicy {
    /// Derive attempt counts from wall-clock timeouts: one attempt per
    /// recovery delay. With a zero delay the default counts are used.
    pub fn from_timeouts(
        recovery_delay: Duration,
        timeout: Duration,
        long_timeout: Duration,
    ) -> Self {
        let per = |t: Duration, fallback: Duration| {
            let delay = if recovery_delay.is_zero() {
                DEFAULT_RECOVERY_DELAY
            } else {
                recovery_delay
            };
            let t = if t.is_zero() { fallback } else { t };
            u32::try_from(t.as_micros() / delay.as_micros().max(1))
                .unwrap_or(u32::MAX)
                .max(1)
        };
        RetryPolicy {
            recovery_delay,
            attempts: per(timeout, DEFAULT_TIMEOUT),
            long_attempts: per(long_timeout, DEFAULT_LONG_TIMEOUT),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_timeouts(DEFAULT_RECOVERY_DELAY, DEFAULT_TIMEOUT, DEFAULT_LONG_TIMEOUT)
    }
}

/// A transport driven under the HROCM exchange rules.
pub struct Link<T> {
    pub(crate) transport: T,
    pub(crate) policy: RetryPolicy,
    pub(crate) budget: u32,
    sequence: u32,
    pub(crate) counters: LinkCounters,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) last_header: Option<Header>,
}

impl<T: Transport> Link<T> {
    /// Create a link. The first command uses the sequence number after
    /// `initial_sequence`.
    pub fn new(transport: T, policy: RetryPolicy, initial_sequence: u32) -> Self {
        Link {
            transport,
            policy,
            budget: policy.attempts,
            sequence: initial_sequence,
            counters: LinkCounters::default(),
            diagnostics: Diagnostics::new(),
            last_header: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Attempts currently allowed per wait.
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Replace the attempt budget, returning the previous one so the
    /// caller can restore it.
    pub fn set_budget(&mut self, attempts: u32) -> u32 {
        std::mem::replace(&mut self.budget, attempts.max(1))
    }

    /// Switch to the long attempt budget until the returned guard is
    /// dropped. The previous budget comes back on every path, including
    /// a cancelled future.
    pub fn long_budget(&mut self) -> LongBudget<'_, T> {
        let previous = self.set_budget(self.policy.long_attempts);
        LongBudget {
            link: self,
            previous,
        }
    }

    pub fn counters(&self) -> LinkCounters {
        self.counters
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    /// The most recent header that validated.
    pub fn last_header(&self) -> Option<&Header> {
        self.last_header.as_ref()
    }

    /// Sequence number of the most recent command.
    pub fn current_sequence(&self) -> u32 {
        self.sequence
    }

    /// Advance the outgoing sequence counter. Zero is skipped: it is the
    /// value every `SEQARR` slot holds after power-up.
    pub fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        if self.sequence == 0 {
            self.sequence = 1;
        }
        self.sequence
    }

    /// One full-duplex transfer followed by the recovery delay.
    ///
    /// Adapter failures are returned unchanged; the delay is observed
    /// either way.
    pub async fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        let outcome = self.transport.transfer(tx, rx).await;
        trace!(len = tx.len(), ok = outcome.is_ok(), "spi exchange");
        if !self.policy.recovery_delay.is_zero() {
            tokio::time::sleep(self.policy.recovery_delay).await;
        }
        outcome
    }

    /// Count a rejected frame.
    pub(crate) fn record_frame_error(&mut self, error: FrameError) {
        if error.is_magic() {
            self.counters.magic_errors += 1;
        } else if error.is_header_crc() {
            self.counters.header_crc_errors += 1;
        } else if !matches!(error, FrameError::TooLarge { .. }) {
            self.counters.frame_crc_errors += 1;
        }
        trace!(%error, "frame rejected");
    }
}

/// A [`Link`] running under the long attempt budget.
///
/// Dereferences to the link; dropping it restores the budget that was in
/// force before.
pub struct LongBudget<'a, T> {
    link: &'a mut Link<T>,
    previous: u32,
}

impl<T> Deref for LongBudget<'_, T> {
    type Target = Link<T>;

    fn deref(&self) -> &Link<T> {
        self.link
    }
}

impl<T> DerefMut for LongBudget<'_, T> {
    fn deref_mut(&mut self) -> &mut Link<T> {
        self.link
    }
}

impl<T> Drop for LongBudget<'_, T> {
    fn drop(&mut self) {
        self.link.budget = self.previous;
    }
}
