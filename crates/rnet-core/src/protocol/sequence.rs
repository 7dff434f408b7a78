//! Lock-free id source for correlating requests and subscriptions.
//!
//! RNET frames carry no sequence numbers of their own, so ids handed out here
//! never reach the wire.  They only name local bookkeeping entries (pending
//! requests, subscriptions) so that a caller can cancel or remove exactly the
//! entry it created.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing `u64` ids, starting at 1.
///
/// Zero is never handed out, which leaves it free as a "no id" sentinel.
///
/// ```rust
/// use rnet_core::protocol::SequenceCounter;
///
/// let ids = SequenceCounter::new();
/// assert_eq!(ids.next(), 1);
/// assert_eq!(ids.next(), 2);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    pub const fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next id.  Skips zero when the counter wraps.
    pub fn next(&self) -> u64 {
        loop {
            // Relaxed: ids only need uniqueness, not ordering with other memory.
            let id = self.inner.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
