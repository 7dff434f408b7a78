//! Priority-ordered outbound queue drained by the session's single writer.
//!
//! Strict priority: a queued `High` item is always taken before any `Low`
//! item, however long the `Low` item has waited.  Within one priority the
//! queue is FIFO.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rnet_core::Priority;
use tokio::sync::Notify;

/// Returned by [`SendQueue::push`] after [`SendQueue::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

#[derive(Debug)]
struct Tiers<T> {
    high: VecDeque<T>,
    low: VecDeque<T>,
    closed: bool,
}

impl<T> Tiers<T> {
    fn tier_mut(&mut self, priority: Priority) -> &mut VecDeque<T> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Low => &mut self.low,
        }
    }

    fn pop_highest(&mut self) -> Option<T> {
        Priority::DESCENDING
            .iter()
            .find_map(|&p| self.tier_mut(p).pop_front())
    }
}

/// Multi-producer, single-consumer priority queue.
#[derive(Debug)]
pub struct SendQueue<T> {
    tiers: Mutex<Tiers<T>>,
    ready: Notify,
}

impl<T> SendQueue<T> {
    pub fn new() -> Self {
        Self {
            tiers: Mutex::new(Tiers {
                high: VecDeque::new(),
                low: VecDeque::new(),
                closed: false,
            }),
            ready: Notify::new(),
        }
    }

    /// Appends `item` to the tail of its priority tier.
    ///
    /// # Errors
    ///
    /// [`QueueClosed`] once the queue has been closed; `item` is dropped.
    pub fn push(&self, priority: Priority, item: T) -> Result<(), QueueClosed> {
        {
            let mut tiers = self.lock();
            if tiers.closed {
                return Err(QueueClosed);
            }
            tiers.tier_mut(priority).push_back(item);
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Takes the oldest item of the highest non-empty tier without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_highest()
    }

    /// Waits for the next item.  Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.ready.notified();
            {
                let mut tiers = self.lock();
                if tiers.closed {
                    return None;
                }
                if let Some(item) = tiers.pop_highest() {
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Rejects further pushes, drops everything queued, and wakes the consumer.
    ///
    /// Returns the number of items dropped.
    pub fn close(&self) -> usize {
        let dropped = {
            let mut tiers = self.lock();
            tiers.closed = true;
            let n = tiers.high.len() + tiers.low.len();
            tiers.high.clear();
            tiers.low.clear();
            n
        };
        self.ready.notify_waiters();
        self.ready.notify_one();
        dropped
    }

    /// Accepts pushes again after [`close`](Self::close).
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn len(&self) -> usize {
        let tiers = self.lock();
        tiers.high.len() + tiers.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Tiers<T>> {
        // Queue state stays consistent even if a holder panicked mid-push.
        self.tiers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for SendQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
