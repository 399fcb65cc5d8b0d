//! Bounded FIFO of pending offers.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

use flotilla_offers::{Offer, OfferId};

struct QueueState {
    offers: VecDeque<Offer>,
    closed: bool,
}

/// FIFO of offers awaiting processing.
///
/// Offers are enqueued from the resource-manager callback thread and
/// drained in batches by the single consumer. Rescinded offers can be
/// removed while still queued. Closing the queue releases the consumer
/// with an empty batch.
pub struct OfferQueue {
    state: Mutex<QueueState>,
    available: Notify,
    /// Maximum queued offers; zero means unbounded.
    capacity: usize,
}

/// Default capacity. Offers held in the queue are offers the rest of the
/// cluster cannot use, so the backlog is kept small and overflow is
/// declined back to the resource manager.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

impl OfferQueue {
    /// Creates a queue with the provided capacity; zero means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                offers: VecDeque::new(),
                closed: false,
            }),
            available: Notify::new(),
            capacity,
        }
    }

    /// Enqueues an offer. Returns `false` when the queue is full or
    /// closed; the caller is then responsible for declining the offer.
    pub fn offer(&self, offer: Offer) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            if self.capacity > 0 && state.offers.len() >= self.capacity {
                return false;
            }
            state.offers.push_back(offer);
        }
        self.available.notify_one();
        true
    }

    /// Blocks until at least one offer is queued, then drains everything.
    /// Returns an empty batch only after [`close`](Self::close).
    pub async fn take_all(&self) -> Vec<Offer> {
        loop {
            let notified = self.available.notified();
            {
                let mut state = self.lock();
                if !state.offers.is_empty() {
                    return state.offers.drain(..).collect();
                }
                if state.closed {
                    return Vec::new();
                }
            }
            notified.await;
        }
    }

    /// Drains whatever is currently queued without blocking. Used by the
    /// single-threaded mode where the caller processes inline.
    pub fn drain_now(&self) -> Vec<Offer> {
        self.lock().offers.drain(..).collect()
    }

    /// Removes a rescinded offer. No-op if it was already dequeued.
    /// FIFO order of the remaining offers is preserved.
    pub fn remove(&self, offer_id: &OfferId) -> bool {
        let mut state = self.lock();
        let before = state.offers.len();
        state.offers.retain(|o| &o.id != offer_id);
        let removed = state.offers.len() < before;
        if removed {
            debug!(offer_id = %offer_id, "Removed rescinded offer from queue");
        }
        removed
    }

    /// Closes the queue: subsequent `offer` calls are rejected and the
    /// consumer is released with an empty batch.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of currently queued offers.
    pub fn len(&self) -> usize {
        self.lock().offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().offers.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
