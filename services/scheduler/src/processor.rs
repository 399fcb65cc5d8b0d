//! Single-consumer offer processing.
//!
//! Offers enter through `enqueue` on the callback path and leave through
//! one consumer task, which is the only caller of the router's offer
//! fan-out. No two offer passes ever overlap; overlapping passes could
//! present the same offer to two accept calls.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use flotilla_offers::{util::filter_out_accepted, Offer, OfferId, ResourceCleaner};

use crate::accept::OfferAccepter;
use crate::driver::{Driver, DriverError, LONG_DECLINE_SECONDS, SHORT_DECLINE_SECONDS};
use crate::exit::{hard_exit, ExitCode};
use crate::queue::OfferQueue;
use crate::router::{OfferRouter, PassResult};
use crate::run::UnexpectedResult;

/// Default deadline for [`OfferProcessor::await_processed`].
pub const AWAIT_PROCESSED_TIMEOUT: Duration = Duration::from_millis(5000);
const AWAIT_PROCESSED_POLL: Duration = Duration::from_millis(100);

/// Errors from offer processing.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("timed out after {0:?} waiting for offers to be processed")]
    Timeout(Duration),
}

/// Drains the offer queue and runs the evaluate/clean/decline/accept cycle
/// for each batch.
pub struct OfferProcessor {
    driver: Arc<dyn Driver>,
    router: Arc<OfferRouter>,
    accepter: OfferAccepter,
    queue: Arc<OfferQueue>,
    /// Offers are not evaluated until registration has completed.
    initialized: AtomicBool,
    /// Offers enqueued but not yet acted on. Guarded by its own mutex,
    /// held only to mutate, never across a driver call.
    in_progress: Mutex<HashSet<OfferId>>,
    /// Single-threaded mode processes inline on the caller; tests only.
    multithreaded: bool,
}

impl OfferProcessor {
    pub fn new(driver: Arc<dyn Driver>, router: Arc<OfferRouter>, queue: Arc<OfferQueue>) -> Self {
        Self {
            accepter: OfferAccepter::new(driver.clone()),
            driver,
            router,
            queue,
            initialized: AtomicBool::new(false),
            in_progress: Mutex::new(HashSet::new()),
            multithreaded: true,
        }
    }

    /// Switches to synchronous single-threaded mode. Only meaningful
    /// before [`start`](Self::start); used by tests.
    #[must_use]
    pub fn single_threaded(mut self) -> Self {
        self.multithreaded = false;
        self
    }

    /// Starts the consumer and marks the processor initialized.
    pub fn start(self: &Arc<Self>) {
        if self.multithreaded {
            let processor = self.clone();
            tokio::spawn(async move {
                loop {
                    match processor.process_queued_offers().await {
                        Ok(true) => {}
                        Ok(false) => {
                            info!("Offer queue closed, consumer exiting");
                            break;
                        }
                        Err(e) => {
                            // A failed pass leaves offers in an unknown
                            // state; exiting beats running as a zombie.
                            error!(error = %e, "Error processing offers, exiting to avoid zombie state");
                            hard_exit(ExitCode::Error);
                        }
                    }
                }
            });
        }
        self.initialized.store(true, Ordering::SeqCst);
    }

    /// Admits offers from the resource-manager callback.
    ///
    /// Offers rejected by a full queue are declined short immediately. The
    /// rejected offer is removed from the in-progress set only after the
    /// decline call returns, so `await_processed` cannot observe it as
    /// processed while the decline is still in flight.
    pub async fn enqueue(&self, offers: Vec<Offer>) -> Result<(), ProcessorError> {
        {
            let mut in_progress = self.lock_in_progress();
            in_progress.extend(offers.iter().map(|o| o.id.clone()));
            info!(
                enqueued = offers.len(),
                in_progress = in_progress.len(),
                "Enqueuing offers"
            );
        }

        for offer in offers {
            if !self.queue.offer(offer.clone()) {
                warn!(offer_id = %offer.id, "Offer queue is full, declining offer");
                self.decline_short(std::slice::from_ref(&offer)).await?;
                self.lock_in_progress().remove(&offer.id);
            }
        }

        if !self.multithreaded {
            let batch = self.queue.drain_now();
            let outcome = self.evaluate_batch(&batch).await;
            self.finish_batch(&batch);
            outcome?;
        }
        Ok(())
    }

    /// Removes a rescinded offer from the queue.
    pub fn dequeue(&self, offer_id: &OfferId) {
        self.queue.remove(offer_id);
    }

    /// Waits until every enqueued offer has been acted upon. Test hook.
    pub async fn await_processed(&self, timeout: Duration) -> Result<(), ProcessorError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let in_progress = self.lock_in_progress();
                if in_progress.is_empty() {
                    info!("All offers processed");
                    return Ok(());
                }
                debug!(in_progress = in_progress.len(), "Offers still in progress");
            }
            if Instant::now() >= deadline {
                return Err(ProcessorError::Timeout(timeout));
            }
            tokio::time::sleep(AWAIT_PROCESSED_POLL).await;
        }
    }

    /// One consumer iteration: block for a batch, evaluate it, clear the
    /// bookkeeping. Returns `Ok(false)` when the queue has closed.
    async fn process_queued_offers(&self) -> Result<bool, ProcessorError> {
        debug!("Waiting for queued offers");
        let batch = self.queue.take_all().await;
        if batch.is_empty() {
            if self.queue.is_closed() {
                return Ok(false);
            }
            // Registration hasn't completed yet; keep waiting.
            info!("Retrying wait for offers: registration has not completed");
            return Ok(true);
        }

        let started = Instant::now();
        let outcome = self.evaluate_batch(&batch).await;
        debug!(
            offers = batch.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Offer pass complete"
        );
        self.finish_batch(&batch);
        outcome?;
        Ok(true)
    }

    /// Evaluate/clean/decline/accept for one batch.
    async fn evaluate_batch(&self, offers: &[Offer]) -> Result<(), ProcessorError> {
        // Fan the offers out across hosted runs.
        let pass = self.router.handle_offers(offers).await;

        // Sweep the residual offers for reservations nobody should still
        // hold. An agent can be gone long enough for its workload to move
        // elsewhere and then come back, offering stale reservations; those
        // must be returned to the cluster or they leak.
        let cleanup = self.router.unexpected_resources(&pass.unused_offers).await;
        let synthetic: Vec<Offer> = cleanup
            .offer_resources
            .iter()
            .map(|or| or.to_offer())
            .collect();
        let cleaner_recommendations = ResourceCleaner::release_all().evaluate(&synthetic);

        // Offers used by neither evaluation nor cleanup get declined.
        let unused = filter_out_accepted(&pass.unused_offers, &cleaner_recommendations);
        if !unused.is_empty() {
            let long = pass.result == PassResult::Processed
                && cleanup.result != UnexpectedResult::Failed;
            if long {
                self.decline_long(&unused).await?;
            } else {
                self.decline_short(&unused).await?;
            }
        }

        let mut all_recommendations = pass.recommendations;
        all_recommendations.extend(cleaner_recommendations);
        self.accepter.accept(&all_recommendations).await?;

        if pass.result == PassResult::Uninstalled {
            // Last run is gone and the framework itself is uninstalling:
            // deregister. The resource manager confirms via the
            // unregistered callback, which completes the uninstall plan.
            info!("All runs removed, deregistering framework");
            self.router.prepare_deregister();
            self.driver.stop().await?;
        }
        Ok(())
    }

    /// Clears the batch from the in-progress set, regardless of outcome.
    fn finish_batch(&self, batch: &[Offer]) {
        let mut in_progress = self.lock_in_progress();
        for offer in batch {
            in_progress.remove(&offer.id);
        }
        info!(
            processed = batch.len(),
            in_progress = in_progress.len(),
            "Processed queued offers"
        );
    }

    async fn decline_short(&self, offers: &[Offer]) -> Result<(), ProcessorError> {
        self.decline(offers, SHORT_DECLINE_SECONDS).await
    }

    async fn decline_long(&self, offers: &[Offer]) -> Result<(), ProcessorError> {
        self.decline(offers, LONG_DECLINE_SECONDS).await
    }

    async fn decline(&self, offers: &[Offer], refuse_seconds: u64) -> Result<(), ProcessorError> {
        info!(
            offers = offers.len(),
            refuse_seconds, "Declining unused offers"
        );
        for offer in offers {
            self.driver.decline_offer(&offer.id, refuse_seconds).await?;
        }
        Ok(())
    }

    fn lock_in_progress(&self) -> std::sync::MutexGuard<'_, HashSet<OfferId>> {
        self.in_progress.lock().unwrap_or_else(|e| e.into_inner())
    }
}
