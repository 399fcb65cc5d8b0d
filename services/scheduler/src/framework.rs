//! Resource-manager callback surface.
//!
//! The transport delivers framework-level events here; this layer owns the
//! registration latch, persists the assigned framework id, gates offers on
//! API readiness, and maps fatal conditions to process exit codes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use flotilla_offers::{AgentId, FrameworkId, Offer, OfferId};

use crate::driver::{Driver, SHORT_DECLINE_SECONDS};
use crate::exit::{hard_exit, ExitCode};
use crate::kill::TaskKiller;
use crate::processor::OfferProcessor;
use crate::reconcile::ImplicitReconciler;
use crate::router::OfferRouter;
use crate::run::{StatusResult, TaskStatus};
use crate::storage::Persister;

/// Root-level record holding the framework id across restarts.
const FRAMEWORK_ID_PATH: &str = "FrameworkID";

/// Receives callbacks from the resource-manager transport.
pub struct FrameworkHandler {
    driver: Arc<dyn Driver>,
    processor: Arc<OfferProcessor>,
    router: Arc<OfferRouter>,
    persister: Arc<dyn Persister>,
    killer: TaskKiller,
    reconciler: Arc<ImplicitReconciler>,
    /// Signals background loops to stop when the process winds down.
    shutdown: watch::Receiver<bool>,
    /// Set on the first registration; later registrations are re-registrations.
    register_started: AtomicBool,
    /// Offers are declined short until the admin API is serving.
    ready_to_accept_offers: AtomicBool,
}

impl FrameworkHandler {
    pub fn new(
        driver: Arc<dyn Driver>,
        processor: Arc<OfferProcessor>,
        router: Arc<OfferRouter>,
        persister: Arc<dyn Persister>,
        reconciler: Arc<ImplicitReconciler>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            killer: TaskKiller::new(driver.clone()),
            driver,
            processor,
            router,
            persister,
            reconciler,
            shutdown,
            register_started: AtomicBool::new(false),
            ready_to_accept_offers: AtomicBool::new(false),
        }
    }

    /// Marks the admin API as serving; offers are evaluated from here on.
    pub fn set_api_ready(&self) {
        self.ready_to_accept_offers.store(true, Ordering::SeqCst);
    }

    /// The framework id stored by a previous registration, if any.
    pub fn stored_framework_id(&self) -> Option<FrameworkId> {
        match self.persister.get(FRAMEWORK_ID_PATH) {
            Ok(bytes) => bytes.map(|b| FrameworkId::new(String::from_utf8_lossy(&b).into_owned())),
            Err(e) => {
                warn!(error = %e, "Failed to read stored framework id");
                None
            }
        }
    }

    /// Framework registered with the resource manager.
    pub async fn registered(&self, framework_id: FrameworkId) {
        if self.register_started.swap(true, Ordering::SeqCst) {
            // A master election can replay the registration callback.
            info!("Already registered, treating as re-registration");
            self.reregistered().await;
            return;
        }

        info!(framework_id = %framework_id, "Registered framework");
        if let Err(e) = self
            .persister
            .set(FRAMEWORK_ID_PATH, framework_id.as_str().as_bytes())
        {
            error!(framework_id = %framework_id, error = %e, "Unable to store framework id");
            hard_exit(ExitCode::RegistrationFailure);
        }

        self.router.registered(false).await;

        // Start the background loops: the offer consumer and the
        // reconciliation crank.
        self.processor.start();
        self.reconciler.start(self.shutdown.clone());
    }

    /// Framework re-registered after a master election.
    pub async fn reregistered(&self) {
        info!("Re-registered with resource manager");
        self.router.registered(true).await;
    }

    /// A batch of resource offers arrived.
    pub async fn resource_offers(&self, offers: Vec<Offer>) {
        if !self.ready_to_accept_offers.load(Ordering::SeqCst) {
            info!(
                offers = offers.len(),
                "Declining offers: waiting for API server to start"
            );
            for offer in &offers {
                if let Err(e) = self
                    .driver
                    .decline_offer(&offer.id, SHORT_DECLINE_SECONDS)
                    .await
                {
                    error!(error = %e, "Failed to decline offer before readiness");
                    hard_exit(ExitCode::Error);
                }
            }
            return;
        }

        if let Err(e) = self.processor.enqueue(offers).await {
            error!(error = %e, "Failed to enqueue offers");
            hard_exit(ExitCode::Error);
        }
    }

    /// A task status update arrived.
    pub async fn status_update(&self, status: TaskStatus) {
        info!(
            task_id = %status.task_id,
            state = %status.state,
            "Received status update"
        );
        let verdict = self.router.handle_status(&status).await;
        let eligible_to_kill = self.killer.handle_status(&status).await;
        match verdict {
            StatusResult::Processed => {}
            StatusResult::UnknownTask => {
                if eligible_to_kill {
                    // Nobody owns this task; make sure it isn't left
                    // running.
                    info!(task_id = %status.task_id, "Unknown task, requesting kill");
                    if let Err(e) = self.killer.kill_task(&status.task_id).await {
                        warn!(task_id = %status.task_id, error = %e, "Failed to request task kill");
                    }
                } else {
                    warn!(
                        task_id = %status.task_id,
                        "Unknown task, but not eligible for another kill"
                    );
                }
            }
        }
    }

    /// A previously presented offer was rescinded.
    pub fn offer_rescinded(&self, offer_id: OfferId) {
        info!(offer_id = %offer_id, "Rescinding offer");
        self.processor.dequeue(&offer_id);
    }

    /// Executor-to-scheduler messages are not part of this scheduler's
    /// protocol.
    pub fn framework_message(&self, agent_id: AgentId, data_len: usize) {
        error!(
            agent = %agent_id,
            bytes = data_len,
            "Received unsupported framework message"
        );
    }

    /// The resource manager confirmed framework deregistration.
    pub fn unregistered(&self) {
        self.router.unregistered();
    }

    /// Connection to the resource manager was lost. Fatal.
    pub fn disconnected(&self) -> ! {
        error!("Disconnected from resource manager, shutting down");
        hard_exit(ExitCode::Disconnected);
    }

    /// An agent was lost. The resource manager will resend status for any
    /// affected tasks.
    pub fn agent_lost(&self, agent_id: AgentId) {
        warn!(agent = %agent_id, "Agent lost");
    }

    /// An executor was lost.
    pub fn executor_lost(&self, agent_id: AgentId, executor_id: String) {
        warn!(agent = %agent_id, executor = %executor_id, "Executor lost");
    }

    /// The driver reported an unrecoverable error. Fatal.
    pub fn error(&self, message: String) -> ! {
        error!(message = %message, "Resource-manager driver error, shutting down");
        hard_exit(ExitCode::Error);
    }
}
