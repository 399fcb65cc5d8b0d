//! Event router: fans offers and status updates out to hosted runs.
//!
//! One router instance sits between the offer processor and the runs. A
//! single offer pass walks every run in admission order, letting each
//! consume from what its predecessors left, then sweeps the residual
//! offers for reserved resources nobody should be holding anymore.

use std::sync::Arc;

use tracing::{error, info, warn};

use flotilla_offers::{
    util::filter_out_accepted, Offer, OfferResources, Recommendation, ReservationInventory,
};

use crate::manager::RunManager;
use crate::run::{OfferResult, StatusResult, TaskStatus, UnexpectedOutcome, UnexpectedResult};
use crate::uninstall::{StepStatus, UninstallPlan};

/// Callback invoked after a run has completed its uninstall and been
/// removed from the registry. Never invoked under a registry lock.
pub type UninstallCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Overall verdict of one offer pass across all runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassResult {
    /// Runs evaluated the offers; unused offers can be declined long.
    Processed,
    /// At least one run (or the scheduler itself) was not ready; unused
    /// offers should be declined short.
    NotReady,
    /// The framework is uninstalling and the last run is gone; the caller
    /// should tear down the framework and then report `unregistered`.
    Uninstalled,
}

/// Result of one offer pass.
#[derive(Debug)]
pub struct OfferPass {
    pub result: PassResult,
    pub recommendations: Vec<Recommendation>,
    /// Offers no run consumed, in their surviving order.
    pub unused_offers: Vec<Offer>,
}

/// Routes resource-manager events to the hosted runs.
pub struct OfferRouter {
    manager: Arc<RunManager>,
    /// Present only when the framework itself is being torn down.
    uninstall_plan: Option<UninstallPlan>,
    uninstall_callback: UninstallCallback,
}

impl OfferRouter {
    /// Creates a router. `framework_uninstall` builds the one-step
    /// deregistration plan, putting the whole framework into teardown mode.
    pub fn new(
        manager: Arc<RunManager>,
        framework_uninstall: bool,
        uninstall_callback: UninstallCallback,
    ) -> Self {
        Self {
            manager,
            uninstall_plan: framework_uninstall.then(UninstallPlan::new),
            uninstall_callback,
        }
    }

    /// Notifies hosted runs of (re-)registration.
    pub async fn registered(&self, re_registered: bool) {
        self.manager.registered(re_registered).await;
    }

    /// Called when the resource manager confirms framework deregistration.
    pub fn unregistered(&self) {
        match &self.uninstall_plan {
            Some(plan) => plan.step().set_complete(),
            None => {
                // Only reachable after an offers() pass answered
                // Uninstalled, which requires the plan to exist.
                error!("unregistered() called, but the framework is not uninstalling");
            }
        }
    }

    /// Marks framework deregistration as underway.
    pub fn prepare_deregister(&self) {
        if let Some(plan) = &self.uninstall_plan {
            plan.step().start();
        }
    }

    /// Deregistration progress, when the framework is uninstalling.
    #[must_use]
    pub fn deregister_status(&self) -> Option<StepStatus> {
        self.uninstall_plan.as_ref().map(|p| p.step().status())
    }

    /// Fans the provided offers out to every hosted run in admission
    /// order. Each run sees only what its predecessors left unconsumed;
    /// runs are pinged even once the offer list is empty so they can drive
    /// their own plans.
    pub async fn handle_offers(&self, offers: &[Offer]) -> OfferPass {
        let mut no_clients = false;
        let mut any_not_ready = false;
        let mut recommendations: Vec<Recommendation> = Vec::new();
        let mut remaining: Vec<Offer> = offers.to_vec();
        let mut finished_runs: Vec<String> = Vec::new();
        let mut uninstalled_runs: Vec<String> = Vec::new();

        {
            let guard = self.manager.read().await;
            let runs = guard.snapshot();
            info!(offers = offers.len(), runs = runs.len(), "Fanning out offers");
            if runs.is_empty() {
                // No hosted runs means WE are not ready (or, when
                // uninstalling, that teardown can proceed).
                no_clients = true;
            }
            for run in runs {
                let outcome = run.offers(&remaining).await;
                if !remaining.is_empty() && !outcome.recommendations.is_empty() {
                    remaining = filter_out_accepted(&remaining, &outcome.recommendations);
                }
                info!(
                    run = %run.name(),
                    result = ?outcome.result,
                    recommendations = outcome.recommendations.len(),
                    offers_remaining = remaining.len(),
                    "Run offer result"
                );
                recommendations.extend(outcome.recommendations);
                match outcome.result {
                    OfferResult::Finished => finished_runs.push(run.name().to_string()),
                    OfferResult::Uninstalled => uninstalled_runs.push(run.name().to_string()),
                    OfferResult::NotReady => any_not_ready = true,
                    OfferResult::Processed => {}
                }
            }
        }

        if !finished_runs.is_empty() {
            // Takes the exclusive lock internally; must be outside the
            // shared lock above.
            self.manager.start_uninstall(&finished_runs).await;
        }

        if !uninstalled_runs.is_empty() {
            let remaining_count = self.manager.remove(&uninstalled_runs).await;
            no_clients = remaining_count == 0;

            // Callbacks may re-enter the manager; invoke them only once
            // every lock is released.
            for run_name in &uninstalled_runs {
                (self.uninstall_callback)(run_name);
            }
        }

        let result = if no_clients && self.uninstall_plan.is_some() {
            // Every run is gone and the framework itself is uninstalling:
            // the caller can proceed with framework teardown and will
            // report unregistered() when the resource manager confirms.
            PassResult::Uninstalled
        } else if no_clients || any_not_ready {
            PassResult::NotReady
        } else {
            PassResult::Processed
        };

        OfferPass {
            result,
            recommendations,
            unused_offers: remaining,
        }
    }

    /// Sweeps residual offers for reserved resources to reclaim.
    ///
    /// Reserved resources are unexpected when they lack a service label
    /// (malformed), when their service is unknown (stale), or when their
    /// own service disclaims them. Each known service is queried once,
    /// with synthetic offers containing only its resources.
    pub async fn unexpected_resources(&self, unused_offers: &[Offer]) -> UnexpectedOutcome {
        let inventory = ReservationInventory::classify(unused_offers);
        info!(
            offers = unused_offers.len(),
            services = inventory.by_service.len(),
            "Sorted reserved resources by owning service"
        );
        if !inventory.malformed.is_empty() {
            warn!(
                resources = inventory.malformed_resource_count(),
                "Encountered reserved resources with no service label"
            );
        }

        let mut unexpected: Vec<OfferResources> = Vec::new();
        for bucket in &inventory.malformed {
            merge_bucket(&mut unexpected, bucket);
        }

        let mut any_failed = false;
        for (service, buckets) in &inventory.by_service {
            match self.manager.get(service).await {
                None => {
                    // Stale reservations from a run that no longer exists.
                    info!(service = %service, "Unknown service, all resources unexpected");
                    for bucket in buckets {
                        merge_bucket(&mut unexpected, bucket);
                    }
                }
                Some(run) => {
                    let synthetic: Vec<Offer> =
                        buckets.iter().map(OfferResources::to_offer).collect();
                    let outcome = run.unexpected_resources(&synthetic).await;
                    info!(
                        service = %service,
                        result = ?outcome.result,
                        resources = outcome
                            .offer_resources
                            .iter()
                            .map(|or| or.resources.len())
                            .sum::<usize>(),
                        "Service cleanup result"
                    );
                    if outcome.result == UnexpectedResult::Failed {
                        // The identified subset is still released; the
                        // pass is marked failed so unused offers get a
                        // short decline and the service can retry.
                        any_failed = true;
                    }
                    for bucket in &outcome.offer_resources {
                        merge_bucket(&mut unexpected, bucket);
                    }
                }
            }
        }

        if any_failed {
            UnexpectedOutcome::failed(unexpected)
        } else {
            UnexpectedOutcome::processed(unexpected)
        }
    }

    /// Routes a status update to the run that owns the task.
    pub async fn handle_status(&self, status: &TaskStatus) -> StatusResult {
        let Some(run_name) = status.task_id.run_name() else {
            error!(
                task_id = %status.task_id,
                "Received task status with malformed id, unable to route"
            );
            return StatusResult::UnknownTask;
        };

        match self.manager.get(run_name).await {
            None => {
                info!(
                    run = %run_name,
                    task_id = %status.task_id,
                    "Received task status for unknown run"
                );
                StatusResult::UnknownTask
            }
            Some(run) => {
                info!(
                    run = %run_name,
                    task_id = %status.task_id,
                    state = %status.state,
                    "Routing task status"
                );
                run.status(status).await
            }
        }
    }
}

/// Merges a bucket into the accumulated unexpected list, combining entries
/// for the same offer while preserving first-appearance order.
fn merge_bucket(unexpected: &mut Vec<OfferResources>, bucket: &OfferResources) {
    match unexpected
        .iter_mut()
        .find(|entry| entry.offer.id == bucket.offer.id)
    {
        Some(entry) => entry.resources.extend(bucket.resources.iter().cloned()),
        None => unexpected.push(bucket.clone()),
    }
}
