//! Uninstall machinery: the per-run uninstalling variant and the
//! framework-wide deregistration plan.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use flotilla_offers::{Offer, OfferResources, Resource, ResourceId};

use crate::run::{
    OfferOutcome, Run, RunMode, StatusResult, TaskStatus, UnexpectedOutcome,
};
use crate::state::{RunStateStore, StateError};

/// Status of an uninstall step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Prepared,
    Complete,
}

/// Step which advertises that the framework has been deregistered.
pub struct DeregisterStep {
    status: Mutex<StepStatus>,
}

impl DeregisterStep {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(StepStatus::Pending),
        }
    }

    /// Marks deregistration as underway.
    pub fn start(&self) {
        let mut status = self.lock();
        if *status == StepStatus::Pending {
            info!("Setting framework deregistration state to PREPARED");
            *status = StepStatus::Prepared;
        }
    }

    /// Marks this step complete after the resource manager confirms
    /// deregistration. At this point the uninstall plan is complete.
    pub fn set_complete(&self) {
        info!("Completed framework deregistration");
        *self.lock() = StepStatus::Complete;
    }

    pub fn status(&self) -> StepStatus {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StepStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for DeregisterStep {
    fn default() -> Self {
        Self::new()
    }
}

/// The framework-wide uninstall plan: a single deregistration phase with a
/// single step. Built only when the whole framework is being torn down.
pub struct UninstallPlan {
    step: DeregisterStep,
}

impl UninstallPlan {
    pub const PHASE_NAME: &'static str = "deregister-framework";
    pub const STEP_NAME: &'static str = "deregister";

    pub fn new() -> Self {
        Self {
            step: DeregisterStep::new(),
        }
    }

    pub fn step(&self) -> &DeregisterStep {
        &self.step
    }

    pub fn is_complete(&self) -> bool {
        self.step.status() == StepStatus::Complete
    }
}

impl Default for UninstallPlan {
    fn default() -> Self {
        Self::new()
    }
}

/// The uninstalling variant of a hosted run.
///
/// Holds the set of reservation ids the departed workload may still be
/// holding. Every resource the cleanup protocol shows it is disclaimed and
/// struck from that set; once nothing remains the run erases its state
/// namespace and reports `Uninstalled` so the registry can drop it.
pub struct UninstallRun {
    name: String,
    state: RunStateStore,
    remaining: Mutex<HashSet<ResourceId>>,
}

impl UninstallRun {
    /// Converts an active run to its uninstalling replacement, recording
    /// the uninstall intent in the run's namespace so a restart resumes in
    /// uninstall mode.
    pub fn convert(
        name: &str,
        state: RunStateStore,
        expected: Vec<Resource>,
    ) -> Result<Self, StateError> {
        state.set_uninstalling()?;
        let remaining: HashSet<ResourceId> = expected
            .iter()
            .filter_map(|r| r.resource_id().cloned())
            .collect();
        info!(
            run = name,
            reservations = remaining.len(),
            "Run switched to uninstall"
        );
        Ok(Self {
            name: name.to_string(),
            state,
            remaining: Mutex::new(remaining),
        })
    }

    /// Reconstructs an uninstalling run after a restart. Reservation ids
    /// that were already released stay released; anything the cluster still
    /// offers under this run's name will be disclaimed when it shows up.
    pub fn resume(
        name: &str,
        state: RunStateStore,
        expected: Vec<Resource>,
    ) -> Result<Self, StateError> {
        Self::convert(name, state, expected)
    }

    /// Reservation ids not yet confirmed released.
    pub fn remaining_resource_ids(&self) -> HashSet<ResourceId> {
        self.lock_remaining().clone()
    }

    fn lock_remaining(&self) -> std::sync::MutexGuard<'_, HashSet<ResourceId>> {
        self.remaining.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Run for UninstallRun {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> RunMode {
        RunMode::Uninstalling
    }

    fn state_store(&self) -> &RunStateStore {
        &self.state
    }

    async fn registered(&self, re_registered: bool) {
        info!(run = %self.name, re_registered, "Uninstalling run registered");
    }

    async fn offers(&self, _remaining: &[Offer]) -> OfferOutcome {
        if !self.lock_remaining().is_empty() {
            // Reservations are still outstanding; short-declining keeps the
            // offers coming back so the cleanup protocol can see them.
            return OfferOutcome::not_ready();
        }

        match self.state.clear() {
            Ok(()) => {
                info!(run = %self.name, "Uninstall complete, state cleared");
                OfferOutcome::uninstalled()
            }
            Err(e) => {
                tracing::warn!(run = %self.name, error = %e, "Failed to clear run state");
                OfferOutcome::not_ready()
            }
        }
    }

    async fn unexpected_resources(&self, offers: &[Offer]) -> UnexpectedOutcome {
        // Everything this run ever held is unexpected now. Strike the
        // released ids from the remaining set.
        let mut remaining = self.lock_remaining();
        let mut released = Vec::new();
        for offer in offers {
            for resource in &offer.resources {
                if let Some(id) = resource.resource_id() {
                    remaining.remove(id);
                }
            }
            released.push(OfferResources {
                offer: offer.subset(Vec::new()),
                resources: offer.resources.clone(),
            });
        }
        info!(
            run = %self.name,
            outstanding = remaining.len(),
            "Disclaimed resources for uninstalling run"
        );
        UnexpectedOutcome::processed(released)
    }

    async fn status(&self, status: &TaskStatus) -> StatusResult {
        info!(run = %self.name, task_id = %status.task_id, state = %status.state,
            "Status update for uninstalling run");
        StatusResult::Processed
    }

    fn to_uninstall(&self) -> Result<Arc<dyn Run>, StateError> {
        // Already uninstalling; produce an equivalent replacement.
        Ok(Arc::new(Self {
            name: self.name.clone(),
            state: self.state.clone(),
            remaining: Mutex::new(self.lock_remaining().clone()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{OfferResult, UnexpectedResult};
    use crate::state::UNINSTALLING_PROPERTY;
    use crate::storage::MemoryPersister;

    fn reserved(rid: &str) -> Resource {
        Resource::reserved(
            "cpus",
            1.0,
            "role",
            "principal",
            Some("svc".to_string()),
            rid,
        )
    }

    #[test]
    fn deregister_step_transitions() {
        let step = DeregisterStep::new();
        assert_eq!(step.status(), StepStatus::Pending);
        step.start();
        assert_eq!(step.status(), StepStatus::Prepared);
        // start() is only meaningful from PENDING.
        step.start();
        assert_eq!(step.status(), StepStatus::Prepared);
        step.set_complete();
        assert_eq!(step.status(), StepStatus::Complete);
    }

    #[tokio::test]
    async fn uninstall_run_waits_for_reservations() {
        let persister = Arc::new(MemoryPersister::new());
        let state = RunStateStore::new(persister, "svc");
        let run =
            UninstallRun::convert("svc", state.clone(), vec![reserved("r1"), reserved("r2")])
                .unwrap();
        assert!(state.is_uninstalling().unwrap());

        // Reservations outstanding: not done yet.
        let outcome = run.offers(&[]).await;
        assert_eq!(outcome.result, OfferResult::NotReady);

        // Cleanup shows it one of its reservations.
        let offer = Offer::new("o1", "a1").with_resources(vec![reserved("r1")]);
        let unexpected = run.unexpected_resources(std::slice::from_ref(&offer)).await;
        assert_eq!(unexpected.result, UnexpectedResult::Processed);
        assert_eq!(unexpected.offer_resources[0].resources.len(), 1);
        assert_eq!(run.offers(&[]).await.result, OfferResult::NotReady);

        // The second reservation comes back; now everything is released.
        let offer = Offer::new("o2", "a1").with_resources(vec![reserved("r2")]);
        run.unexpected_resources(std::slice::from_ref(&offer)).await;
        assert_eq!(run.offers(&[]).await.result, OfferResult::Uninstalled);
    }

    #[tokio::test]
    async fn uninstall_completion_clears_namespace() {
        let persister = Arc::new(MemoryPersister::new());
        let state = RunStateStore::new(persister.clone(), "svc");
        state.store_task("node-0", b"record").unwrap();

        let run = UninstallRun::convert("svc", state, Vec::new()).unwrap();
        assert_eq!(run.offers(&[]).await.result, OfferResult::Uninstalled);
        assert!(persister.paths().is_empty());
    }

    #[tokio::test]
    async fn resume_restores_uninstall_mode() {
        let persister = Arc::new(MemoryPersister::new());
        let state = RunStateStore::new(persister.clone(), "svc");
        state.store_property(UNINSTALLING_PROPERTY, b"1").unwrap();

        let run = UninstallRun::resume("svc", state, Vec::new()).unwrap();
        assert_eq!(run.mode(), RunMode::Uninstalling);
        assert_eq!(run.offers(&[]).await.result, OfferResult::Uninstalled);
    }
}
