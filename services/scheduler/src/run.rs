//! The capability contract a hosted run must satisfy.
//!
//! The scheduler makes no assumption about what a run does internally; it
//! only requires this narrow surface: take offers, disclaim unexpected
//! resources, accept status updates, and convert to an uninstalling
//! replacement on demand.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use flotilla_offers::{Offer, OfferResources, Recommendation, TaskId};

use crate::state::{RunStateStore, StateError};

/// Whether a run is serving its workload or tearing it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Active,
    Uninstalling,
}

/// Verdict of a run's `offers` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferResult {
    /// Offers were evaluated; anything unclaimed is not wanted.
    Processed,
    /// The run could not evaluate offers yet. Retry shortly.
    NotReady,
    /// The run has finished its work and should be switched to uninstall.
    Finished,
    /// The run has finished uninstalling and should be removed.
    Uninstalled,
}

/// Result of one `offers` call: the verdict plus the operations to perform.
#[derive(Debug, Clone)]
pub struct OfferOutcome {
    pub result: OfferResult,
    pub recommendations: Vec<Recommendation>,
}

impl OfferOutcome {
    pub fn processed(recommendations: Vec<Recommendation>) -> Self {
        Self {
            result: OfferResult::Processed,
            recommendations,
        }
    }

    pub fn not_ready() -> Self {
        Self {
            result: OfferResult::NotReady,
            recommendations: Vec::new(),
        }
    }

    pub fn finished() -> Self {
        Self {
            result: OfferResult::Finished,
            recommendations: Vec::new(),
        }
    }

    pub fn uninstalled() -> Self {
        Self {
            result: OfferResult::Uninstalled,
            recommendations: Vec::new(),
        }
    }
}

/// Verdict of an `unexpected_resources` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnexpectedResult {
    Processed,
    /// The run could not fully evaluate. Whatever subset it did identify is
    /// still released; the pass is declined short so it can retry.
    Failed,
}

/// Result of an `unexpected_resources` call: for each offer shown to the
/// run, the subset of resources it agrees should be released.
#[derive(Debug, Clone)]
pub struct UnexpectedOutcome {
    pub result: UnexpectedResult,
    pub offer_resources: Vec<OfferResources>,
}

impl UnexpectedOutcome {
    pub fn processed(offer_resources: Vec<OfferResources>) -> Self {
        Self {
            result: UnexpectedResult::Processed,
            offer_resources,
        }
    }

    pub fn failed(offer_resources: Vec<OfferResources>) -> Self {
        Self {
            result: UnexpectedResult::Failed,
            offer_resources,
        }
    }
}

/// Verdict of a `status` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusResult {
    Processed,
    /// The task does not belong to this run (or to any run).
    UnknownTask,
}

/// A task status update from the resource manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Reason label qualifying the state, e.g. why a task was lost.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TaskStatus {
    pub fn new(task_id: TaskId, state: impl Into<String>) -> Self {
        Self {
            task_id,
            state: state.into(),
            message: None,
            reason: None,
        }
    }
}

/// Capability contract for a hosted run.
#[async_trait]
pub trait Run: Send + Sync {
    /// The run's unique name. Alphanumeric plus hyphens, never `/`.
    fn name(&self) -> &str;

    /// Whether this run is active or uninstalling.
    fn mode(&self) -> RunMode;

    /// The run's private state namespace. Used by the admin API to read
    /// the spec back-reference.
    fn state_store(&self) -> &RunStateStore;

    /// Invoked once after framework registration, or immediately on
    /// admission if registration already happened.
    async fn registered(&self, re_registered: bool);

    /// Evaluates the offers left over by runs earlier in the fan-out order.
    /// Called on every pass, including with an empty list, so the run can
    /// turn its own crank.
    async fn offers(&self, remaining: &[Offer]) -> OfferOutcome;

    /// Asked only with offers containing this run's own reserved
    /// resources. Returns the subset to release.
    async fn unexpected_resources(&self, offers: &[Offer]) -> UnexpectedOutcome;

    /// Routes a status update for one of this run's tasks.
    async fn status(&self, status: &TaskStatus) -> StatusResult;

    /// Produces the uninstalling replacement for this run. Idempotent:
    /// calling it on an uninstalling run yields an equivalent run.
    fn to_uninstall(&self) -> Result<Arc<dyn Run>, StateError>;
}

/// Validates a run name: alphanumeric plus hyphens, non-empty.
#[must_use]
pub fn is_valid_run_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// A minimal active run: holds no reservations and launches nothing.
///
/// Useful for development and as the product of the built-in generator;
/// real deployments register generators producing full scheduler
/// implementations behind the same trait.
pub struct IdleRun {
    name: String,
    state: RunStateStore,
}

impl IdleRun {
    pub fn new(name: impl Into<String>, state: RunStateStore) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }
}

#[async_trait]
impl Run for IdleRun {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> RunMode {
        RunMode::Active
    }

    fn state_store(&self) -> &RunStateStore {
        &self.state
    }

    async fn registered(&self, re_registered: bool) {
        info!(run = %self.name, re_registered, "Run registered");
    }

    async fn offers(&self, _remaining: &[Offer]) -> OfferOutcome {
        OfferOutcome::processed(Vec::new())
    }

    async fn unexpected_resources(&self, offers: &[Offer]) -> UnexpectedOutcome {
        // This run holds no reservations; everything shown is unexpected.
        UnexpectedOutcome::processed(
            offers
                .iter()
                .map(|offer| OfferResources {
                    offer: offer.subset(Vec::new()),
                    resources: offer.resources.clone(),
                })
                .collect(),
        )
    }

    async fn status(&self, status: &TaskStatus) -> StatusResult {
        info!(run = %self.name, task_id = %status.task_id, state = %status.state, "Status update");
        StatusResult::Processed
    }

    fn to_uninstall(&self) -> Result<Arc<dyn Run>, StateError> {
        let uninstall = crate::uninstall::UninstallRun::convert(
            &self.name,
            self.state.clone(),
            Vec::new(),
        )?;
        Ok(Arc::new(uninstall))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPersister;

    #[test]
    fn run_name_validation() {
        assert!(is_valid_run_name("kafka-2"));
        assert!(is_valid_run_name("a"));
        assert!(!is_valid_run_name(""));
        assert!(!is_valid_run_name("a/b"));
        assert!(!is_valid_run_name("a b"));
        assert!(!is_valid_run_name("a_b"));
    }

    #[tokio::test]
    async fn idle_run_consumes_nothing() {
        let persister = Arc::new(MemoryPersister::new());
        let run = IdleRun::new("idle", RunStateStore::new(persister, "idle"));

        let offer = Offer::new("o1", "a1");
        let outcome = run.offers(std::slice::from_ref(&offer)).await;
        assert_eq!(outcome.result, OfferResult::Processed);
        assert!(outcome.recommendations.is_empty());
    }

    #[tokio::test]
    async fn idle_run_disclaims_everything() {
        let persister = Arc::new(MemoryPersister::new());
        let run = IdleRun::new("idle", RunStateStore::new(persister, "idle"));

        let offer = Offer::new("o1", "a1").with_resources(vec![
            flotilla_offers::Resource::reserved(
                "cpus",
                2.0,
                "role",
                "principal",
                Some("idle".to_string()),
                "r1",
            ),
        ]);
        let outcome = run.unexpected_resources(std::slice::from_ref(&offer)).await;
        assert_eq!(outcome.result, UnexpectedResult::Processed);
        assert_eq!(outcome.offer_resources.len(), 1);
        assert_eq!(outcome.offer_resources[0].resources.len(), 1);
    }
}
