//! Resource-manager driver seam.
//!
//! The transport to the cluster resource manager lives out of process; the
//! scheduler only depends on this narrow capability. The handle is threaded
//! through constructors rather than parked in a process-global so that
//! tests can inject their own.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use flotilla_offers::{OfferId, Operation, TaskId};

/// Refusal interval for offers the scheduler could not evaluate yet
/// (not registered, queue overflow, no hosted runs). Small so the offer
/// comes back quickly.
pub const SHORT_DECLINE_SECONDS: u64 = 5;

/// Refusal interval for offers that were evaluated and not wanted.
pub const LONG_DECLINE_SECONDS: u64 = 1200;

/// Refusal interval attached to accept calls for whatever portion of the
/// offered resources the operations leave unused.
pub const ACCEPT_REFUSE_SECONDS: u64 = 1;

/// Errors surfaced by driver calls.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The driver is gone. There is no recovering from this in-process.
    #[error("driver unavailable: {0}")]
    Unavailable(String),
}

/// Capability the resource-manager transport must provide.
///
/// Accept calls target a single agent; the accepter (not the transport)
/// is responsible for grouping. Operation order within one call is
/// preserved on the wire.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Accepts the identified offers, applying `operations` in order.
    async fn accept_offers(
        &self,
        offer_ids: &[OfferId],
        operations: &[Operation],
        refuse_seconds: u64,
    ) -> Result<(), DriverError>;

    /// Declines a single offer for `refuse_seconds`.
    async fn decline_offer(&self, offer_id: &OfferId, refuse_seconds: u64)
        -> Result<(), DriverError>;

    /// Requests that the identified task be killed.
    async fn kill_task(&self, task_id: &TaskId) -> Result<(), DriverError>;

    /// Requests status reconciliation. An empty task set asks for the
    /// status of every task the resource manager knows about.
    async fn reconcile_tasks(&self, task_ids: &[TaskId]) -> Result<(), DriverError>;

    /// Stops the driver, deregistering the framework from the resource
    /// manager. The transport answers with an `unregistered` callback.
    async fn stop(&self) -> Result<(), DriverError>;
}

/// A recorded accept call.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptCall {
    pub offer_ids: Vec<OfferId>,
    pub operations: Vec<Operation>,
    pub refuse_seconds: u64,
}

/// A recorded decline call.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclineCall {
    pub offer_id: OfferId,
    pub refuse_seconds: u64,
}

/// Mock driver for development and tests. Records every call.
#[derive(Default)]
pub struct MockDriver {
    accepts: Mutex<Vec<AcceptCall>>,
    declines: Mutex<Vec<DeclineCall>>,
    kills: Mutex<Vec<TaskId>>,
    reconciles: Mutex<usize>,
    stopped: Mutex<bool>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept calls recorded so far.
    pub async fn accepts(&self) -> Vec<AcceptCall> {
        self.accepts.lock().await.clone()
    }

    /// Decline calls recorded so far.
    pub async fn declines(&self) -> Vec<DeclineCall> {
        self.declines.lock().await.clone()
    }

    /// Kill requests recorded so far.
    pub async fn kills(&self) -> Vec<TaskId> {
        self.kills.lock().await.clone()
    }

    /// Reconciliation requests recorded so far.
    pub async fn reconciles(&self) -> usize {
        *self.reconciles.lock().await
    }

    /// Whether `stop` has been called.
    pub async fn stopped(&self) -> bool {
        *self.stopped.lock().await
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn accept_offers(
        &self,
        offer_ids: &[OfferId],
        operations: &[Operation],
        refuse_seconds: u64,
    ) -> Result<(), DriverError> {
        info!(
            offers = offer_ids.len(),
            operations = operations.len(),
            "[MOCK] Accepting offers"
        );
        self.accepts.lock().await.push(AcceptCall {
            offer_ids: offer_ids.to_vec(),
            operations: operations.to_vec(),
            refuse_seconds,
        });
        Ok(())
    }

    async fn decline_offer(
        &self,
        offer_id: &OfferId,
        refuse_seconds: u64,
    ) -> Result<(), DriverError> {
        self.declines.lock().await.push(DeclineCall {
            offer_id: offer_id.clone(),
            refuse_seconds,
        });
        Ok(())
    }

    async fn kill_task(&self, task_id: &TaskId) -> Result<(), DriverError> {
        info!(task_id = %task_id, "[MOCK] Killing task");
        self.kills.lock().await.push(task_id.clone());
        Ok(())
    }

    async fn reconcile_tasks(&self, task_ids: &[TaskId]) -> Result<(), DriverError> {
        info!(tasks = task_ids.len(), "[MOCK] Reconciling tasks");
        *self.reconciles.lock().await += 1;
        Ok(())
    }

    async fn stop(&self) -> Result<(), DriverError> {
        info!("[MOCK] Stopping driver");
        *self.stopped.lock().await = true;
        Ok(())
    }
}
