//! Task kill tracking.
//!
//! Kill requests are not fire-and-forget: the resource manager can drop
//! them during failover, so requested kills are retried whenever a
//! non-terminal status for the task shows up. Terminal statuses clear the
//! request.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use flotilla_offers::TaskId;

use crate::driver::{Driver, DriverError};
use crate::run::TaskStatus;

/// Status states after which a task cannot come back.
const TERMINAL_STATES: &[&str] = &[
    "TASK_FINISHED",
    "TASK_FAILED",
    "TASK_KILLED",
    "TASK_ERROR",
    "TASK_GONE",
];

/// Reason label on TASK_LOST statuses that answer a reconciliation
/// request. Killing in response to one of these would produce another
/// reconciliation reply, and so on forever.
const REASON_RECONCILIATION: &str = "REASON_RECONCILIATION";

/// Tracks tasks that should be killed until a terminal status confirms it.
pub struct TaskKiller {
    driver: Arc<dyn Driver>,
    pending: Mutex<HashSet<TaskId>>,
}

impl TaskKiller {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Requests that a task be killed, tracking it for retry until a
    /// terminal status arrives.
    pub async fn kill_task(&self, task_id: &TaskId) -> Result<(), DriverError> {
        self.lock_pending().insert(task_id.clone());
        info!(task_id = %task_id, "Requesting task kill");
        self.driver.kill_task(task_id).await
    }

    /// Feeds a status update through the kill bookkeeping.
    ///
    /// Terminal statuses clear any pending kill for the task; a
    /// non-terminal status for a tracked task re-issues the kill. Returns
    /// whether the task is *eligible* for a fresh kill request: statuses
    /// that merely answer a reconciliation request are not, because a kill
    /// issued against one would only generate another such answer.
    pub async fn handle_status(&self, status: &TaskStatus) -> bool {
        let terminal = TERMINAL_STATES.contains(&status.state.as_str());
        let was_pending = if terminal {
            self.lock_pending().remove(&status.task_id)
        } else {
            self.lock_pending().contains(&status.task_id)
        };

        if terminal {
            if was_pending {
                info!(task_id = %status.task_id, state = %status.state,
                    "Tracked task reached terminal state");
            }
            return false;
        }

        if was_pending {
            // Still alive after a kill request; ask again.
            info!(task_id = %status.task_id, state = %status.state, "Retrying task kill");
            if let Err(e) = self.driver.kill_task(&status.task_id).await {
                warn!(task_id = %status.task_id, error = %e, "Failed to retry task kill");
            }
            return false;
        }

        status
            .reason
            .as_deref()
            .is_none_or(|reason| reason != REASON_RECONCILIATION)
    }

    /// Number of kills awaiting confirmation.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashSet<TaskId>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
