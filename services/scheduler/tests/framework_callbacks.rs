//! Framework callback surface: registration latching, offer gating, and
//! status-driven task kills.


use std::sync::Arc;

use flotilla_offers::{FrameworkId, OfferId, TaskId};
use flotilla_scheduler::driver::{MockDriver, SHORT_DECLINE_SECONDS};
use flotilla_scheduler::framework::FrameworkHandler;
use flotilla_scheduler::processor::OfferProcessor;
use flotilla_scheduler::queue::OfferQueue;
use flotilla_scheduler::reconcile::{ImplicitReconciler, ReconcilerConfig};
use flotilla_scheduler::run::TaskStatus;
use flotilla_scheduler::storage::{MemoryPersister, Persister};
use tokio::sync::watch;

use harness::{offer, router_fixture, OfferScript, ScriptedRun};

struct Fixture {
    driver: Arc<MockDriver>,
    queue: Arc<OfferQueue>,
    handler: FrameworkHandler,
    manager: Arc<flotilla_scheduler::manager::RunManager>,
    persister: Arc<MemoryPersister>,
    _shutdown_tx: watch::Sender<bool>,
}

fn fixture() -> Fixture {
    let (manager, router, _) = router_fixture(false);
    let driver = Arc::new(MockDriver::new());
    let queue = Arc::new(OfferQueue::new(0));
    let processor = Arc::new(OfferProcessor::new(
        driver.clone(),
        router.clone(),
        queue.clone(),
    ));
    let persister = Arc::new(MemoryPersister::new());
    let reconciler = Arc::new(ImplicitReconciler::new(
        driver.clone(),
        ReconcilerConfig::default(),
    ));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let handler = FrameworkHandler::new(
        driver.clone(),
        processor,
        router,
        persister.clone() as Arc<dyn Persister>,
        reconciler,
        shutdown_rx,
    );
    Fixture {
        driver,
        queue,
        handler,
        manager,
        persister,
        _shutdown_tx,
    }
}

#[tokio::test]
async fn offers_before_api_ready_are_declined_short() {
    let f = fixture();

    f.handler
        .resource_offers(vec![offer("o1"), offer("o2")])
        .await;

    let declines = f.driver.declines().await;
    assert_eq!(declines.len(), 2);
    assert!(declines.iter().all(|d| d.refuse_seconds == SHORT_DECLINE_SECONDS));
    assert!(f.queue.is_empty());
}

#[tokio::test]
async fn offers_after_api_ready_are_enqueued() {
    let f = fixture();
    f.handler.set_api_ready();

    f.handler
        .resource_offers(vec![offer("o1"), offer("o2")])
        .await;

    assert_eq!(f.queue.len(), 2);
    assert!(f.driver.declines().await.is_empty());
}

#[tokio::test]
async fn registration_persists_framework_id_and_notifies_runs() {
    let f = fixture();
    let run = Arc::new(ScriptedRun::new("r1", OfferScript::NoChanges));
    let log = run.log.clone();
    f.manager.put(run).await.unwrap();

    f.handler.registered(FrameworkId::new("fw-123")).await;

    assert_eq!(
        f.persister.get("FrameworkID").unwrap().unwrap(),
        b"fw-123"
    );
    assert_eq!(
        f.handler.stored_framework_id(),
        Some(FrameworkId::new("fw-123"))
    );
    assert_eq!(log.registered_calls(), vec![false]);

    // A replayed registration (master election) is a re-registration.
    f.handler.registered(FrameworkId::new("fw-123")).await;
    assert_eq!(log.registered_calls(), vec![false, true]);
}

#[tokio::test]
async fn unknown_task_status_requests_kill() {
    let f = fixture();

    f.handler
        .status_update(TaskStatus::new(
            TaskId::for_run("ghost", "node-0", "uuid-1"),
            "TASK_RUNNING",
        ))
        .await;

    let kills = f.driver.kills().await;
    assert_eq!(kills.len(), 1);
    assert_eq!(kills[0].run_name(), Some("ghost"));
}

#[tokio::test]
async fn reconciliation_answer_for_unknown_task_is_not_rekilled() {
    let f = fixture();

    let mut status = TaskStatus::new(
        TaskId::for_run("ghost", "node-0", "uuid-1"),
        "TASK_LOST",
    );
    status.reason = Some("REASON_RECONCILIATION".to_string());
    f.handler.status_update(status).await;

    // Killing in response would only provoke another reconciliation
    // answer.
    assert!(f.driver.kills().await.is_empty());
}

#[tokio::test]
async fn owned_task_status_is_not_killed() {
    let f = fixture();
    f.manager
        .put(Arc::new(ScriptedRun::new("alpha", OfferScript::NoChanges)))
        .await
        .unwrap();

    f.handler
        .status_update(TaskStatus::new(
            TaskId::for_run("alpha", "node-0", "uuid-1"),
            "TASK_RUNNING",
        ))
        .await;

    assert!(f.driver.kills().await.is_empty());
}

#[tokio::test]
async fn rescinded_offer_leaves_the_queue() {
    let f = fixture();
    f.handler.set_api_ready();
    f.handler
        .resource_offers(vec![offer("o1"), offer("o2")])
        .await;

    f.handler.offer_rescinded(OfferId::new("o1"));
    assert_eq!(f.queue.len(), 1);
}
