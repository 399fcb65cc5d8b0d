//! Offer fan-out, cleanup-protocol, and uninstall-flow tests for the
//! event router.


use std::sync::Arc;

use flotilla_offers::TaskId;
use flotilla_scheduler::router::PassResult;
use flotilla_scheduler::run::{RunMode, StatusResult, TaskStatus, UnexpectedResult};

use harness::{
    offer, orphan_reserved, reserved_for, router_fixture, CleanupScript, OfferScript, ScriptedRun,
};

#[tokio::test]
async fn fan_out_consumption_is_observable_downstream() {
    let (manager, router, _) = router_fixture(false);

    let r1 = Arc::new(ScriptedRun::new("r1", OfferScript::ConsumeFirst));
    let r2 = Arc::new(ScriptedRun::new("r2", OfferScript::ConsumeLast));
    let r3 = Arc::new(ScriptedRun::new("r3", OfferScript::NoChanges));
    let (log1, log2, log3) = (r1.log.clone(), r2.log.clone(), r3.log.clone());
    for run in [r1, r2, r3] {
        manager.put(run).await.unwrap();
    }

    let offers: Vec<_> = (1..=7).map(|i| offer(&format!("o{i}"))).collect();
    let pass = router.handle_offers(&offers).await;

    assert_eq!(pass.result, PassResult::Processed);

    // r1 ate o1, r2 ate o7, r3 consumed nothing.
    assert_eq!(pass.recommendations.len(), 2);
    let rec_ids: Vec<&str> = pass
        .recommendations
        .iter()
        .map(|r| r.offer_id.as_str())
        .collect();
    assert_eq!(rec_ids, vec!["o1", "o7"]);

    // Each run saw what its predecessors left.
    assert_eq!(
        log1.offers_seen(),
        vec![vec!["o1", "o2", "o3", "o4", "o5", "o6", "o7"]]
    );
    assert_eq!(
        log2.offers_seen(),
        vec![vec!["o2", "o3", "o4", "o5", "o6", "o7"]]
    );
    assert_eq!(log3.offers_seen(), vec![vec!["o2", "o3", "o4", "o5", "o6"]]);

    let unused: Vec<&str> = pass.unused_offers.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(unused, vec!["o2", "o3", "o4", "o5", "o6"]);
}

#[tokio::test]
async fn empty_offer_list_still_pings_every_run() {
    let (manager, router, _) = router_fixture(false);
    let runs: Vec<Arc<ScriptedRun>> = (1..=3)
        .map(|i| Arc::new(ScriptedRun::new(&format!("r{i}"), OfferScript::NoChanges)))
        .collect();
    let logs: Vec<_> = runs.iter().map(|r| r.log.clone()).collect();
    for run in runs {
        manager.put(run).await.unwrap();
    }

    let pass = router.handle_offers(&[]).await;
    assert_eq!(pass.result, PassResult::Processed);
    assert!(pass.recommendations.is_empty());
    for log in logs {
        assert_eq!(log.offers_seen(), vec![Vec::<String>::new()]);
    }
}

#[tokio::test]
async fn no_runs_means_not_ready() {
    let (_, router, _) = router_fixture(false);

    let pass = router.handle_offers(&[]).await;
    assert_eq!(pass.result, PassResult::NotReady);

    let pass = router
        .handle_offers(&[offer("o1"), offer("o2"), offer("o3")])
        .await;
    assert_eq!(pass.result, PassResult::NotReady);
    assert!(pass.recommendations.is_empty());
    assert_eq!(pass.unused_offers.len(), 3);
}

#[tokio::test]
async fn no_runs_during_framework_uninstall_means_uninstalled() {
    let (_, router, _) = router_fixture(true);

    let pass = router.handle_offers(&[]).await;
    assert_eq!(pass.result, PassResult::Uninstalled);

    let pass = router.handle_offers(&[offer("o1")]).await;
    assert_eq!(pass.result, PassResult::Uninstalled);
}

#[tokio::test]
async fn any_not_ready_run_degrades_the_pass() {
    let (manager, router, _) = router_fixture(false);
    manager
        .put(Arc::new(ScriptedRun::new("ready", OfferScript::NoChanges)))
        .await
        .unwrap();
    manager
        .put(Arc::new(ScriptedRun::new("slow", OfferScript::NotReady)))
        .await
        .unwrap();

    let pass = router.handle_offers(&[offer("o1")]).await;
    assert_eq!(pass.result, PassResult::NotReady);
}

#[tokio::test]
async fn finished_runs_switch_to_uninstall() {
    let (manager, router, counter) = router_fixture(false);
    let run = Arc::new(ScriptedRun::new("r1", OfferScript::Finished));
    manager.put(run).await.unwrap();
    router.registered(false).await;

    router.handle_offers(&[]).await;

    let replacement = manager.get("r1").await.unwrap();
    assert_eq!(replacement.mode(), RunMode::Uninstalling);
    assert_eq!(counter.count(), 0);
}

#[tokio::test]
async fn uninstalled_runs_are_removed_with_callback() {
    let (manager, router, counter) = router_fixture(false);
    manager
        .put(Arc::new(ScriptedRun::new("gone", OfferScript::Uninstalled)))
        .await
        .unwrap();
    manager
        .put(Arc::new(ScriptedRun::new("stays", OfferScript::NoChanges)))
        .await
        .unwrap();

    let pass = router.handle_offers(&[]).await;

    // One run remains, so the scheduler is still serving.
    assert_eq!(pass.result, PassResult::Processed);
    assert!(manager.get("gone").await.is_none());
    assert_eq!(counter.names(), vec!["gone".to_string()]);
}

#[tokio::test]
async fn removing_last_run_without_framework_uninstall_is_not_ready() {
    let (manager, router, counter) = router_fixture(false);
    manager
        .put(Arc::new(ScriptedRun::new("gone", OfferScript::Uninstalled)))
        .await
        .unwrap();

    let pass = router.handle_offers(&[]).await;
    assert_eq!(pass.result, PassResult::NotReady);
    assert_eq!(counter.count(), 1);
}

#[tokio::test]
async fn uninstall_round_trip_completes_once() {
    let (manager, router, counter) = router_fixture(false);

    let run = Arc::new(
        ScriptedRun::new("r1", OfferScript::NoChanges)
            .with_expected_resources(vec![reserved_for("r1", "res-1")]),
    );
    manager.put(run).await.unwrap();
    router.registered(false).await;

    manager.start_uninstall(&["r1".to_string()]).await;
    assert_eq!(
        manager.get("r1").await.unwrap().mode(),
        RunMode::Uninstalling
    );

    // Reservation still outstanding: pass is NOT_READY, run stays.
    let pass = router.handle_offers(&[]).await;
    assert_eq!(pass.result, PassResult::NotReady);
    assert!(manager.get("r1").await.is_some());

    // The cluster offers the straggler reservation back; the cleanup
    // protocol routes it to the uninstalling run, which disclaims it.
    let straggler = offer("o1").with_resources(vec![reserved_for("r1", "res-1")]);
    let cleanup = router
        .unexpected_resources(std::slice::from_ref(&straggler))
        .await;
    assert_eq!(cleanup.result, UnexpectedResult::Processed);
    assert_eq!(cleanup.offer_resources.len(), 1);
    assert_eq!(cleanup.offer_resources[0].resources.len(), 1);

    // Nothing left to release: the next pass removes the run exactly once.
    let pass = router.handle_offers(&[]).await;
    assert_eq!(pass.result, PassResult::NotReady);
    assert!(manager.get("r1").await.is_none());
    assert_eq!(counter.names(), vec!["r1".to_string()]);

    router.handle_offers(&[]).await;
    assert_eq!(counter.count(), 1);
}

#[tokio::test]
async fn cleanup_releases_malformed_and_unknown_service_resources() {
    let (manager, router, _) = router_fixture(false);
    manager
        .put(Arc::new(ScriptedRun::new("alive", OfferScript::NoChanges)))
        .await
        .unwrap();

    let offers = vec![
        offer("o1").with_resources(vec![orphan_reserved("m1")]),
        offer("o2").with_resources(vec![reserved_for("departed", "d1")]),
        offer("o3").with_resources(vec![reserved_for("alive", "a1")]),
    ];
    let cleanup = router.unexpected_resources(&offers).await;

    assert_eq!(cleanup.result, UnexpectedResult::Processed);
    // Malformed (m1), unknown service (d1), and the live run's disclaimed
    // resource (a1) are all released.
    let mut released: Vec<String> = cleanup
        .offer_resources
        .iter()
        .flat_map(|or| or.resources.iter())
        .map(|r| r.resource_id().unwrap().as_str().to_string())
        .collect();
    released.sort();
    assert_eq!(released, vec!["a1", "d1", "m1"]);
}

#[tokio::test]
async fn failed_cleanup_still_releases_identified_subset() {
    let (manager, router, _) = router_fixture(false);
    manager
        .put(Arc::new(
            ScriptedRun::new("flaky", OfferScript::NoChanges)
                .with_cleanup(CleanupScript::FailPartial),
        ))
        .await
        .unwrap();

    let offers = vec![
        offer("o1").with_resources(vec![reserved_for("flaky", "f1")]),
        offer("o2").with_resources(vec![reserved_for("flaky", "f2")]),
    ];
    let cleanup = router.unexpected_resources(&offers).await;

    // The run failed, but whatever it identified is still released.
    assert_eq!(cleanup.result, UnexpectedResult::Failed);
    assert_eq!(cleanup.offer_resources.len(), 1);
    assert_eq!(
        cleanup.offer_resources[0].resources[0]
            .resource_id()
            .unwrap()
            .as_str(),
        "f1"
    );
}

#[tokio::test]
async fn status_routes_to_owning_run() {
    let (manager, router, _) = router_fixture(false);
    let run = Arc::new(ScriptedRun::new("alpha", OfferScript::NoChanges));
    let log = run.log.clone();
    manager.put(run).await.unwrap();

    let status = TaskStatus::new(TaskId::for_run("alpha", "node-0", "uuid-1"), "TASK_RUNNING");
    assert_eq!(router.handle_status(&status).await, StatusResult::Processed);
    assert_eq!(log.statuses(), vec!["alpha__node-0__uuid-1".to_string()]);
}

#[tokio::test]
async fn status_for_unknown_or_malformed_task_is_unknown() {
    let (manager, router, _) = router_fixture(false);
    manager
        .put(Arc::new(ScriptedRun::new("alpha", OfferScript::NoChanges)))
        .await
        .unwrap();

    let unknown = TaskStatus::new(TaskId::for_run("ghost", "node-0", "uuid-1"), "TASK_LOST");
    assert_eq!(
        router.handle_status(&unknown).await,
        StatusResult::UnknownTask
    );

    let malformed = TaskStatus::new(TaskId::new("no-delimiter"), "TASK_LOST");
    assert_eq!(
        router.handle_status(&malformed).await,
        StatusResult::UnknownTask
    );
}

#[tokio::test]
async fn registration_reaches_replacement_iff_latched() {
    // Not yet registered: the uninstall replacement must not be told.
    let (manager, _, _) = router_fixture(false);
    let run = Arc::new(ScriptedRun::new("r1", OfferScript::NoChanges));
    manager.put(run.clone()).await.unwrap();
    assert!(run.log.registered_calls().is_empty());

    // Registration latched: admissions and swaps are notified on arrival.
    let (manager, router, _) = router_fixture(false);
    router.registered(false).await;
    let run = Arc::new(ScriptedRun::new("r2", OfferScript::NoChanges));
    let log = run.log.clone();
    manager.put(run).await.unwrap();
    assert_eq!(log.registered_calls(), vec![false]);
}
