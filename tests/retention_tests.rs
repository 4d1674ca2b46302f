//! Retention sweep tests: terminal jobs are tombstoned after the retention
//! window while live jobs stay untouched.

mod test_harness;

use std::time::Duration;

use jobmaster::dispatcher::job::{JobId, JobPayload};

use test_harness::{assert_eventually, test_config, TestDispatcher, CALL_TIMEOUT};

#[tokio::test]
async fn sweep_tombstones_expired_terminal_jobs() {
    // Zero retention: terminal jobs expire on the next sweep tick.
    let config = test_config(6300).with_retention(0, 20);
    let fixture = TestDispatcher::spawn_with_persistence(
        config,
        std::sync::Arc::new(jobmaster::persistence::MemoryPersistence::new()),
    )
    .await
    .unwrap();

    fixture
        .gateway
        .submit_job(JobId::new("done"), JobPayload::new("echo done"), CALL_TIMEOUT)
        .await
        .unwrap();
    fixture
        .gateway
        .submit_job(JobId::new("live"), JobPayload::new("sleep 60"), CALL_TIMEOUT)
        .await
        .unwrap();

    // Cancel one without removing it; the sweep takes over from there.
    fixture
        .gateway
        .stop_job(JobId::new("done"), false, CALL_TIMEOUT)
        .await
        .unwrap();

    let persistence = fixture.persistence.clone();
    assert_eventually(
        || {
            let persistence = persistence.clone();
            async move { persistence.get(&JobId::new("done")).await.is_none() }
        },
        Duration::from_secs(2),
        "cancelled job should be tombstoned by the retention sweep",
    )
    .await;

    // The live job survives sweeping.
    assert!(fixture.persistence.get(&JobId::new("live")).await.is_some());
    let jobs = fixture.gateway.list_jobs(CALL_TIMEOUT).await.unwrap();
    assert_eq!(jobs, vec![JobId::new("live")]);

    fixture.handle.close_async().await;
}

#[tokio::test]
async fn sweep_leaves_recent_terminal_jobs_in_place() {
    // Long retention: cancelled jobs stay tombstoned-but-present.
    let config = test_config(6301).with_retention(600_000, 20);
    let fixture = TestDispatcher::spawn_with_persistence(
        config,
        std::sync::Arc::new(jobmaster::persistence::MemoryPersistence::new()),
    )
    .await
    .unwrap();

    fixture
        .gateway
        .submit_job(JobId::new("J1"), JobPayload::new("echo 1"), CALL_TIMEOUT)
        .await
        .unwrap();
    fixture
        .gateway
        .stop_job(JobId::new("J1"), false, CALL_TIMEOUT)
        .await
        .unwrap();

    // Give the sweep a few ticks.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fixture.persistence.get(&JobId::new("J1")).await.is_some());

    fixture.handle.close_async().await;
}
