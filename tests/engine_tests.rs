
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use swarm_lite::dispatcher::SubmissionStatus;
use swarm_lite::{Call, Engine, Outcome, SwarmError};
use test_harness::{counted_registry, demo_registry, test_config};

const WAIT: Duration = Duration::from_secs(5);

/// Submit `add(2, 3)` and read the cached 5 back from the pool.
#[tokio::test]
async fn test_submit_then_result() {
    let mut engine = Engine::start(test_config(2), demo_registry()).unwrap();

    let call = Call::new("add").args([2, 3]);
    let id = engine.submit(call.clone()).await.unwrap();
    assert_eq!(id, call.id());

    let status = tokio::time::timeout(WAIT, engine.wait_for_submission(&id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, SubmissionStatus::Completed);

    let outcome = engine.result(&id).await.unwrap();
    assert_eq!(outcome, Outcome::value(5));

    engine.stop().await;
}

#[tokio::test]
async fn test_submit_returns_before_execution() {
    let mut engine = Engine::start(test_config(1), demo_registry()).unwrap();

    let call = Call::new("sleep").kwarg("ms", 300);
    let start = tokio::time::Instant::now();
    let id = engine.submit(call).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(300));
    assert_eq!(
        engine.submission_status(&id).await,
        Some(SubmissionStatus::Pending)
    );

    tokio::time::timeout(WAIT, engine.wait_for_submission(&id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.result(&id).await.unwrap(), Outcome::value(300));

    engine.stop().await;
}

/// Reading a result twice yields the same outcome; lookups do not consume it.
#[tokio::test]
async fn test_result_is_idempotent() {
    let mut engine = Engine::start(test_config(3), demo_registry()).unwrap();

    let id = engine
        .submit(Call::new("echo").arg(json!({"k": [1, 2]})))
        .await
        .unwrap();
    tokio::time::timeout(WAIT, engine.wait_for_submission(&id))
        .await
        .unwrap()
        .unwrap();

    let first = engine.result(&id).await.unwrap();
    let second = engine.result(&id).await.unwrap();
    assert_eq!(first, Outcome::value(json!({"k": [1, 2]})));
    assert_eq!(first, second);

    engine.stop().await;
}

/// One RUN announcement is executed by exactly one worker.
#[tokio::test]
async fn test_single_submission_runs_once() {
    let (registry, executions) = counted_registry();
    let mut engine = Engine::start(test_config(4), registry).unwrap();

    let id = engine.submit(Call::new("counted").arg("x")).await.unwrap();
    tokio::time::timeout(WAIT, engine.wait_for_submission(&id))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    engine.stop().await;
}

/// Identical calls share an id. The second announcement may land on the
/// worker that cached the first (no re-execution) or on another worker
/// (independent re-execution). Both are allowed.
#[tokio::test]
async fn test_duplicate_submission_may_run_on_another_worker() {
    let (registry, executions) = counted_registry();
    let mut engine = Engine::start(test_config(2), registry).unwrap();

    let first = engine.submit(Call::new("counted").arg(7)).await.unwrap();
    tokio::time::timeout(WAIT, engine.wait_for_submission(&first))
        .await
        .unwrap()
        .unwrap();

    let second = engine.submit(Call::new("counted").arg(7)).await.unwrap();
    assert_eq!(first, second);
    tokio::time::timeout(WAIT, engine.wait_for_submission(&second))
        .await
        .unwrap()
        .unwrap();

    let runs = executions.load(Ordering::SeqCst);
    assert!((1..=2).contains(&runs), "unexpected execution count {runs}");
    assert_eq!(engine.result(&first).await.unwrap(), Outcome::value(7));

    engine.stop().await;
}

/// An id nobody submitted exhausts the configured lookups.
#[tokio::test]
async fn test_unknown_id_is_unavailable() {
    let mut config = test_config(2);
    config.result_attempts = 3;
    let mut engine = Engine::start(config, demo_registry()).unwrap();

    let err = engine.result("deadbeef").await.unwrap_err();
    match err {
        SwarmError::ResultUnavailable { id, attempts } => {
            assert_eq!(id, "deadbeef");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected ResultUnavailable, got {other:?}"),
    }

    engine.stop().await;
}

/// A failing call is delivered as an error outcome, and the worker keeps
/// serving afterwards.
#[tokio::test]
async fn test_execution_error_is_an_outcome() {
    let mut engine = Engine::start(test_config(1), demo_registry()).unwrap();

    let failed = engine.submit(Call::new("fail")).await.unwrap();
    let status = tokio::time::timeout(WAIT, engine.wait_for_submission(&failed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, SubmissionStatus::Completed);
    assert_eq!(
        engine.result(&failed).await.unwrap(),
        Outcome::error("deliberate failure")
    );

    let ok = engine.submit(Call::new("add").args([1, 2])).await.unwrap();
    tokio::time::timeout(WAIT, engine.wait_for_submission(&ok))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.result(&ok).await.unwrap(), Outcome::value(3));

    engine.stop().await;
}

#[tokio::test]
async fn test_panicking_call_does_not_kill_worker() {
    let mut engine = Engine::start(test_config(1), demo_registry()).unwrap();

    let bad = engine.submit(Call::new("panic")).await.unwrap();
    tokio::time::timeout(WAIT, engine.wait_for_submission(&bad))
        .await
        .unwrap()
        .unwrap();
    match engine.result(&bad).await.unwrap() {
        Outcome::Error { message } => assert!(message.contains("deliberate panic")),
        other => panic!("expected error outcome, got {other:?}"),
    }

    let good = engine.submit(Call::new("echo").arg("alive")).await.unwrap();
    tokio::time::timeout(WAIT, engine.wait_for_submission(&good))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.result(&good).await.unwrap(), Outcome::value("alive"));

    let report = engine.stop().await;
    assert!(report.crashed.is_empty());
}

#[tokio::test]
async fn test_unknown_function_is_an_error_outcome() {
    let mut engine = Engine::start(test_config(1), demo_registry()).unwrap();

    let id = engine.submit(Call::new("missing")).await.unwrap();
    tokio::time::timeout(WAIT, engine.wait_for_submission(&id))
        .await
        .unwrap()
        .unwrap();
    match engine.result(&id).await.unwrap() {
        Outcome::Error { message } => assert!(message.contains("unknown function")),
        other => panic!("expected error outcome, got {other:?}"),
    }

    engine.stop().await;
}

#[tokio::test]
async fn test_wait_for_unknown_submission() {
    let mut engine = Engine::start(test_config(1), demo_registry()).unwrap();
    assert!(engine.submission_status("nope").await.is_none());
    assert!(matches!(
        engine.wait_for_submission("nope").await,
        Err(SwarmError::Unfulfilled { .. })
    ));
    engine.stop().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let result = Engine::start(test_config(0), demo_registry());
    assert!(matches!(result, Err(SwarmError::InvalidConfig(_))));
}
