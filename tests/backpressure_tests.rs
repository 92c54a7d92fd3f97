
use std::time::Duration;

use swarm_lite::{Call, Engine, SwarmError};
use test_harness::{demo_registry, test_config};

/// A worker only pulls while it has a free execution slot, so
/// announcements pile up in the queue until it is full.
#[tokio::test]
async fn test_full_queue_rejects_submission() {
    let mut config = test_config(1);
    config.execution_slots = 1;
    config.queue_capacity = 1;
    config.shutdown_grace_ms = 2_000;
    let mut engine = Engine::start(config, demo_registry()).unwrap();

    engine
        .submit(Call::new("sleep").kwarg("ms", 800))
        .await
        .unwrap();
    // The only worker is now busy and holds its only slot
    tokio::time::sleep(Duration::from_millis(200)).await;

    engine.submit(Call::new("echo").arg("a")).await.unwrap();
    let rejected = engine.submit(Call::new("echo").arg("b")).await;
    assert!(
        matches!(rejected, Err(SwarmError::QueueFull(1))),
        "expected QueueFull, got {rejected:?}"
    );

    engine.stop().await;
}

/// Extra slots let one worker run calls side by side.
#[tokio::test]
async fn test_execution_slots_run_concurrently() {
    let mut config = test_config(1);
    config.execution_slots = 3;
    let mut engine = Engine::start(config, demo_registry()).unwrap();

    let start = tokio::time::Instant::now();
    let mut ids = Vec::new();
    for ms in [400, 401, 402] {
        ids.push(engine.submit(Call::new("sleep").kwarg("ms", ms)).await.unwrap());
    }
    for id in &ids {
        tokio::time::timeout(Duration::from_secs(5), engine.wait_for_submission(id))
            .await
            .unwrap()
            .unwrap();
    }
    assert!(
        start.elapsed() < Duration::from_millis(1_100),
        "calls ran serially: {:?}",
        start.elapsed()
    );

    engine.stop().await;
}
