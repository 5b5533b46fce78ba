//! Worker pool integration tests against the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use queue_sentinel::config::{BreakerConfig, EndpointConfig, QueueConfig};
use queue_sentinel::consumer::{ClientRegistry, ConsumerManager, HandlerRegistry, WorkerState};
use queue_sentinel::resilience::CircuitState;
use queue_sentinel::transport::memory::{MemoryBroker, MemoryCloud};
use queue_sentinel::transport::{QueueClient, SendMessageRequest};

mod common;
use common::RecordingHandler;

async fn start_pool(cloud: &Arc<MemoryCloud>, config: QueueConfig, handler: Arc<RecordingHandler>) -> ConsumerManager {
    let registry = Arc::new(ClientRegistry::new(cloud.clone()));
    registry.start(&config).await.unwrap();
    let manager = ConsumerManager::new(config, registry, HandlerRegistry::new().with("recording", handler));
    manager.start().unwrap();
    manager
}

async fn send(broker: &MemoryBroker, queue_url: &str, body: &str) {
    broker
        .send_message(SendMessageRequest {
            queue_url: queue_url.to_string(),
            body: body.to_string(),
            ..SendMessageRequest::default()
        })
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_one_worker_per_endpoint_and_stop_joins_all() {
    let cloud = Arc::new(MemoryCloud::new());
    let orders = EndpointConfig::new("orders", "us-east-1");
    let refunds = EndpointConfig::new("refunds", "eu-west-1");
    cloud.create_queue(&orders);
    cloud.create_queue(&refunds);

    let config = common::queue_config(
        vec![common::consumer("recording", 1, vec![orders, refunds])],
        BreakerConfig::default(),
    );
    let manager = start_pool(&cloud, config, Arc::new(RecordingHandler::default())).await;

    assert_eq!(manager.worker_count(), 2);
    let workers = manager.workers();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(workers.iter().all(|w| w.state() == WorkerState::Running));

    // Both workers sit in a 20 second long-poll; stop waits them out.
    manager.stop().await;
    assert!(workers.iter().all(|w| w.state() == WorkerState::Stopped));
    assert_eq!(manager.worker_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_message_is_isolated_and_still_deleted() {
    let (logs, _guard) = common::capture_logs();
    let cloud = Arc::new(MemoryCloud::new());
    let endpoint = EndpointConfig::new("orders", "us-east-1");
    let url = cloud.create_queue(&endpoint);
    let broker = cloud.broker(&endpoint.cache_key());
    for body in ["m1", "m2", "m3"] {
        send(&broker, &url, body).await;
    }

    let handler = Arc::new(RecordingHandler::failing_on(&["m2"]));
    let config = common::queue_config(
        vec![common::consumer("recording", 1, vec![endpoint])],
        BreakerConfig::default(),
    );
    let manager = start_pool(&cloud, config, handler.clone()).await;

    assert!(common::wait_until(|| broker.queue_depth(&url) == 0, Duration::from_secs(5)).await);
    assert_eq!(handler.seen(), vec!["m1", "m2", "m3"]);
    assert_eq!(logs.errors(), 1);
    assert!(logs.error_messages()[0].contains("Failed to consume message"));

    // The worker keeps polling after the failure.
    send(&broker, &url, "m4").await;
    assert!(common::wait_until(|| handler.seen().len() == 4, Duration::from_secs(30)).await);

    manager.stop().await;
    assert_eq!(logs.errors(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_paused_pool_makes_no_calls_until_resumed() {
    let cloud = Arc::new(MemoryCloud::new());
    let endpoint = EndpointConfig::new("orders", "us-east-1");
    let url = cloud.create_queue(&endpoint);
    let broker = cloud.broker(&endpoint.cache_key());
    let handler = Arc::new(RecordingHandler::default());
    // A forced-open breaker still allows a trial call after its open wait; keep that wait
    // well past the observation window.
    let breaker = BreakerConfig {
        wait_duration_open_ms: 600_000,
        ..BreakerConfig::default()
    };
    let config = common::queue_config(vec![common::consumer("recording", 2, vec![endpoint])], breaker);
    let manager = start_pool(&cloud, config, handler.clone()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.pause();
    assert!(manager.breaker_states().iter().all(|(_, s)| *s == CircuitState::Open));

    // Let the in-flight long-polls finish, then watch for new calls.
    tokio::time::sleep(Duration::from_secs(21)).await;
    let calls = broker.call_count();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(broker.call_count(), calls);

    send(&broker, &url, "after-resume").await;
    manager.resume();
    assert!(common::wait_until(|| handler.seen() == vec!["after-resume"], Duration::from_secs(5)).await);

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_backend_outage_opens_then_recovers() {
    let (logs, _guard) = common::capture_logs();
    let cloud = Arc::new(MemoryCloud::new());
    let endpoint = EndpointConfig::new("orders", "us-east-1");
    let url = cloud.create_queue(&endpoint);
    let broker = cloud.broker(&endpoint.cache_key());
    let handler = Arc::new(RecordingHandler::default());
    let config = common::queue_config(
        vec![common::consumer("recording", 1, vec![endpoint])],
        common::sensitive_breaker(5_000),
    );
    let manager = start_pool(&cloud, config, handler.clone()).await;
    let breaker = manager.breakers().remove(0);

    // Resolution and the first receive have started. That receive succeeds
    // empty, and one failure completes a 50% window of two.
    assert!(common::wait_until(|| broker.call_count() >= 2, Duration::from_secs(1)).await);
    broker.fail_next(1, 503);

    assert!(common::wait_until(|| breaker.state() == CircuitState::Open, Duration::from_secs(30)).await);
    assert!(logs.warnings() >= 2);

    // After the open wait a trial receive succeeds and the breaker closes.
    send(&broker, &url, "recovered").await;
    assert!(common::wait_until(|| handler.seen() == vec!["recovered"], Duration::from_secs(60)).await);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(logs.errors(), 0);

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_fatal_worker_does_not_affect_siblings() {
    let (logs, _guard) = common::capture_logs();
    let cloud = Arc::new(MemoryCloud::new());
    let orders = EndpointConfig::new("orders", "us-east-1");
    let url = cloud.create_queue(&orders);
    let broker = cloud.broker(&orders.cache_key());
    // Never created, so its worker cannot resolve the queue.
    let ghost = EndpointConfig::new("ghost", "us-east-1");

    let handler = Arc::new(RecordingHandler::default());
    let config = common::queue_config(
        vec![common::consumer("recording", 1, vec![orders, ghost])],
        BreakerConfig::default(),
    );
    let manager = start_pool(&cloud, config, handler.clone()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let workers = manager.workers();
    let states: Vec<(String, WorkerState)> = workers
        .iter()
        .map(|w| (w.endpoint().queue_name.clone(), w.state()))
        .collect();
    assert!(states.contains(&("ghost".to_string(), WorkerState::Stopped)));
    assert!(states.contains(&("orders".to_string(), WorkerState::Running)));
    assert_eq!(logs.errors(), 1);
    assert!(logs.error_messages()[0].contains("terminated"));

    send(&broker, &url, "still-served").await;
    assert!(common::wait_until(|| handler.seen() == vec!["still-served"], Duration::from_secs(5)).await);

    manager.stop().await;
}
