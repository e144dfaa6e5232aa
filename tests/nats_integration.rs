//! NATS JetStream integration tests
//!
//! Most tests require a running NATS server with JetStream enabled:
//!   nats-server -js
//!
//! Tests are skipped automatically if NATS is not available.

use a3s_subscriber::{
    BrokerClient, Event, EventContext, NatsBrokerClient, NatsBrokerConfig, Subscriber,
    SubscriberError,
};
use async_nats::jetstream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const NATS_URL: &str = "nats://127.0.0.1:4222";

/// Try to create a test stream. Returns None if the server is unavailable.
async fn try_jetstream(stream_name: &str, subject_prefix: &str) -> Option<jetstream::Context> {
    let client = match async_nats::connect(NATS_URL).await {
        Ok(client) => client,
        Err(_) => {
            eprintln!("NATS not available, skipping integration test");
            return None;
        }
    };

    let js = jetstream::new(client);
    js.get_or_create_stream(jetstream::stream::Config {
        name: stream_name.to_string(),
        subjects: vec![format!("{}.>", subject_prefix)],
        storage: jetstream::stream::StorageType::Memory,
        ..Default::default()
    })
    .await
    .ok()?;

    Some(js)
}

async fn publish_job(js: &jetstream::Context, subject: &str, correlation_id: &str, event: &Event) {
    let mut headers = async_nats::HeaderMap::new();
    headers.insert("Correlation-Id", correlation_id);
    js.publish_with_headers(
        subject.to_string(),
        headers,
        serde_json::to_vec(event).unwrap().into(),
    )
    .await
    .unwrap()
    .await
    .unwrap();
}

fn test_config(stream_name: &str) -> NatsBrokerConfig {
    NatsBrokerConfig {
        url: NATS_URL.to_string(),
        stream_name: stream_name.to_string(),
        connect_timeout_secs: 2,
        ..Default::default()
    }
}

#[test]
fn test_unreachable_server_is_transient() {
    let config = NatsBrokerConfig {
        url: "nats://127.0.0.1:1".to_string(),
        connect_timeout_secs: 1,
        ..Default::default()
    };
    let sleeps = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&sleeps);
    let mut subscriber = Subscriber::new(NatsBrokerClient::new(config).unwrap())
        .with_sleep(move |delay| record.lock().unwrap().push(delay));

    let err = subscriber
        .consume("agent.jobs", |_ctx: EventContext<Event>| Ok(()))
        .unwrap_err();

    assert!(matches!(err, SubscriberError::Protocol(_)), "got {:?}", err);
    assert!(!subscriber.client().was_consuming());
    assert_eq!(*sleeps.lock().unwrap(), vec![Duration::from_secs(1)]);
}

#[tokio::test]
async fn test_nats_missing_stream_is_channel_error() {
    if async_nats::connect(NATS_URL).await.is_err() {
        eprintln!("NATS not available, skipping integration test");
        return;
    }

    let stream_name = format!("MISSING_{}", uuid::Uuid::new_v4().simple());
    let worker = std::thread::spawn(move || {
        let mut subscriber =
            Subscriber::new(NatsBrokerClient::new(test_config(&stream_name)).unwrap())
                .with_sleep(|_| {});
        subscriber.consume("missing.jobs", |_ctx: EventContext<Event>| Ok(()))
    });

    let err = worker.join().unwrap().unwrap_err();
    assert!(matches!(err, SubscriberError::Channel { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_nats_consume_dispatches_and_stops() {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let stream_name = format!("TEST_JOBS_{}", suffix);
    let prefix = format!("test-{}", suffix);
    let Some(js) = try_jetstream(&stream_name, &prefix).await else {
        return;
    };

    let subject = format!("{}.jobs", prefix);
    let first = Event::new("run_checkpoint.received", serde_json::json!({"n": 1}));
    let second = Event::new("run_checkpoint.received", serde_json::json!({"n": 2}));
    publish_job(&js, &subject, "corr-1", &first).await;
    publish_job(&js, &subject, "corr-2", &second).await;

    let client = NatsBrokerClient::new(test_config(&stream_name)).unwrap();
    let shutdown = client.shutdown_handle();
    let queue = subject.clone();

    let worker = std::thread::spawn(move || {
        let mut subscriber = Subscriber::new(client);
        let mut received = Vec::new();
        let result = subscriber.consume(&queue, |ctx: EventContext<Event>| {
            received.push((ctx.correlation_id.clone(), ctx.event.id.clone()));
            ctx.acknowledge_success.invoke()?;
            if received.len() == 2 {
                shutdown.shutdown();
            }
            Ok(())
        });
        let was_consuming = subscriber.client().was_consuming();
        subscriber.close();
        (result, received, was_consuming)
    });

    let (result, received, was_consuming) = worker.join().unwrap();
    result.unwrap();
    assert!(was_consuming);
    assert_eq!(
        received,
        vec![
            ("corr-1".to_string(), first.id.clone()),
            ("corr-2".to_string(), second.id.clone()),
        ]
    );

    js.delete_stream(&stream_name).await.ok();
}
