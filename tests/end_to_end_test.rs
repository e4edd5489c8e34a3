/// End-to-end tests for cell-energy service
/// These tests require a Kafka-compatible broker (Redpanda) running locally
/// Run with: cargo test --test end_to_end_test -- --ignored
use cell_energy::{
    bridge,
    config::{KafkaConfig, SyntheticConfig},
    decision::HysteresisEngine,
    pipeline::run_ingestion,
    policy::DECISION_QUEUE,
    telemetry::{FallbackSource, SourceMode},
    ws::{Broadcaster, SubscriptionRegistry},
};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn brokers() -> String {
    std::env::var("REDPANDA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string())
}

fn kafka_config(topic: &str) -> KafkaConfig {
    KafkaConfig {
        brokers: brokers(),
        topic: Some(topic.to_string()),
        group_id: format!("cell-energy-e2e-{}", uuid::Uuid::new_v4()),
        auto_offset_reset: "earliest".to_string(),
        quiet_period_secs: 10,
    }
}

fn create_test_producer() -> FutureProducer {
    ClientConfig::new()
        .set("bootstrap.servers", brokers())
        .set("message.timeout.ms", "5000")
        .create()
        .expect("producer creation failed")
}

async fn publish(producer: &FutureProducer, topic: &str, payload: &Value) {
    let body = payload.to_string();
    producer
        .send(
            FutureRecord::<(), _>::to(topic).payload(&body),
            Duration::from_secs(5),
        )
        .await
        .expect("failed to publish test message");
}

fn ves_event(cell: &str, used: u64, available: u64) -> Value {
    json!({
        "measObjLdn": cell,
        "event": {
            "commonEventHeader": { "domain": "measurement", "sourceName": "o-du-1" },
            "measurementFields": {
                "additionalMeasurements": [{
                    "name": cell,
                    "hashMap": {
                        "measObjLdn": cell,
                        "pmRadioPrbUsedDl": used.to_string(),
                        "pmRadioPrbAvailDl": available.to_string()
                    }
                }]
            }
        }
    })
}

#[tokio::test]
#[ignore] // Requires Redpanda running
async fn test_live_pm_events_drive_decisions() {
    let topic = format!("cell-energy-e2e-{}", uuid::Uuid::new_v4());
    let producer = create_test_producer();

    // Low → switch off, mid → nothing, high → switch on
    for (used, available) in [(10, 100), (50, 100), (90, 100)] {
        publish(&producer, &topic, &ves_event("NRCellDU=1", used, available)).await;
    }

    let kafka = kafka_config(&topic);
    let source = FallbackSource::open(Some(&kafka), kafka.topic.clone(), SyntheticConfig::default());
    assert_eq!(source.mode(), SourceMode::Live);

    let (bridge_tx, bridge_rx) = bridge::channel(None);
    let registry = Arc::new(SubscriptionRegistry::new(64));
    let (broadcaster, handle) = Broadcaster::new(bridge_rx, registry, Duration::from_secs(60));
    let broadcaster_task = tokio::spawn(broadcaster.run());
    let mut sub = handle.subscribe().await.unwrap();

    let (decision_tx, mut decision_rx) = mpsc::channel(DECISION_QUEUE);
    let token = CancellationToken::new();
    let ingestion = tokio::spawn(run_ingestion(
        source,
        HysteresisEngine::default(),
        bridge_tx,
        decision_tx,
        token.clone(),
    ));

    let mut actions = Vec::new();
    while actions.len() < 3 {
        let frame = tokio::time::timeout(Duration::from_secs(30), sub.frames.recv())
            .await
            .expect("timed out waiting for live update")
            .expect("subscription closed");
        let msg: Value = serde_json::from_str(&frame).unwrap();
        if msg["type"] == "update" {
            actions.push(msg["data"][0]["action"].as_str().unwrap().to_string());
        }
    }
    assert_eq!(actions, ["switch_off", "none", "switch_on"]);

    token.cancel();
    ingestion.await.unwrap();
    broadcaster_task.await.unwrap();

    let first = decision_rx.recv().await.unwrap();
    assert_eq!(first.cell_id, "NRCellDU=1");
    assert_eq!(first.threshold_used, 20.0);
}

#[tokio::test]
#[ignore] // Requires Redpanda running
async fn test_quiet_topic_switches_to_synthetic() {
    let topic = format!("cell-energy-quiet-{}", uuid::Uuid::new_v4());
    let mut kafka = kafka_config(&topic);
    kafka.quiet_period_secs = 2;

    let synthetic = SyntheticConfig {
        groups: 1,
        cells_per_group: 1,
        tick_millis: 10,
        ..SyntheticConfig::default()
    };
    let mut source = FallbackSource::open(Some(&kafka), kafka.topic.clone(), synthetic);
    let mode = source.subscribe_mode();
    assert_eq!(*mode.borrow(), SourceMode::Live);

    let sample = tokio::time::timeout(Duration::from_secs(30), source.next_sample())
        .await
        .expect("synthetic sample after quiet period");

    assert_eq!(*mode.borrow(), SourceMode::Synthetic);
    assert_eq!(
        sample.payload["cell_id"],
        "ManagedElement=o-du-1,GNBDUFunction=1,NRCellDU=1"
    );
}
