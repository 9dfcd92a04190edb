#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kafka_cache::config::{Config, MemoryBrokerConfig};
use kafka_cache::{CacheOptions, LogBroker, MemoryBroker, WriterOptions};
use uuid::Uuid;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn setup_broker() -> (MemoryBroker, Arc<dyn LogBroker>) {
    kafka_cache::logging::init_with_level("warn");
    let broker = MemoryBroker::new(MemoryBrokerConfig {
        max_message_bytes: 64 * 1024,
        fetch_batch: 100,
        actor_channel_capacity: 1024,
        auto_create_topics: false,
    });
    let shared: Arc<dyn LogBroker> = Arc::new(broker.clone());
    (broker, shared)
}

/// Fresh topic, already created on the broker.
pub fn new_topic(broker: &MemoryBroker, prefix: &str) -> String {
    let topic = format!("{}.{}", prefix, Uuid::new_v4());
    broker.create_topic(&topic);
    topic
}

pub fn cache_options(topic: &str) -> CacheOptions {
    let mut options = CacheOptions::new(topic);
    options.broker = test_broker_config();
    options
}

pub fn writer_options(topic: &str) -> WriterOptions {
    let mut options = WriterOptions::new(topic);
    options.broker = test_broker_config();
    options
}

fn test_broker_config() -> kafka_cache::config::BrokerConfig {
    let mut config = Config::global().broker.clone();
    config.group_suffix = Some("test".to_string());
    config.fetch_wait_max_ms = 10;
    config.connect_timeout_ms = 1000;
    config.connect_retries = 3;
    config
}

pub async fn seed(broker: &MemoryBroker, topic: &str, key: &str, value: serde_json::Value) -> i64 {
    broker
        .append(topic, Some(Bytes::from(key.to_string())), Bytes::from(value.to_string()))
        .await
        .unwrap()
}

/// Panics instead of hanging the suite.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, future).await.expect("timed out")
}

pub async fn stays_pending<F: Future>(future: F) -> bool {
    tokio::time::timeout(Duration::from_millis(100), future).await.is_err()
}
