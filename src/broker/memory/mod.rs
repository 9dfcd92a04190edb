//! In-process broker: one actor per topic, single partition each.
//!
//! Enough of a real broker for caches to bootstrap, tail and write against:
//! watermarks, a timestamp index, long-polling subscriptions, retention
//! truncation, message size limits and asynchronous delivery reports.

mod producer;
mod subscription;
pub mod topic;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::{
    LogBroker, ProducerConfig, ProducerConnection, SubscribeRequest, Subscription, Watermarks, PARTITION,
};
use crate::config::MemoryBrokerConfig;
use crate::error::BrokerError;
use crate::utils::current_time_ms;

use producer::MemoryProducer;
pub use topic::TopicHandle;

#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    topics: DashMap<String, TopicHandle>,
    config: MemoryBrokerConfig,
    producer_connections: AtomicUsize,
    watermark_failures: AtomicUsize,
}

impl MemoryBroker {
    pub fn new(config: MemoryBrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: DashMap::new(),
                config,
                producer_connections: AtomicUsize::new(0),
                watermark_failures: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &MemoryBrokerConfig {
        &self.inner.config
    }

    /// Idempotent. Must run inside a Tokio runtime.
    pub fn create_topic(&self, name: &str) -> TopicHandle {
        self.inner
            .topics
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(topic = %name, "Creating topic");
                TopicHandle::new(
                    name.to_string(),
                    self.inner.config.actor_channel_capacity,
                    self.inner.config.max_message_bytes,
                )
            })
            .clone()
    }

    pub fn topic(&self, name: &str) -> Option<TopicHandle> {
        self.inner.topics.get(name).map(|t| t.clone())
    }

    pub(crate) fn resolve_topic(&self, name: &str) -> Result<TopicHandle, BrokerError> {
        if let Some(topic) = self.topic(name) {
            return Ok(topic);
        }
        if self.inner.config.auto_create_topics {
            return Ok(self.create_topic(name));
        }
        Err(BrokerError::TopicNotFound(name.to_string()))
    }

    /// Append directly, bypassing producers. Handy for seeding a topic.
    pub async fn append(&self, topic: &str, key: Option<Bytes>, value: Bytes) -> Result<i64, BrokerError> {
        self.append_at(topic, key, value, current_time_ms()).await
    }

    pub async fn append_at(
        &self,
        topic: &str,
        key: Option<Bytes>,
        value: Bytes,
        timestamp: i64,
    ) -> Result<i64, BrokerError> {
        self.resolve_topic(topic)?.append(key, value, timestamp).await
    }

    /// Drop every record below `offset`, returns the new low watermark.
    pub async fn truncate_before(&self, topic: &str, offset: i64) -> Result<i64, BrokerError> {
        self.resolve_topic(topic)?.truncate_before(offset).await
    }

    /// Number of producer connections ever established.
    pub fn producer_connections(&self) -> usize {
        self.inner.producer_connections.load(Ordering::Acquire)
    }

    /// Make the next `n` watermark queries fail with a transport error.
    pub fn fail_next_watermark_queries(&self, n: usize) {
        self.inner.watermark_failures.store(n, Ordering::Release);
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .watermark_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(MemoryBrokerConfig::default())
    }
}

impl LogBroker for MemoryBroker {
    fn query_watermarks<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Watermarks, BrokerError>> {
        async move {
            if self.take_injected_failure() {
                return Err(BrokerError::Transport("broker unreachable".to_string()));
            }
            check_partition(partition)?;
            let handle = self.resolve_topic(topic)?;
            tokio::time::timeout(timeout, handle.watermarks())
                .await
                .map_err(|_| BrokerError::Timeout(timeout))?
        }
        .boxed()
    }

    fn offset_for_timestamp<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        timestamp_ms: i64,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Option<i64>, BrokerError>> {
        async move {
            check_partition(partition)?;
            let handle = self.resolve_topic(topic)?;
            tokio::time::timeout(timeout, handle.offset_for_timestamp(timestamp_ms))
                .await
                .map_err(|_| BrokerError::Timeout(timeout))?
        }
        .boxed()
    }

    fn subscribe(&self, request: SubscribeRequest) -> BoxFuture<'_, Result<Subscription, BrokerError>> {
        async move {
            check_partition(request.partition)?;
            let handle = self.resolve_topic(&request.topic)?;
            let batch = self.inner.config.fetch_batch.max(1);
            let (tx, rx) = mpsc::channel(batch * 2);
            let cancel = CancellationToken::new();

            tokio::spawn(subscription::fetch_loop(handle, request, batch, tx, cancel.clone()));
            Ok(Subscription::new(rx, cancel))
        }
        .boxed()
    }

    fn connect_producer(&self, config: ProducerConfig) -> BoxFuture<'_, Result<ProducerConnection, BrokerError>> {
        async move {
            self.inner.producer_connections.fetch_add(1, Ordering::AcqRel);
            Ok(MemoryProducer::connect(self.clone(), config))
        }
        .boxed()
    }
}

fn check_partition(partition: i32) -> Result<(), BrokerError> {
    if partition == PARTITION {
        Ok(())
    } else {
        Err(BrokerError::Transport(format!("unknown partition {}", partition)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Acks, BrokerEvent, ConsumerStats, OutboundRecord};

    fn broker() -> MemoryBroker {
        MemoryBroker::new(MemoryBrokerConfig {
            max_message_bytes: 1024,
            fetch_batch: 16,
            actor_channel_capacity: 64,
            auto_create_topics: false,
        })
    }

    fn request(topic: &str, from_offset: i64) -> SubscribeRequest {
        SubscribeRequest {
            topic: topic.to_string(),
            group_id: "kafka-cache-test".to_string(),
            partition: PARTITION,
            from_offset,
            fetch_wait_max: Duration::from_millis(20),
            stats_interval: None,
        }
    }

    #[tokio::test]
    async fn missing_topic_is_reported() {
        let broker = broker();
        let err = broker.query_watermarks("nope", PARTITION, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, BrokerError::TopicNotFound("nope".into()));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_one_by_one() {
        let broker = broker();
        broker.create_topic("t");
        broker.fail_next_watermark_queries(2);
        let timeout = Duration::from_secs(1);
        assert!(broker.query_watermarks("t", PARTITION, timeout).await.is_err());
        assert!(broker.query_watermarks("t", PARTITION, timeout).await.is_err());
        assert_eq!(
            broker.query_watermarks("t", PARTITION, timeout).await.unwrap(),
            Watermarks { low: 0, high: 0 }
        );
    }

    #[tokio::test]
    async fn subscription_tails_new_records() {
        let broker = broker();
        broker.create_topic("t");
        broker.append("t", Some(Bytes::from("a")), Bytes::from("1")).await.unwrap();

        let mut sub = broker.subscribe(request("t", 0)).await.unwrap();
        broker.append("t", Some(Bytes::from("b")), Bytes::from("2")).await.unwrap();

        let mut offsets = Vec::new();
        while offsets.len() < 2 {
            match sub.next().await {
                Some(BrokerEvent::Record(r)) => offsets.push(r.offset),
                Some(_) => {}
                None => panic!("stream ended"),
            }
        }
        assert_eq!(offsets, vec![0, 1]);
        sub.stop();
        assert!(sub.is_stopped());
    }

    #[tokio::test]
    async fn subscription_emits_typed_stats() {
        let broker = broker();
        broker.create_topic("t");
        broker.append("t", Some(Bytes::from("a")), Bytes::from("1")).await.unwrap();

        let mut req = request("t", 0);
        req.stats_interval = Some(Duration::from_millis(5));
        let mut sub = broker.subscribe(req).await.unwrap();

        let stats = loop {
            match tokio::time::timeout(Duration::from_secs(1), sub.next()).await.unwrap() {
                Some(BrokerEvent::Stats(payload)) => break serde_json::from_value::<ConsumerStats>(payload).unwrap(),
                Some(_) => {}
                None => panic!("stream ended"),
            }
        };
        assert_eq!(stats.group, "kafka-cache-test");
        assert_eq!((stats.next_offset, stats.consumed), (1, 1));
    }

    #[tokio::test]
    async fn producer_reports_offsets_and_failures() {
        let broker = broker();
        broker.create_topic("t");
        let mut conn = broker
            .connect_producer(ProducerConfig {
                client_id: "test".into(),
                acks: Acks::All,
                connect_timeout: Duration::from_secs(1),
            })
            .await
            .unwrap();
        assert_eq!(broker.producer_connections(), 1);

        let record = |correlation, value: Bytes| OutboundRecord {
            topic: "t".into(),
            partition: PARTITION,
            key: Some(Bytes::from("k")),
            value,
            timestamp: 0,
            correlation,
        };
        conn.producer.produce(record(7, Bytes::from("ok"))).unwrap();
        conn.producer.produce(record(8, Bytes::from(vec![0u8; 4096]))).unwrap();

        let first = conn.reports.recv().await.unwrap();
        assert_eq!((first.correlation, first.result), (7, Ok(0)));
        let second = conn.reports.recv().await.unwrap();
        assert_eq!(second.correlation, 8);
        assert!(matches!(second.result, Err(BrokerError::MessageTooLarge { .. })));

        conn.producer.close();
        assert_eq!(conn.producer.produce(record(9, Bytes::from("late"))), Err(BrokerError::Closed));
    }
}
