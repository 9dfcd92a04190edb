//! Write path: producer connection plus delivery-report correlation.
//!
//! Every outbound record carries a correlation token. The broker echoes it
//! in an out-of-band delivery report, which the report pump routes back to
//! the write waiting on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, OnceCell};

use crate::broker::{
    Acks, DeliveryReport, LogBroker, LogProducer, OutboundRecord, ProducerConfig, ProducerConnection, PARTITION,
};
use crate::cache::bootstrap::query_horizon;
use crate::codec::{Datum, Encoding, ValueCodec};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, CacheError, CorrelationError, Result};
use crate::utils::current_time_ms;

type Completion = oneshot::Sender<std::result::Result<i64, BrokerError>>;

// ========================================
// CORRELATOR
// ========================================

pub struct WriteCorrelator {
    next_token: AtomicU64,
    pending: DashMap<u64, Completion>,
    poisoned: Mutex<Option<CorrelationError>>,
}

impl WriteCorrelator {
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(0),
            pending: DashMap::new(),
            poisoned: Mutex::new(None),
        }
    }

    /// Reserve a fresh token. Fails once the correlator has been poisoned.
    pub fn register(&self) -> Result<(u64, oneshot::Receiver<std::result::Result<i64, BrokerError>>)> {
        // Held across the insert so poison() cannot clear the map in between.
        let poisoned = self.poisoned.lock();
        if let Some(e) = poisoned.as_ref() {
            return Err(e.clone().into());
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(token, tx);
        Ok((token, rx))
    }

    pub fn resolve(&self, report: DeliveryReport) -> std::result::Result<(), CorrelationError> {
        let Some((_, completion)) = self.pending.remove(&report.correlation) else {
            return Err(CorrelationError::MissingCallback {
                token: report.correlation,
                offset: report.result.ok(),
            });
        };
        // The writer may have given up waiting.
        let _ = completion.send(report.result);
        Ok(())
    }

    /// Forget a token whose record never reached the broker.
    pub fn cancel(&self, token: u64) {
        self.pending.remove(&token);
    }

    /// Stop correlating. Outstanding writes fail with `Internal`.
    pub fn poison(&self, error: CorrelationError) {
        let mut poisoned = self.poisoned.lock();
        *poisoned = Some(error);
        self.pending.clear();
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.lock().is_some()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn abandoned(&self) -> CacheError {
        match self.poisoned.lock().as_ref() {
            Some(e) => e.clone().into(),
            None => CacheError::InvalidState("producer closed before delivery report".into()),
        }
    }
}

impl Default for WriteCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

async fn report_pump(mut reports: mpsc::UnboundedReceiver<DeliveryReport>, correlator: Arc<WriteCorrelator>) {
    while let Some(report) = reports.recv().await {
        tracing::debug!(
            correlation = report.correlation,
            topic = %report.topic,
            partition = report.partition,
            key = ?report.key.as_deref().map(String::from_utf8_lossy),
            size = report.size,
            result = ?report.result,
            "Delivery report"
        );
        if let Err(e) = correlator.resolve(report) {
            tracing::error!(error = %e, "Delivery report without a pending write, producer is unusable");
            correlator.poison(e);
            break;
        }
    }
}

// ========================================
// PRODUCER
// ========================================

pub struct Producer {
    producer: Box<dyn LogProducer>,
    correlator: Arc<WriteCorrelator>,
}

impl Producer {
    pub fn start(connection: ProducerConnection) -> Self {
        let correlator = Arc::new(WriteCorrelator::new());
        tokio::spawn(report_pump(connection.reports, correlator.clone()));
        Self { producer: connection.producer, correlator }
    }

    pub fn correlator(&self) -> &Arc<WriteCorrelator> {
        &self.correlator
    }

    /// Resolves with the record's final offset once the broker acknowledged it.
    pub async fn send(&self, topic: &str, key: Bytes, value: Bytes) -> Result<i64> {
        let (token, completion) = self.correlator.register()?;
        tracing::debug!(topic = %topic, correlation = token, "Writing to broker");

        let record = OutboundRecord {
            topic: topic.to_string(),
            partition: PARTITION,
            key: Some(key),
            value,
            timestamp: current_time_ms(),
            correlation: token,
        };
        if let Err(e) = self.producer.produce(record) {
            self.correlator.cancel(token);
            return Err(CacheError::DeliveryFailure(e));
        }

        match completion.await {
            Ok(Ok(offset)) => Ok(offset),
            Ok(Err(e)) => Err(CacheError::DeliveryFailure(e)),
            Err(_) => Err(self.correlator.abandoned()),
        }
    }

    pub fn close(&self) {
        self.producer.close();
    }
}

// ========================================
// WRITE PATH (shared by caches and standalone writers)
// ========================================

/// Encodes writes and lazily owns the producer for one topic.
pub(crate) struct WritePath {
    topic: String,
    key_encoding: Encoding,
    value_codec: ValueCodec,
    broker: Arc<dyn LogBroker>,
    config: BrokerConfig,
    producer: OnceCell<Producer>,
}

impl WritePath {
    pub(crate) fn new(
        topic: String,
        key_encoding: Encoding,
        value_codec: ValueCodec,
        broker: Arc<dyn LogBroker>,
        config: BrokerConfig,
    ) -> Self {
        Self { topic, key_encoding, value_codec, broker, config, producer: OnceCell::new() }
    }

    pub(crate) async fn write(&self, key: &Datum, value: &Datum) -> Result<i64> {
        if !key.is_truthy() {
            return Err(CacheError::InvalidArgument(format!("key must not be empty or falsy, got {}", key)));
        }
        let raw_key = self.key_encoding.encode(key)?;
        let raw_value = self.value_codec.encode(value)?;

        let producer = self.producer.get_or_try_init(|| self.connect()).await?;
        producer.send(&self.topic, raw_key, raw_value).await
    }

    async fn connect(&self) -> Result<Producer> {
        tracing::info!(topic = %self.topic, "Creating producer");
        let timeout = self.config.connect_timeout();
        let config = ProducerConfig {
            client_id: format!("kafka-cache-{}", self.topic),
            acks: Acks::All,
            connect_timeout: timeout,
        };
        let connection = tokio::time::timeout(timeout, self.broker.connect_producer(config))
            .await
            .map_err(|_| CacheError::DeliveryFailure(BrokerError::Timeout(timeout)))?
            .map_err(CacheError::DeliveryFailure)?;
        Ok(Producer::start(connection))
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.producer.initialized()
    }

    pub(crate) fn close(&self) {
        if let Some(producer) = self.producer.get() {
            tracing::info!(topic = %self.topic, "Closing producer");
            producer.close();
        }
    }
}

// ========================================
// STANDALONE WRITER
// ========================================

#[derive(Clone, Debug)]
pub struct WriterOptions {
    pub topic: String,
    pub broker: BrokerConfig,
    pub key_encoding: String,
    pub value_encoding: String,
    pub compress_values: bool,
}

impl WriterOptions {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            broker: crate::config::Config::global().broker.clone(),
            key_encoding: "utf8".to_string(),
            value_encoding: "json".to_string(),
            compress_values: false,
        }
    }
}

/// Writes to a topic without materializing it.
pub struct KafkaWriter {
    path: WritePath,
}

impl KafkaWriter {
    /// Fails with `BootstrapFailure` when the topic cannot be found. The
    /// producer itself is connected on the first write.
    pub async fn connect(options: WriterOptions, broker: Arc<dyn LogBroker>) -> Result<Self> {
        if options.topic.trim().is_empty() {
            return Err(CacheError::InvalidArgument("Missing topic to write to".into()));
        }
        let key_encoding = Encoding::parse(&options.key_encoding)?;
        let value_codec = ValueCodec::new(Encoding::parse(&options.value_encoding)?, options.compress_values)?;

        query_horizon(
            broker.as_ref(),
            &options.topic,
            options.broker.connect_retries,
            options.broker.connect_timeout(),
        )
        .await
        .map_err(|source| CacheError::BootstrapFailure { topic: options.topic.clone(), source })?;

        Ok(Self {
            path: WritePath::new(options.topic, key_encoding, value_codec, broker, options.broker),
        })
    }

    pub async fn write(&self, key: impl Into<Datum>, value: impl Into<Datum>) -> Result<i64> {
        self.path.write(&key.into(), &value.into()).await
    }

    pub fn is_connected(&self) -> bool {
        self.path.is_connected()
    }

    pub fn close(&self) {
        self.path.close();
    }
}

impl Drop for KafkaWriter {
    fn drop(&mut self) {
        self.path.close();
    }
}
