//! Local, continuously updated key/value projection of a topic.
//!
//! Creation validates everything it can synchronously, then a background
//! task resolves the stream (horizon and start offset), subscribes, and
//! hands records to the [`Materializer`](materializer::Materializer).

pub mod barrier;
pub mod bootstrap;
pub mod events;
pub mod materializer;
pub mod metrics;
pub mod readiness;
pub mod writer;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::{LogBroker, SubscribeRequest};
use crate::codec::{Datum, Encoding, ValueCodec};
use crate::config::{BrokerConfig, Config};
use crate::error::{BrokerError, CacheError, Result};
use crate::store::{EncodedStore, KvStore, MemoryStore, Scan};

use barrier::OffsetBarrier;
use bootstrap::{resolve_stream, StartPosition};
use events::EventBus;
use materializer::Materializer;
use readiness::Readiness;
use writer::WritePath;

pub use barrier::OffsetWait;
pub use bootstrap::StartPolicy;
pub use events::CacheEvent;
pub use materializer::{identity_resolver, Resolver};
pub use metrics::{Anomaly, CacheMetrics, CounterMetrics, DeadLetterSink, LogDeadLetters, NoopMetrics};
pub use readiness::{BootstrapStage, ReadyState};
pub use writer::{KafkaWriter, WriterOptions};

#[derive(Clone)]
pub struct CacheOptions {
    pub topic: String,
    pub broker: BrokerConfig,
    pub key_encoding: String,
    /// A built-in name or a registered `kafka-cache.*` encoding.
    pub value_encoding: String,
    pub compress_values: bool,
    pub start: StartPolicy,
    /// Read-only caches never create a producer.
    pub read_only: bool,
    pub resolver: Resolver,
    pub metrics: Option<Arc<dyn CacheMetrics>>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    /// Defaults to a fresh [`MemoryStore`]. Never share one between caches.
    pub store: Option<Arc<dyn KvStore>>,
}

impl CacheOptions {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            broker: Config::global().broker.clone(),
            key_encoding: "utf8".to_string(),
            value_encoding: "json".to_string(),
            compress_values: false,
            start: StartPolicy::Beginning,
            read_only: true,
            resolver: identity_resolver(),
            metrics: None,
            dead_letters: Arc::new(LogDeadLetters),
            store: None,
        }
    }
}

pub struct KafkaCache {
    topic: String,
    store: EncodedStore,
    readiness: Arc<Readiness>,
    barrier: Arc<OffsetBarrier>,
    events: Arc<EventBus>,
    writer: Option<WritePath>,
    cancel: CancellationToken,
}

impl KafkaCache {
    /// Validate `options` and start bootstrapping in the background.
    ///
    /// Caller mistakes (bad encodings, bad start timestamp, missing group
    /// suffix) fail here. Broker failures surface through [`on_ready`].
    /// Must be called within a Tokio runtime.
    ///
    /// [`on_ready`]: KafkaCache::on_ready
    pub fn create(options: CacheOptions, broker: Arc<dyn LogBroker>) -> Result<Self> {
        if options.topic.trim().is_empty() {
            return Err(CacheError::InvalidArgument("Missing topic to stream from".into()));
        }
        let key_encoding = Encoding::parse(&options.key_encoding)?;
        let value_encoding = Encoding::parse(&options.value_encoding)?;
        let value_codec = ValueCodec::new(value_encoding, options.compress_values)?;
        let start = options.start.validate()?;
        let group_id = options.broker.group_id().ok_or_else(|| {
            CacheError::InvalidArgument("KAFKA_CACHE_GROUP_SUFFIX must be set to derive a consumer group id".into())
        })?;

        let metrics: Arc<dyn CacheMetrics> = match options.metrics {
            Some(metrics) => {
                tracing::info!(topic = %options.topic, "Metrics enabled");
                metrics
            }
            None => {
                tracing::warn!(topic = %options.topic, "Missing metrics option, metrics are disabled");
                Arc::new(NoopMetrics)
            }
        };

        let backend: Arc<dyn KvStore> = match options.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let store = EncodedStore::new(backend, key_encoding, value_encoding);
        let readiness = Arc::new(Readiness::new());
        let barrier = Arc::new(OffsetBarrier::new());
        let events = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();

        let writer = (!options.read_only).then(|| {
            WritePath::new(
                options.topic.clone(),
                key_encoding,
                value_codec,
                broker.clone(),
                options.broker.clone(),
            )
        });

        let materializer = Materializer {
            topic: options.topic.clone(),
            ready_horizon: -1,
            key_encoding,
            value_codec,
            store: store.clone(),
            resolver: options.resolver,
            metrics,
            dead_letters: options.dead_letters,
            readiness: readiness.clone(),
            barrier: barrier.clone(),
            events: events.clone(),
        };

        tracing::debug!(topic = %options.topic, group = %group_id, read_only = options.read_only, "Creating cache");
        tokio::spawn(consume(broker, group_id, options.broker, start, materializer, cancel.clone()));

        Ok(Self {
            topic: options.topic,
            store,
            readiness,
            barrier,
            events,
            writer,
            cancel,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Point lookup. `NotFound` when the key was never applied or was removed.
    pub fn get(&self, key: impl Into<Datum>) -> Result<Datum> {
        self.store.get(&key.into())?.ok_or(CacheError::NotFound)
    }

    /// Produce a record. The returned future resolves with its offset once
    /// the broker has acknowledged it. The local store is not guaranteed to
    /// have applied it yet, use [`wait_for_offset`](KafkaCache::wait_for_offset)
    /// for that.
    ///
    /// A read-only cache fails with `Disabled` right away, before any future
    /// exists.
    pub fn put(
        &self,
        key: impl Into<Datum>,
        value: impl Into<Datum>,
    ) -> Result<impl Future<Output = Result<i64>> + '_> {
        let writer = self.writer.as_ref().ok_or(CacheError::Disabled)?;
        let (key, value) = (key.into(), value.into());
        let readiness = &self.readiness;
        Ok(async move {
            // No producer for a topic that never resolved.
            readiness.wait_stream_resolved().await?;
            writer.write(&key, &value).await
        })
    }

    /// Resolves once the cache caught up with the bootstrap horizon.
    pub async fn on_ready(&self) -> Result<()> {
        self.readiness.wait_ready().await
    }

    /// Returns a future resolving once `offset` (or anything after it) has
    /// been applied. Only valid once the cache is ready.
    pub fn wait_for_offset(&self, offset: i64) -> Result<OffsetWait> {
        if offset < 0 {
            return Err(CacheError::InvalidArgument(format!(
                "offset must be a non-negative integer, got {}",
                offset
            )));
        }
        if !self.readiness.is_ready() {
            return Err(CacheError::InvalidState("wait_for_offset called before the cache is ready".into()));
        }
        Ok(self.barrier.register(offset))
    }

    pub fn scan(&self) -> Scan {
        self.store.scan()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.store.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.store.is_empty()?)
    }

    /// Every store mutation from now on, including those before Ready.
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ReadyState {
        self.readiness.state()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    /// -1 until the first record has been applied.
    pub fn last_applied_offset(&self) -> i64 {
        self.barrier.last_applied()
    }

    pub fn is_writable(&self) -> bool {
        self.writer.is_some()
    }

    /// Stop consuming and release the producer. Idempotent.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::info!(topic = %self.topic, "Ending stream");
        self.cancel.cancel();
        self.readiness.mark_closed();
        self.barrier.close();
        if let Some(writer) = &self.writer {
            writer.close();
        }
    }
}

impl Drop for KafkaCache {
    fn drop(&mut self) {
        self.close();
    }
}

async fn consume(
    broker: Arc<dyn LogBroker>,
    group_id: String,
    config: BrokerConfig,
    start: StartPosition,
    mut materializer: Materializer,
    cancel: CancellationToken,
) {
    let topic = materializer.topic.clone();
    let readiness = materializer.readiness.clone();
    let metrics = materializer.metrics.clone();

    let fail = |error: BrokerError| {
        tracing::error!(topic = %topic, error = %error, "Failed to bootstrap cache");
        metrics.inc_stream_error();
        readiness.mark_failed(&topic, error);
    };

    let resolved = tokio::select! {
        _ = cancel.cancelled() => return,
        resolved = resolve_stream(broker.as_ref(), &topic, &group_id, &config, start) => resolved,
    };
    let descriptor = match resolved {
        Ok(descriptor) => descriptor,
        Err(e) => return fail(e),
    };
    readiness.stream_resolved();
    materializer.ready_horizon = descriptor.ready_horizon;

    let request = SubscribeRequest {
        topic: descriptor.topic.clone(),
        group_id: descriptor.group_id.clone(),
        partition: descriptor.partition,
        from_offset: descriptor.start_offset,
        fetch_wait_max: config.fetch_wait_max(),
        stats_interval: config.stats_interval(),
    };
    let subscription = match broker.subscribe(request).await {
        Ok(subscription) => subscription,
        Err(e) => return fail(e),
    };

    // An empty partition never delivers a record to trigger readiness.
    if descriptor.ready_horizon < 0 && readiness.mark_ready() {
        tracing::info!(topic = %topic, "Topic is empty, cache ready");
    }

    materializer.run(subscription, cancel).await;
}
