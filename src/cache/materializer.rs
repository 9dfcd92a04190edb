//! Single consumption path: turns log records into store mutations.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerEvent, Record, Subscription};
use crate::cache::barrier::OffsetBarrier;
use crate::cache::events::{CacheEvent, EventBus};
use crate::cache::metrics::{Anomaly, CacheMetrics, DeadLetterSink};
use crate::cache::readiness::Readiness;
use crate::codec::{Datum, Encoding, ValueCodec};
use crate::error::StoreError;
use crate::store::EncodedStore;

/// Key-preserving transform applied to every decoded value before it is
/// stored. Returning `None` removes the key.
pub type Resolver = Arc<dyn Fn(Datum) -> Option<Datum> + Send + Sync>;

pub fn identity_resolver() -> Resolver {
    Arc::new(|value: Datum| Some(value))
}

#[derive(Clone, Debug, PartialEq)]
pub enum Applied {
    Put,
    Delete,
    Dropped(Anomaly),
    /// Offset already applied.
    Redelivered,
    StoreFailed,
}

pub struct Materializer {
    pub(crate) topic: String,
    pub(crate) ready_horizon: i64,
    pub(crate) key_encoding: Encoding,
    pub(crate) value_codec: ValueCodec,
    pub(crate) store: EncodedStore,
    pub(crate) resolver: Resolver,
    pub(crate) metrics: Arc<dyn CacheMetrics>,
    pub(crate) dead_letters: Arc<dyn DeadLetterSink>,
    pub(crate) readiness: Arc<Readiness>,
    pub(crate) barrier: Arc<OffsetBarrier>,
    pub(crate) events: Arc<EventBus>,
}

impl Materializer {
    pub fn apply(&self, record: &Record) -> Applied {
        if record.offset <= self.barrier.last_applied() {
            tracing::debug!(topic = %self.topic, offset = record.offset, "Skipping redelivered record");
            return Applied::Redelivered;
        }

        let outcome = self.mutate(record);

        if record.offset >= self.ready_horizon && self.readiness.mark_ready() {
            tracing::info!(topic = %self.topic, offset = record.offset, horizon = self.ready_horizon, "Cache ready");
        }
        // After the Ready handling, so a resolved wait always sees a ready cache.
        self.barrier.advance(record.offset);

        outcome
    }

    fn mutate(&self, record: &Record) -> Applied {
        let key = match self.decode_key(record) {
            Ok(key) => key,
            Err(anomaly) => return self.drop_record(record, anomaly),
        };

        let value = match self.value_codec.decode(&record.value) {
            Ok(value) => value,
            Err(e) => return self.drop_record(record, Anomaly::UndecodableValue(e.to_string())),
        };

        match (self.resolver)(value) {
            Some(resolved) => {
                if let Err(e) = self.store.put(&key, &resolved) {
                    return self.store_failed(record, e);
                }
                tracing::trace!(topic = %self.topic, offset = record.offset, key = %key, "put");
                self.events.publish(CacheEvent::Put { key, offset: record.offset });
                Applied::Put
            }
            None => {
                if let Err(e) = self.store.delete(&key) {
                    return self.store_failed(record, e);
                }
                tracing::trace!(topic = %self.topic, offset = record.offset, key = %key, "delete");
                self.events.publish(CacheEvent::Delete { key, offset: record.offset });
                Applied::Delete
            }
        }
    }

    fn decode_key(&self, record: &Record) -> Result<Datum, Anomaly> {
        let raw = match &record.key {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Err(Anomaly::MissingKey),
        };
        let key = self
            .key_encoding
            .decode(raw)
            .map_err(|e| Anomaly::UndecodableKey(e.to_string()))?;
        if key.is_truthy() {
            Ok(key)
        } else {
            Err(Anomaly::MissingKey)
        }
    }

    fn drop_record(&self, record: &Record, anomaly: Anomaly) -> Applied {
        match anomaly {
            Anomaly::MissingKey => self.metrics.inc_missing_key(),
            Anomaly::UndecodableKey(_) | Anomaly::UndecodableValue(_) => self.metrics.inc_decode_error(),
            Anomaly::StoreFailure(_) => self.metrics.inc_stream_error(),
        }
        self.dead_letters.accept(record, &anomaly);
        Applied::Dropped(anomaly)
    }

    fn store_failed(&self, record: &Record, error: StoreError) -> Applied {
        self.metrics.inc_stream_error();
        self.dead_letters.accept(record, &Anomaly::StoreFailure(error.to_string()));
        Applied::StoreFailed
    }

    /// Drive the subscription until it ends or `cancel` fires.
    pub async fn run(self, mut subscription: Subscription, cancel: CancellationToken) {
        tracing::debug!(topic = %self.topic, horizon = self.ready_horizon, "Materializer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = subscription.next() => match event {
                    Some(BrokerEvent::Record(record)) => {
                        self.apply(&record);
                    }
                    Some(BrokerEvent::Stats(stats)) => {
                        tracing::trace!(topic = %self.topic, stats = %stats, "Consumer stats");
                        self.metrics.on_stats(&stats);
                    }
                    Some(BrokerEvent::Error(e)) => {
                        tracing::error!(topic = %self.topic, error = %e, "Stream error");
                        self.metrics.inc_stream_error();
                    }
                    None => {
                        tracing::warn!(topic = %self.topic, "Subscription ended");
                        break;
                    }
                },
            }
        }
        subscription.stop();
        tracing::debug!(topic = %self.topic, last_applied = self.barrier.last_applied(), "Materializer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::metrics::CounterMetrics;
    use crate::cache::readiness::ReadyState;
    use crate::store::MemoryStore;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<(i64, Anomaly)>>);

    impl DeadLetterSink for CollectingSink {
        fn accept(&self, record: &Record, anomaly: &Anomaly) {
            self.0.lock().push((record.offset, anomaly.clone()));
        }
    }

    struct Fixture {
        materializer: Materializer,
        metrics: Arc<CounterMetrics>,
        sink: Arc<CollectingSink>,
    }

    fn fixture(horizon: i64, resolver: Resolver) -> Fixture {
        let metrics = Arc::new(CounterMetrics::new());
        let sink = Arc::new(CollectingSink::default());
        let materializer = Materializer {
            topic: "t".into(),
            ready_horizon: horizon,
            key_encoding: Encoding::Utf8,
            value_codec: ValueCodec::new(Encoding::Json, false).unwrap(),
            store: EncodedStore::new(Arc::new(MemoryStore::new()), Encoding::Utf8, Encoding::Json),
            resolver,
            metrics: metrics.clone(),
            dead_letters: sink.clone(),
            readiness: Arc::new(Readiness::new()),
            barrier: Arc::new(OffsetBarrier::new()),
            events: Arc::new(EventBus::new()),
        };
        Fixture { materializer, metrics, sink }
    }

    fn record(offset: i64, key: Option<&[u8]>, value: serde_json::Value) -> Record {
        Record {
            topic: "t".into(),
            partition: 0,
            offset,
            key: key.map(Bytes::copy_from_slice),
            value: Bytes::from(value.to_string()),
            timestamp: 0,
        }
    }

    #[test]
    fn last_value_wins() {
        let f = fixture(10, identity_resolver());
        f.materializer.apply(&record(0, Some(b"a"), json!(1)));
        f.materializer.apply(&record(1, Some(b"b"), json!(2)));
        f.materializer.apply(&record(2, Some(b"a"), json!(3)));
        let get = |k: &str| f.materializer.store.get(&Datum::from(k)).unwrap();
        assert_eq!(get("a"), Some(Datum::Json(json!(3))));
        assert_eq!(get("b"), Some(Datum::Json(json!(2))));
    }

    #[test]
    fn readiness_flips_at_horizon_not_before() {
        let f = fixture(3, identity_resolver());
        for offset in 0..3 {
            f.materializer.apply(&record(offset, Some(b"k"), json!(offset)));
            assert!(!f.materializer.readiness.is_ready(), "ready at offset {}", offset);
        }
        f.materializer.apply(&record(3, Some(b"k"), json!(3)));
        assert_eq!(f.materializer.readiness.state(), ReadyState::Ready);
    }

    #[test]
    fn sparse_offsets_pass_the_horizon() {
        let f = fixture(3, identity_resolver());
        f.materializer.apply(&record(1, Some(b"k"), json!(1)));
        assert!(!f.materializer.readiness.is_ready());
        f.materializer.apply(&record(4, Some(b"k"), json!(4)));
        assert!(f.materializer.readiness.is_ready());
        assert_eq!(f.materializer.barrier.last_applied(), 4);
    }

    #[test]
    fn missing_keys_are_dropped_but_still_advance() {
        let f = fixture(1, identity_resolver());
        assert_eq!(
            f.materializer.apply(&record(0, Some(b""), json!("x"))),
            Applied::Dropped(Anomaly::MissingKey)
        );
        assert_eq!(f.metrics.missing_key(), 1);
        assert_eq!(f.materializer.barrier.last_applied(), 0);

        f.materializer.apply(&record(1, None, json!("y")));
        assert_eq!(f.metrics.missing_key(), 2);
        assert!(f.materializer.readiness.is_ready());
        assert_eq!(f.materializer.store.len().unwrap(), 0);
        assert_eq!(f.sink.0.lock().len(), 2);
    }

    #[test]
    fn undecodable_values_go_to_dead_letters() {
        let f = fixture(5, identity_resolver());
        let mut bad = record(0, Some(b"k"), json!(null));
        bad.value = Bytes::from_static(b"{not json");
        assert!(matches!(f.materializer.apply(&bad), Applied::Dropped(Anomaly::UndecodableValue(_))));
        assert_eq!(f.metrics.decode_error(), 1);
        assert_eq!(f.metrics.missing_key(), 0);
        assert_eq!(f.materializer.barrier.last_applied(), 0);
    }

    #[test]
    fn redelivery_is_applied_once() {
        let f = fixture(5, identity_resolver());
        let mut rx = f.materializer.events.subscribe();
        f.materializer.apply(&record(0, Some(b"k"), json!("first")));
        assert_eq!(f.materializer.apply(&record(0, Some(b"k"), json!("again"))), Applied::Redelivered);
        assert_eq!(
            f.materializer.store.get(&Datum::from("k")).unwrap(),
            Some(Datum::Json(json!("first")))
        );
        assert_eq!(rx.try_recv().unwrap().offset(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn tombstone_resolver_deletes_and_notifies() {
        let resolver: Resolver = Arc::new(|value: Datum| match value {
            Datum::Json(serde_json::Value::Null) => None,
            other => Some(other),
        });
        let f = fixture(5, resolver);
        let mut rx = f.materializer.events.subscribe();

        f.materializer.apply(&record(0, Some(b"k"), json!({ "a": 1 })));
        assert_eq!(f.materializer.apply(&record(1, Some(b"k"), json!(null))), Applied::Delete);
        assert_eq!(f.materializer.store.get(&Datum::from("k")).unwrap(), None);

        assert!(matches!(rx.try_recv().unwrap(), CacheEvent::Put { .. }));
        assert_eq!(
            rx.try_recv().unwrap(),
            CacheEvent::Delete { key: Datum::from("k"), offset: 1 }
        );
    }

    #[test]
    fn non_utf8_keys_are_stored_by_their_bytes() {
        let f = fixture(0, identity_resolver());
        assert_eq!(f.materializer.apply(&record(0, Some(&[0xff, 0xfe]), json!("v"))), Applied::Put);
        assert_eq!(f.metrics.decode_error(), 0);
        assert_eq!(f.metrics.missing_key(), 0);
        assert_eq!(
            f.materializer.store.get(&Datum::from(vec![0xff, 0xfe])).unwrap(),
            Some(Datum::Json(json!("v")))
        );
    }

    #[test]
    fn store_failures_go_to_dead_letters_and_still_advance() {
        // Raw bytes have no JSON form, so the json-encoded store rejects them.
        let resolver: Resolver = Arc::new(|_| Some(Datum::from(vec![0x00])));
        let f = fixture(0, resolver);
        let mut rx = f.materializer.events.subscribe();

        assert_eq!(f.materializer.apply(&record(0, Some(b"k"), json!(1))), Applied::StoreFailed);
        assert_eq!(f.metrics.stream_error(), 1);
        assert!(matches!(f.sink.0.lock().as_slice(), [(0, Anomaly::StoreFailure(_))]));
        assert!(f.materializer.readiness.is_ready());
        assert_eq!(f.materializer.barrier.last_applied(), 0);
        assert!(rx.try_recv().is_err());
    }
}
