//! Passive hooks the cache reports into: counters and a dead-letter sink.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::broker::Record;

pub const MISSING_KEY_COUNTER: &str = "kafka_cache_missing_kafka_key";
pub const STREAM_ERROR_COUNTER: &str = "kafka_cache_stream_error";
pub const DECODE_ERROR_COUNTER: &str = "kafka_cache_decode_error";

pub trait CacheMetrics: Send + Sync {
    /// A record was ignored for lack of a usable key.
    fn inc_missing_key(&self);

    /// The broker reported an error, or applying a record to the store failed.
    fn inc_stream_error(&self);

    fn inc_decode_error(&self) {}

    /// Periodic consumer statistics forwarded from the broker.
    fn on_stats(&self, _stats: &serde_json::Value) {}
}

pub struct NoopMetrics;

impl CacheMetrics for NoopMetrics {
    fn inc_missing_key(&self) {}
    fn inc_stream_error(&self) {}
}

#[derive(Default, Debug)]
pub struct CounterMetrics {
    missing_key: AtomicU64,
    stream_error: AtomicU64,
    decode_error: AtomicU64,
    stats_events: AtomicU64,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing_key(&self) -> u64 {
        self.missing_key.load(Ordering::Relaxed)
    }

    pub fn stream_error(&self) -> u64 {
        self.stream_error.load(Ordering::Relaxed)
    }

    pub fn decode_error(&self) -> u64 {
        self.decode_error.load(Ordering::Relaxed)
    }

    pub fn stats_events(&self) -> u64 {
        self.stats_events.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            missing_key: self.missing_key(),
            stream_error: self.stream_error(),
            decode_error: self.decode_error(),
            stats_events: self.stats_events(),
        }
    }
}

/// Point-in-time counter values, serialized under their exported names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    #[serde(rename = "kafka_cache_missing_kafka_key")]
    pub missing_key: u64,
    #[serde(rename = "kafka_cache_stream_error")]
    pub stream_error: u64,
    #[serde(rename = "kafka_cache_decode_error")]
    pub decode_error: u64,
    #[serde(skip)]
    pub stats_events: u64,
}

impl MetricsSnapshot {
    /// `(name, value)` pairs for exporters.
    pub fn counters(&self) -> [(&'static str, u64); 3] {
        [
            (MISSING_KEY_COUNTER, self.missing_key),
            (STREAM_ERROR_COUNTER, self.stream_error),
            (DECODE_ERROR_COUNTER, self.decode_error),
        ]
    }
}

impl CacheMetrics for CounterMetrics {
    fn inc_missing_key(&self) {
        self.missing_key.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_stream_error(&self) {
        self.stream_error.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_decode_error(&self) {
        self.decode_error.fetch_add(1, Ordering::Relaxed);
    }

    fn on_stats(&self, _stats: &serde_json::Value) {
        self.stats_events.fetch_add(1, Ordering::Relaxed);
    }
}

// ========================================
// DEAD LETTERS
// ========================================

#[derive(Clone, Debug, PartialEq)]
pub enum Anomaly {
    MissingKey,
    UndecodableKey(String),
    UndecodableValue(String),
    /// Decoded fine but the local store rejected the write.
    StoreFailure(String),
}

/// Receives records the cache could not apply. The record still counts as
/// consumed: readiness and offsets move on regardless.
pub trait DeadLetterSink: Send + Sync {
    fn accept(&self, record: &Record, anomaly: &Anomaly);
}

/// Default sink: log and drop.
pub struct LogDeadLetters;

impl DeadLetterSink for LogDeadLetters {
    fn accept(&self, record: &Record, anomaly: &Anomaly) {
        match anomaly {
            Anomaly::MissingKey => tracing::error!(
                topic = %record.topic,
                offset = record.offset,
                "Falsy keys are not supported, record dropped"
            ),
            Anomaly::UndecodableKey(e) => tracing::error!(
                topic = %record.topic,
                offset = record.offset,
                error = %e,
                "Failed to decode record key, record dropped"
            ),
            Anomaly::UndecodableValue(e) => tracing::error!(
                topic = %record.topic,
                offset = record.offset,
                error = %e,
                "Failed to decode record value, record dropped"
            ),
            Anomaly::StoreFailure(e) => tracing::error!(
                topic = %record.topic,
                offset = record.offset,
                error = %e,
                "Store write failed, record dropped"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_uses_exported_counter_names() {
        let metrics = CounterMetrics::new();
        metrics.inc_missing_key();
        metrics.inc_missing_key();
        metrics.inc_stream_error();
        metrics.on_stats(&serde_json::json!({}));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counters()[0], (MISSING_KEY_COUNTER, 2));
        assert_eq!(snapshot.stats_events, 1);
        assert_eq!(
            serde_json::to_value(snapshot).unwrap(),
            serde_json::json!({
                "kafka_cache_missing_kafka_key": 2,
                "kafka_cache_stream_error": 1,
                "kafka_cache_decode_error": 0,
            })
        );
    }
}
