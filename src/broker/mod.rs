//! Boundary with the ordered log / broker.
//!
//! A cache needs four things from a broker: the partition watermarks, a
//! timestamp index lookup, an offset-addressed subscription, and a producer
//! whose delivery reports come back out-of-band keyed by a correlation token.
//! [`memory::MemoryBroker`] is the in-process implementation.

pub mod memory;

use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::BrokerError;

pub use memory::MemoryBroker;

/// Caches consume and produce a single partition.
pub const PARTITION: i32 = 0;

// ==========================================
// RECORDS
// ==========================================

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Watermarks {
    /// First offset still retained.
    pub low: i64,
    /// Offset the next produced record will get.
    pub high: i64,
}

impl Watermarks {
    /// Offset of the last existing record, -1 for an empty partition.
    pub fn last_offset(&self) -> i64 {
        self.high - 1
    }
}

// ==========================================
// CONSUMING
// ==========================================

#[derive(Clone, Debug)]
pub struct SubscribeRequest {
    pub topic: String,
    pub group_id: String,
    pub partition: i32,
    pub from_offset: i64,
    pub fetch_wait_max: Duration,
    pub stats_interval: Option<Duration>,
}

/// Periodic consumer statistics, carried as JSON in [`BrokerEvent::Stats`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub topic: String,
    pub partition: i32,
    pub group: String,
    pub next_offset: i64,
    pub consumed: u64,
}

#[derive(Debug)]
pub enum BrokerEvent {
    Record(Record),
    Stats(serde_json::Value),
    Error(BrokerError),
}

/// An assigned partition stream. Dropping it stops consumption.
pub struct Subscription {
    events: mpsc::Receiver<BrokerEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<BrokerEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// `None` once the broker side has ended the stream.
    pub async fn next(&mut self) -> Option<BrokerEvent> {
        self.events.recv().await
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ==========================================
// PRODUCING
// ==========================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acks {
    /// Acknowledged once every in-sync replica has the record.
    All,
    Leader,
}

#[derive(Clone, Debug)]
pub struct ProducerConfig {
    pub client_id: String,
    pub acks: Acks,
    pub connect_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct OutboundRecord {
    pub topic: String,
    pub partition: i32,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub timestamp: i64,
    /// Opaque to the broker, echoed back in the delivery report.
    pub correlation: u64,
}

#[derive(Clone, Debug)]
pub struct DeliveryReport {
    pub correlation: u64,
    pub topic: String,
    pub partition: i32,
    pub key: Option<Bytes>,
    pub size: usize,
    /// Final offset of the record, or why it was rejected.
    pub result: Result<i64, BrokerError>,
}

pub trait LogProducer: Send + Sync {
    /// Enqueue a record. The outcome arrives as a [`DeliveryReport`].
    fn produce(&self, record: OutboundRecord) -> Result<(), BrokerError>;

    /// Stop accepting records. Pending reports are still delivered.
    fn close(&self);
}

pub struct ProducerConnection {
    pub producer: Box<dyn LogProducer>,
    pub reports: mpsc::UnboundedReceiver<DeliveryReport>,
}

// ==========================================
// BROKER
// ==========================================

pub trait LogBroker: Send + Sync + 'static {
    fn query_watermarks<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Watermarks, BrokerError>>;

    /// Earliest offset whose timestamp is at or after `timestamp_ms`, `None`
    /// when no such record exists.
    fn offset_for_timestamp<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        timestamp_ms: i64,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Option<i64>, BrokerError>>;

    fn subscribe(&self, request: SubscribeRequest) -> BoxFuture<'_, Result<Subscription, BrokerError>>;

    fn connect_producer(&self, config: ProducerConfig) -> BoxFuture<'_, Result<ProducerConnection, BrokerError>>;
}
