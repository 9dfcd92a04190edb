//! Changelog-to-table caching: a local key/value projection of a topic,
//! kept in sync with the topic's offsets.

pub mod broker;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod store;
pub mod utils;

pub use broker::{LogBroker, MemoryBroker};
pub use cache::{
    CacheEvent, CacheMetrics, CacheOptions, CounterMetrics, DeadLetterSink, KafkaCache, KafkaWriter, OffsetWait,
    ReadyState, Resolver, StartPolicy, WriterOptions,
};
pub use codec::{Datum, Encoding};
pub use config::Config;
pub use error::{BrokerError, CacheError};
pub use store::{KvStore, MemoryStore, SqliteStore};
