//! Resolves where a cache starts consuming and what it must reach to be ready.

use std::time::Duration;

use crate::broker::{LogBroker, PARTITION};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, CacheError};
use crate::utils::parse_instant_ms;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StartPolicy {
    #[default]
    Beginning,
    /// RFC 3339 or epoch milliseconds.
    Timestamp(String),
}

impl StartPolicy {
    /// Validated before any network call, a bad instant never reaches the broker.
    pub fn validate(&self) -> Result<StartPosition, CacheError> {
        match self {
            StartPolicy::Beginning => Ok(StartPosition::Beginning),
            StartPolicy::Timestamp(raw) => parse_instant_ms(raw)
                .map(StartPosition::Timestamp)
                .ok_or_else(|| {
                    CacheError::InvalidArgument(format!("Received invalid start timestamp: {}", raw))
                }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartPosition {
    Beginning,
    Timestamp(i64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub topic: String,
    pub partition: i32,
    pub group_id: String,
    pub start_offset: i64,
    /// Offset of the last record at bootstrap time, -1 for an empty partition.
    pub ready_horizon: i64,
}

/// Last existing offset of the partition, retried a fixed number of times.
pub async fn query_horizon(
    broker: &dyn LogBroker,
    topic: &str,
    retries: u32,
    timeout: Duration,
) -> Result<i64, BrokerError> {
    let attempts = retries.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match broker.query_watermarks(topic, PARTITION, timeout).await {
            Ok(watermarks) => {
                tracing::debug!(topic = %topic, low = watermarks.low, high = watermarks.high, "queryWatermarkOffsets");
                return Ok(watermarks.last_offset());
            }
            // Retrying won't make a missing topic appear.
            Err(e @ BrokerError::TopicNotFound(_)) => return Err(e),
            Err(e) if attempt >= attempts => {
                tracing::error!(topic = %topic, attempt, error = %e, "Watermark query failed, giving up");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(topic = %topic, attempt, error = %e, "Watermark query failed, retrying");
            }
        }
    }
}

pub async fn resolve_stream(
    broker: &dyn LogBroker,
    topic: &str,
    group_id: &str,
    config: &BrokerConfig,
    start: StartPosition,
) -> Result<StreamDescriptor, BrokerError> {
    let ready_horizon = query_horizon(broker, topic, config.connect_retries, config.connect_timeout()).await?;

    let start_offset = match start {
        StartPosition::Beginning => 0,
        StartPosition::Timestamp(ts) => {
            match broker.offset_for_timestamp(topic, PARTITION, ts, config.connect_timeout()).await? {
                Some(offset) => offset,
                None => {
                    // Nothing newer than ts: start at the latest record instead of replaying everything.
                    let fallback = ready_horizon.max(0);
                    tracing::debug!(topic = %topic, timestamp = ts, fallback, "No offset for timestamp");
                    fallback
                }
            }
        }
    };

    tracing::debug!(topic = %topic, start_offset, ready_horizon, "Stream resolved");
    Ok(StreamDescriptor {
        topic: topic.to_string(),
        partition: PARTITION,
        group_id: group_id.to_string(),
        start_offset,
        ready_horizon,
    })
}
