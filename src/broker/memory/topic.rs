//! Topic Actor: single-partition log owned by one task, driven over MPSC.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::broker::{Record, Watermarks, PARTITION};
use crate::error::BrokerError;

pub enum TopicCommand {
    Append {
        key: Option<Bytes>,
        value: Bytes,
        timestamp: i64,
        reply: oneshot::Sender<Result<i64, BrokerError>>,
    },
    Read {
        offset: i64,
        limit: usize,
        reply: oneshot::Sender<Vec<Record>>,
    },
    /// Long-poll registration: `notify` fires once `offset` exists.
    WaitForData {
        offset: i64,
        notify: Arc<Notify>,
    },
    GetWatermarks {
        reply: oneshot::Sender<Watermarks>,
    },
    OffsetForTimestamp {
        timestamp_ms: i64,
        reply: oneshot::Sender<Option<i64>>,
    },
    /// Retention: drop every record below `offset`.
    TruncateBefore {
        offset: i64,
        reply: oneshot::Sender<i64>,
    },
}

#[derive(Clone)]
pub struct TopicHandle {
    pub name: String,
    tx: mpsc::Sender<TopicCommand>,
}

impl TopicHandle {
    pub fn new(name: String, buffer_size: usize, max_message_bytes: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size);

        let actor_name = name.clone();
        tokio::spawn(async move {
            topic_actor(actor_name, rx, max_message_bytes).await;
        });

        Self { name, tx }
    }

    pub async fn append(&self, key: Option<Bytes>, value: Bytes, timestamp: i64) -> Result<i64, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(TopicCommand::Append { key, value, timestamp, reply: reply_tx })
            .await
            .map_err(|_| BrokerError::Closed)?;
        reply_rx.await.map_err(|_| BrokerError::Closed)?
    }

    pub async fn read(&self, offset: i64, limit: usize) -> Vec<Record> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(TopicCommand::Read { offset, limit, reply: reply_tx }).await.is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub async fn wait_for_data(&self, offset: i64, notify: Arc<Notify>) {
        let _ = self.tx.send(TopicCommand::WaitForData { offset, notify }).await;
    }

    pub async fn watermarks(&self) -> Result<Watermarks, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(TopicCommand::GetWatermarks { reply: reply_tx })
            .await
            .map_err(|_| BrokerError::Closed)?;
        reply_rx.await.map_err(|_| BrokerError::Closed)
    }

    pub async fn offset_for_timestamp(&self, timestamp_ms: i64) -> Result<Option<i64>, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(TopicCommand::OffsetForTimestamp { timestamp_ms, reply: reply_tx })
            .await
            .map_err(|_| BrokerError::Closed)?;
        reply_rx.await.map_err(|_| BrokerError::Closed)
    }

    pub async fn truncate_before(&self, offset: i64) -> Result<i64, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(TopicCommand::TruncateBefore { offset, reply: reply_tx })
            .await
            .map_err(|_| BrokerError::Closed)?;
        reply_rx.await.map_err(|_| BrokerError::Closed)
    }
}

async fn topic_actor(name: String, mut rx: mpsc::Receiver<TopicCommand>, max_message_bytes: usize) {
    let mut records: VecDeque<Record> = VecDeque::new();
    let mut next_offset: i64 = 0;
    let mut start_offset: i64 = 0;

    // Weak so a dropped subscription does not keep its notifier alive here.
    let mut waiters: Vec<(i64, Weak<Notify>)> = Vec::new();

    tracing::debug!(topic = %name, "Topic actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            TopicCommand::Append { key, value, timestamp, reply } => {
                let size = value.len() + key.as_ref().map_or(0, |k| k.len());
                if size > max_message_bytes {
                    let _ = reply.send(Err(BrokerError::MessageTooLarge { size, limit: max_message_bytes }));
                    continue;
                }

                let offset = next_offset;
                records.push_back(Record {
                    topic: name.clone(),
                    partition: PARTITION,
                    offset,
                    key,
                    value,
                    timestamp,
                });
                next_offset += 1;

                waiters.retain(|(wait_offset, weak_notify)| {
                    if *wait_offset <= offset {
                        if let Some(notify) = weak_notify.upgrade() {
                            notify.notify_one();
                        }
                        false
                    } else {
                        weak_notify.upgrade().is_some()
                    }
                });

                let _ = reply.send(Ok(offset));
            }

            TopicCommand::Read { offset, limit, reply } => {
                // Below the retention window: resume at the earliest record.
                let from = offset.max(start_offset);
                let relative_idx = (from - start_offset) as usize;
                let result = if relative_idx >= records.len() {
                    Vec::new()
                } else {
                    records.iter().skip(relative_idx).take(limit).cloned().collect()
                };
                let _ = reply.send(result);
            }

            TopicCommand::WaitForData { offset, notify } => {
                if offset < next_offset {
                    notify.notify_one();
                } else {
                    waiters.push((offset, Arc::downgrade(&notify)));
                }
            }

            TopicCommand::GetWatermarks { reply } => {
                let _ = reply.send(Watermarks { low: start_offset, high: next_offset });
            }

            TopicCommand::OffsetForTimestamp { timestamp_ms, reply } => {
                let found = records
                    .iter()
                    .find(|r| r.timestamp >= timestamp_ms)
                    .map(|r| r.offset);
                let _ = reply.send(found);
            }

            TopicCommand::TruncateBefore { offset, reply } => {
                let target = offset.min(next_offset);
                while records.front().is_some_and(|r| r.offset < target) {
                    records.pop_front();
                }
                start_offset = start_offset.max(target);
                tracing::info!(topic = %name, start_offset, "Retention truncated topic");
                let _ = reply.send(start_offset);
            }
        }
    }

    tracing::debug!(topic = %name, "Topic actor stopped");
}
