//! Store mutation notifications.
//!
//! Every subscriber owns an unbounded queue, so a slow reader during a long
//! replay never loses events. Queues whose receiver is gone are pruned on
//! the next publish.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::codec::Datum;

/// Notification for every store mutation, including those before Ready.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheEvent {
    Put { key: Datum, offset: i64 },
    Delete { key: Datum, offset: i64 },
}

impl CacheEvent {
    pub fn key(&self) -> &Datum {
        match self {
            CacheEvent::Put { key, .. } | CacheEvent::Delete { key, .. } => key,
        }
    }

    pub fn offset(&self) -> i64 {
        match self {
            CacheEvent::Put { offset, .. } | CacheEvent::Delete { offset, .. } => *offset,
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: DashMap<u64, mpsc::UnboundedSender<CacheEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CacheEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, tx);
        rx
    }

    pub fn publish(&self, event: CacheEvent) {
        if self.subscribers.is_empty() {
            return;
        }
        self.subscribers.retain(|id, tx| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                tracing::debug!(subscriber = *id, "Event subscriber dropped");
            }
            alive
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
