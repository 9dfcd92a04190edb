//! Fetch loop behind a [`Subscription`](crate::broker::Subscription).

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::broker::memory::topic::TopicHandle;
use crate::broker::{BrokerEvent, ConsumerStats, SubscribeRequest};

pub(crate) async fn fetch_loop(
    topic: TopicHandle,
    request: SubscribeRequest,
    batch: usize,
    events: mpsc::Sender<BrokerEvent>,
    cancel: CancellationToken,
) {
    let mut next = request.from_offset.max(0);
    let mut consumed: u64 = 0;
    let mut last_stats = Instant::now();

    tracing::debug!(
        topic = %request.topic,
        group = %request.group_id,
        from_offset = next,
        "Subscription started"
    );

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let records = topic.read(next, batch).await;
        if records.is_empty() {
            // Long-poll: wake on new data or after fetch_wait_max, whichever is first.
            let notify = Arc::new(Notify::new());
            topic.wait_for_data(next, notify.clone()).await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = notify.notified() => {}
                _ = tokio::time::sleep(request.fetch_wait_max) => {}
            }
        } else {
            for record in records {
                next = record.offset + 1;
                consumed += 1;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = events.send(BrokerEvent::Record(record)) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        }

        if let Some(interval) = request.stats_interval {
            if last_stats.elapsed() >= interval {
                last_stats = Instant::now();
                let stats = ConsumerStats {
                    topic: request.topic.clone(),
                    partition: request.partition,
                    group: request.group_id.clone(),
                    next_offset: next,
                    consumed,
                };
                let Ok(payload) = serde_json::to_value(&stats) else { continue };
                if events.try_send(BrokerEvent::Stats(payload)).is_err() && events.is_closed() {
                    return;
                }
            }
        }
    }

    tracing::debug!(topic = %request.topic, group = %request.group_id, consumed, "Subscription stopped");
}
