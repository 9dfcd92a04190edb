use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::broker::memory::MemoryBroker;
use crate::broker::{DeliveryReport, LogProducer, OutboundRecord, ProducerConfig, ProducerConnection};
use crate::error::BrokerError;

pub(crate) struct MemoryProducer {
    tx: mpsc::UnboundedSender<OutboundRecord>,
    closed: AtomicBool,
}

impl MemoryProducer {
    pub(crate) fn connect(broker: MemoryBroker, config: ProducerConfig) -> ProducerConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        tracing::info!(client_id = %config.client_id, acks = ?config.acks, "Producer connected");
        tokio::spawn(delivery_pump(broker, rx, report_tx));

        ProducerConnection {
            producer: Box::new(MemoryProducer { tx, closed: AtomicBool::new(false) }),
            reports: report_rx,
        }
    }
}

impl LogProducer for MemoryProducer {
    fn produce(&self, record: OutboundRecord) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        self.tx.send(record).map_err(|_| BrokerError::Closed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Appends records in submission order and reports each outcome.
async fn delivery_pump(
    broker: MemoryBroker,
    mut rx: mpsc::UnboundedReceiver<OutboundRecord>,
    reports: mpsc::UnboundedSender<DeliveryReport>,
) {
    while let Some(record) = rx.recv().await {
        let size = record.value.len();
        let result = match broker.resolve_topic(&record.topic) {
            Ok(topic) => topic.append(record.key.clone(), record.value, record.timestamp).await,
            Err(e) => Err(e),
        };

        let report = DeliveryReport {
            correlation: record.correlation,
            topic: record.topic,
            partition: record.partition,
            key: record.key,
            size,
            result,
        };
        if reports.send(report).is_err() {
            break;
        }
    }
    tracing::debug!("Producer delivery pump stopped");
}
