mod helpers;
use helpers::{cache_options, new_topic, setup_broker, within, writer_options};
use futures_util::future::join_all;
use kafka_cache::{BrokerError, CacheError, Datum, KafkaCache, KafkaWriter};
use serde_json::json;
use std::collections::HashSet;

// =========================================================================================
// 1. FEATURE TESTS (Happy Path + Logic)
// =========================================================================================

mod features {
    use super::*;

    #[tokio::test]
    async fn test_standalone_writer_feeds_a_cache() {
        let (broker, shared) = setup_broker();
        let topic = new_topic(&broker, "writer");
        let writer = within(KafkaWriter::connect(writer_options(&topic), shared.clone())).await.unwrap();

        assert_eq!(within(writer.write("a", json!(1))).await.unwrap(), 0);
        assert_eq!(within(writer.write("b", json!(2))).await.unwrap(), 1);

        let cache = KafkaCache::create(cache_options(&topic), shared).unwrap();
        within(cache.on_ready()).await.unwrap();
        assert_eq!(cache.get("a").unwrap(), Datum::Json(json!(1)));
        assert_eq!(cache.get("b").unwrap(), Datum::Json(json!(2)));
    }

    #[tokio::test]
    async fn test_producer_is_connected_lazily_once() {
        let (broker, shared) = setup_broker();
        let topic = new_topic(&broker, "lazy");
        let writer = within(KafkaWriter::connect(writer_options(&topic), shared)).await.unwrap();
        assert!(!writer.is_connected());
        assert_eq!(broker.producer_connections(), 0);

        within(writer.write("k", json!("v1"))).await.unwrap();
        within(writer.write("k", json!("v2"))).await.unwrap();
        assert!(writer.is_connected());
        assert_eq!(broker.producer_connections(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_writes_get_distinct_offsets() {
        let (broker, shared) = setup_broker();
        let topic = new_topic(&broker, "concurrent");
        let writer = within(KafkaWriter::connect(writer_options(&topic), shared)).await.unwrap();

        let writes = (0..50).map(|i| writer.write(format!("k{}", i), json!(i)));
        let offsets: HashSet<i64> = within(join_all(writes))
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(offsets, (0..50).collect::<HashSet<i64>>());
    }
}

// =========================================================================================
// 2. FAILURES
// =========================================================================================

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_missing_topic_is_rejected_before_connecting() {
        let (broker, shared) = setup_broker();
        let err = within(KafkaWriter::connect(writer_options("no-such-topic"), shared)).await.err().unwrap();
        assert!(matches!(
            err,
            CacheError::BootstrapFailure { source: BrokerError::TopicNotFound(_), .. }
        ));
        assert_eq!(broker.producer_connections(), 0);
    }

    #[tokio::test]
    async fn test_oversized_write_fails_only_that_write() {
        let (broker, shared) = setup_broker();
        let topic = new_topic(&broker, "too-large");
        let writer = within(KafkaWriter::connect(writer_options(&topic), shared)).await.unwrap();

        let huge = json!({ "blob": "x".repeat(128 * 1024) });
        let err = within(writer.write("big", huge)).await.unwrap_err();
        assert!(matches!(err, CacheError::DeliveryFailure(BrokerError::MessageTooLarge { .. })));

        assert_eq!(within(writer.write("small", json!("ok"))).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_falsy_keys_are_refused() {
        let (broker, shared) = setup_broker();
        let topic = new_topic(&broker, "falsy");
        let writer = within(KafkaWriter::connect(writer_options(&topic), shared)).await.unwrap();

        assert!(matches!(writer.write("", json!(1)).await, Err(CacheError::InvalidArgument(_))));
        assert!(matches!(writer.write(json!(false), json!(1)).await, Err(CacheError::InvalidArgument(_))));
        assert_eq!(broker.producer_connections(), 0);
    }

    #[tokio::test]
    async fn test_closed_writer_rejects_writes() {
        let (broker, shared) = setup_broker();
        let topic = new_topic(&broker, "closed");
        let writer = within(KafkaWriter::connect(writer_options(&topic), shared)).await.unwrap();
        within(writer.write("k", json!(1))).await.unwrap();

        writer.close();
        assert_eq!(writer.write("k", json!(2)).await, Err(CacheError::DeliveryFailure(BrokerError::Closed)));
    }
}
