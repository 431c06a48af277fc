//! End-to-end producer delivery against the in-memory cluster
//!
//! Covers buffering limits, full and partial delivery, retry exhaustion,
//! fire-and-forget mode and metadata recovery.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tributary_client::memory::InMemoryCluster;
use tributary_client::protocol::PartitionErrorCode;
use tributary_client::{
    ClusterError, DeliveryEvent, Error, Instrumenter, Producer, ProducerConfig, ProducerRecord,
    RequiredAcks, TopicPartition,
};

#[derive(Default)]
struct RecordingInstrumenter {
    events: Mutex<Vec<DeliveryEvent>>,
    topic_errors: Mutex<Vec<String>>,
}

impl Instrumenter for RecordingInstrumenter {
    fn deliver_messages(&self, event: &DeliveryEvent) {
        self.events.lock().push(*event);
    }

    fn topic_error(&self, topic: &str, _error: &ClusterError) {
        self.topic_errors.lock().push(topic.to_string());
    }
}

fn setup(
    cluster: &Arc<InMemoryCluster>,
    config: ProducerConfig,
) -> (Producer, Arc<RecordingInstrumenter>) {
    let recorder = Arc::new(RecordingInstrumenter::default());
    let producer = Producer::new(config, cluster.clone())
        .expect("valid config")
        .with_instrumenter(recorder.clone());
    (producer, recorder)
}

#[tokio::test]
async fn test_buffer_limit_then_drain() {
    let cluster = Arc::new(InMemoryCluster::new(1).with_topic("greetings", 1));
    let config = ProducerConfig::builder().max_buffer_size(2).build();
    let (mut producer, _) = setup(&cluster, config);

    producer.produce(ProducerRecord::new("greetings", "A")).unwrap();
    producer.produce(ProducerRecord::new("greetings", "B")).unwrap();
    let err = producer
        .produce(ProducerRecord::new("greetings", "C"))
        .unwrap_err();
    assert!(matches!(err, Error::BufferOverflow(_)));
    assert_eq!(producer.buffer_size(), 2);

    producer.deliver_messages().await.unwrap();
    assert_eq!(producer.buffer_size(), 0);
    assert_eq!(
        cluster.values(&TopicPartition::new("greetings", 0)),
        vec!["A", "B"]
    );

    // Room again after draining
    producer.produce(ProducerRecord::new("greetings", "C")).unwrap();
}

#[tokio::test]
async fn test_everything_delivered_first_attempt() {
    let cluster = Arc::new(InMemoryCluster::new(3).with_topic("events", 6));
    let (mut producer, recorder) = setup(&cluster, ProducerConfig::default());

    for i in 0..20 {
        let record = ProducerRecord::new("events", format!("event-{}", i))
            .key(format!("user-{}", i % 4));
        producer.produce(record).unwrap();
    }

    let report = producer.deliver_messages().await.unwrap();

    assert_eq!(report.message_count, 20);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.delivered_message_count, 20);
    assert_eq!(producer.buffer_size(), 0);
    assert_eq!(cluster.total_messages(), 20);
    assert_eq!(*recorder.events.lock(), vec![report]);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_names_failing_partitions() {
    let cluster = Arc::new(InMemoryCluster::new(2).with_topic("orders", 3));
    let config = ProducerConfig::builder().max_retries(3).build();
    let (mut producer, recorder) = setup(&cluster, config);

    let stuck_a = TopicPartition::new("orders", 1);
    let stuck_b = TopicPartition::new("orders", 2);
    cluster.fail_partition(&stuck_a, PartitionErrorCode::NotEnoughReplicas, 4);
    cluster.fail_partition(&stuck_b, PartitionErrorCode::RequestTimedOut, 4);

    producer.produce(ProducerRecord::new("orders", "o0").partition(0)).unwrap();
    producer.produce(ProducerRecord::new("orders", "o1").partition(1)).unwrap();
    producer.produce(ProducerRecord::new("orders", "o2").partition(2)).unwrap();

    match producer.deliver_messages().await {
        Err(Error::DeliveryFailed {
            partitions,
            unassigned,
            attempts,
        }) => {
            assert_eq!(partitions, vec![stuck_a.clone(), stuck_b.clone()]);
            assert_eq!(unassigned, 0);
            assert_eq!(attempts, 4);
        }
        other => panic!("expected DeliveryFailed, got {:?}", other.map(|_| ())),
    }

    // Delivered part is gone, the rest waits for the next call
    assert_eq!(producer.buffer_size(), 2);
    let events = recorder.events.lock().clone();
    assert_eq!(
        events,
        vec![DeliveryEvent {
            message_count: 3,
            attempts: 4,
            delivered_message_count: 1,
        }]
    );

    let report = producer.deliver_messages().await.unwrap();
    assert_eq!(report.message_count, 2);
    assert_eq!(cluster.values(&TopicPartition::new("orders", 0)), vec!["o0"]);
    assert_eq!(cluster.values(&stuck_a), vec!["o1"]);
    assert_eq!(cluster.values(&stuck_b), vec!["o2"]);
    assert_eq!(producer.stats().failed_deliveries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_partial_success_never_resends_acked_group() {
    let cluster = Arc::new(InMemoryCluster::new(1).with_topic("t", 2));
    let (mut producer, _) = setup(&cluster, ProducerConfig::default());
    let acked = TopicPartition::new("t", 0);
    let retried = TopicPartition::new("t", 1);
    cluster.fail_partition(&retried, PartitionErrorCode::NotLeaderForPartition, 2);

    producer.produce(ProducerRecord::new("t", "a1").partition(0)).unwrap();
    producer.produce(ProducerRecord::new("t", "b1").partition(1)).unwrap();
    producer.produce(ProducerRecord::new("t", "a2").partition(0)).unwrap();
    producer.produce(ProducerRecord::new("t", "b2").partition(1)).unwrap();
    producer.produce(ProducerRecord::new("t", "b3").partition(1)).unwrap();

    let report = producer.deliver_messages().await.unwrap();
    assert_eq!(report.attempts, 3);

    let broker = cluster.broker(0).unwrap();
    let requests = broker.requests();
    assert_eq!(requests.len(), 3);
    let sent_acked = requests
        .iter()
        .flat_map(|r| r.batches.iter())
        .filter(|b| b.topic_partition() == acked)
        .count();
    assert_eq!(sent_acked, 1);

    assert_eq!(cluster.values(&acked), vec!["a1", "a2"]);
    assert_eq!(cluster.values(&retried), vec!["b1", "b2", "b3"]);
    // Leadership errors force a metadata refresh before each retry
    assert_eq!(cluster.refresh_count(), 2);
}

#[tokio::test]
async fn test_fire_and_forget_clears_buffer() {
    let cluster = Arc::new(InMemoryCluster::new(1).with_topic("logs", 1));
    cluster.broker(0).unwrap().fail_connection(10);
    let (mut producer, recorder) = setup(&cluster, ProducerConfig::fire_and_forget());

    producer.produce(ProducerRecord::new("logs", "line 1")).unwrap();
    producer.produce(ProducerRecord::new("logs", "line 2")).unwrap();

    let report = producer.deliver_messages().await.unwrap();

    assert_eq!(report.attempts, 1);
    assert_eq!(report.delivered_message_count, 2);
    assert_eq!(producer.buffer_size(), 0);
    assert_eq!(cluster.total_messages(), 0);
    assert_eq!(recorder.events.lock().len(), 1);
}

#[tokio::test]
async fn test_acks_none_requests_carry_no_response() {
    let cluster = Arc::new(InMemoryCluster::new(1).with_topic("logs", 1));
    let config = ProducerConfig::builder()
        .required_acks(RequiredAcks::None)
        .build();
    let (mut producer, _) = setup(&cluster, config);

    producer.produce(ProducerRecord::new("logs", "x")).unwrap();
    producer.deliver_messages().await.unwrap();

    let requests = cluster.broker(0).unwrap().requests();
    assert_eq!(requests[0].required_acks, RequiredAcks::None);
    assert_eq!(cluster.values(&TopicPartition::new("logs", 0)), vec!["x"]);
}

#[tokio::test]
async fn test_same_key_same_partition() {
    let cluster = Arc::new(InMemoryCluster::new(2).with_topic("accounts", 6));
    let (mut producer, _) = setup(&cluster, ProducerConfig::default());

    for i in 0..5 {
        producer
            .produce(ProducerRecord::new("accounts", format!("update-{}", i)).key("account-42"))
            .unwrap();
    }
    producer.deliver_messages().await.unwrap();

    let expected = tributary_core::murmur2_partition(b"account-42", 6);
    let tp = TopicPartition::new("accounts", expected);
    assert_eq!(
        cluster.values(&tp),
        vec!["update-0", "update-1", "update-2", "update-3", "update-4"]
    );
    assert_eq!(cluster.total_messages(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_topic_stays_pending() {
    let cluster = Arc::new(InMemoryCluster::new(1).with_topic("known", 1));
    let config = ProducerConfig::builder().max_retries(2).build();
    let (mut producer, recorder) = setup(&cluster, config);

    producer.produce(ProducerRecord::new("known", "k")).unwrap();
    producer.produce(ProducerRecord::new("later", "l1")).unwrap();
    producer.produce(ProducerRecord::new("later", "l2")).unwrap();

    match producer.deliver_messages().await {
        Err(Error::DeliveryFailed {
            partitions,
            unassigned,
            attempts,
        }) => {
            assert!(partitions.is_empty());
            assert_eq!(unassigned, 2);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected DeliveryFailed, got {:?}", other.map(|_| ())),
    }
    assert!(cluster.is_stale());
    assert_eq!(recorder.topic_errors.lock().len(), 3);
    assert!(cluster.target_topics().contains("later"));

    cluster.create_topic("later", 1);
    let report = producer.deliver_messages().await.unwrap();
    assert_eq!(report.delivered_message_count, 2);
    assert_eq!(
        cluster.values(&TopicPartition::new("later", 0)),
        vec!["l1", "l2"]
    );
}

#[tokio::test]
async fn test_compressed_delivery() {
    let cluster = Arc::new(InMemoryCluster::new(1).with_topic("metrics", 2));
    let config = ProducerConfig::builder()
        .compression_codec("gzip")
        .compression_threshold(3)
        .build();
    let (mut producer, _) = setup(&cluster, config);

    for i in 0..3 {
        producer
            .produce(ProducerRecord::new("metrics", format!("cpu={}", i)).partition(0))
            .unwrap();
    }
    producer
        .produce(ProducerRecord::new("metrics", "mem=1").partition(1))
        .unwrap();
    producer.deliver_messages().await.unwrap();

    let requests = cluster.broker(0).unwrap().requests();
    let codecs: Vec<_> = requests[0]
        .batches
        .iter()
        .map(|b| (b.partition, b.codec.name()))
        .collect();
    assert_eq!(codecs, vec![(0, "gzip"), (1, "none")]);
    assert_eq!(
        cluster.values(&TopicPartition::new("metrics", 0)),
        vec!["cpu=0", "cpu=1", "cpu=2"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_broker_times_out_then_recovers() {
    let cluster = Arc::new(InMemoryCluster::new(1).with_topic("t", 1));
    let broker = cluster.broker(0).unwrap();
    broker.set_latency(Duration::from_secs(60));
    let config = ProducerConfig::builder()
        .request_timeout(Duration::from_secs(1))
        .max_retries(1)
        .build();
    let (mut producer, _) = setup(&cluster, config);

    producer.produce(ProducerRecord::new("t", "slow")).unwrap();
    assert!(matches!(
        producer.deliver_messages().await,
        Err(Error::DeliveryFailed { attempts: 2, .. })
    ));
    // A silent broker is treated like a lost connection
    assert!(cluster.is_stale());
    assert_eq!(cluster.refresh_count(), 1);

    broker.set_latency(Duration::ZERO);
    producer.deliver_messages().await.unwrap();
    assert_eq!(producer.buffer_size(), 0);
}
