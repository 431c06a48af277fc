//! Produce a few keyed messages to an in-memory cluster with one flaky
//! partition, then deliver them.
//!
//! ```text
//! RUST_LOG=tributary_client=debug cargo run -p tributary-client --example deliver
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tributary_client::memory::InMemoryCluster;
use tributary_client::protocol::PartitionErrorCode;
use tributary_client::{Producer, ProducerConfig, ProducerRecord, TopicPartition};

#[tokio::main]
async fn main() -> tributary_client::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cluster = Arc::new(InMemoryCluster::new(3).with_topic("page-views", 6));
    cluster.fail_partition(
        &TopicPartition::new("page-views", 4),
        PartitionErrorCode::NotLeaderForPartition,
        1,
    );

    let config = ProducerConfig {
        retry_backoff: Duration::from_millis(50),
        compression_codec: Some("snappy".to_string()),
        compression_threshold: 5,
        ..ProducerConfig::durable()
    };
    let mut producer = Producer::new(config, cluster.clone())?;

    for i in 0..50 {
        let user = format!("user-{}", i % 7);
        producer.produce(
            ProducerRecord::new("page-views", format!("/articles/{}", i))
                .key(user)
                .header("source", "demo"),
        )?;
    }

    let report = producer.deliver_messages().await?;
    println!(
        "delivered {}/{} messages in {} attempt(s)",
        report.delivered_message_count, report.message_count, report.attempts
    );
    for partition in 0..6 {
        let tp = TopicPartition::new("page-views", partition);
        println!("  {}: {} messages", tp, cluster.values(&tp).len());
    }
    println!("{:?}", producer.stats());

    producer.shutdown().await;
    Ok(())
}
