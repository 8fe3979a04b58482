//! AMQP broker transport.
//!
//! Change events are consumed from a durable queue and dimension
//! notifications are published to the default exchange with the topic as
//! routing key, so a topic name is also the name of the queue it lands in.
//!
//! A delivery is acknowledged only after the ingest processor has settled
//! it. Failures that stayed retryable after in-process redelivery are handed
//! back to the broker once; a delivery that is already a redelivery is
//! rejected instead of looping forever.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use datasync_core::{BackendError, NotificationPublisher};

use crate::error::Error;
use crate::ingest::{Disposition, Inbound, IngestHandle};

const CONSUMER_TAG: &str = "datasync-relay";

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

/// What to tell the broker about a settled delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Requeue,
    Reject,
}

/// Map an ingest disposition to a broker settlement.
pub fn settlement_for(disposition: Disposition, redelivered: bool) -> Settlement {
    match disposition {
        Disposition::Completed | Disposition::DeadLettered => Settlement::Ack,
        Disposition::Failed {
            retryable: true, ..
        } if !redelivered => Settlement::Requeue,
        Disposition::Failed { .. } => Settlement::Reject,
    }
}

async fn open_channel(url: &str) -> Result<(Connection, Channel), Error> {
    let connection = Connection::connect(url, ConnectionProperties::default())
        .await
        .map_err(|e| Error::Transport(format!("failed to connect to {}: {}", url, e)))?;
    let channel = connection.create_channel().await?;
    Ok((connection, channel))
}

async fn declare_queue(channel: &Channel, queue: &str) -> Result<(), Error> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Publishes notifications through an AMQP broker.
pub struct AmqpPublisher {
    _connection: Arc<Connection>,
    channel: Channel,
}

impl AmqpPublisher {
    /// Connect and declare a durable queue for each topic.
    pub async fn connect(url: &str, topics: &[&str]) -> Result<Self, Error> {
        let (connection, channel) = open_channel(url).await?;
        for topic in topics {
            declare_queue(&channel, topic).await?;
        }
        info!(topics = ?topics, "amqp publisher connected");

        Ok(Self {
            _connection: Arc::new(connection),
            channel,
        })
    }
}

#[async_trait]
impl NotificationPublisher for AmqpPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BackendError> {
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT);

        self.channel
            .basic_publish(
                "",
                topic,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                properties,
            )
            .await
            .map_err(|e| BackendError::new(format!("amqp publish to {}: {}", topic, e)))?;
        Ok(())
    }
}

/// Consumes change events from an AMQP queue into the ingest processor.
pub struct AmqpListener {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    queue: String,
    handle: IngestHandle,
}

impl AmqpListener {
    /// Connect, declare the queue and start consuming.
    ///
    /// `prefetch` caps unacknowledged deliveries and is normally the ingest
    /// concurrency.
    pub async fn connect(
        url: &str,
        queue: &str,
        prefetch: usize,
        handle: IngestHandle,
    ) -> Result<Self, Error> {
        let (connection, channel) = open_channel(url).await?;
        declare_queue(&channel, queue).await?;

        let prefetch = u16::try_from(prefetch.max(1)).unwrap_or(u16::MAX);
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;
        let consumer = channel
            .basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!(queue = %queue, prefetch, "amqp consumer started");

        Ok(Self {
            connection,
            channel,
            consumer,
            queue: queue.to_string(),
            handle,
        })
    }

    /// Consume until shutdown is signalled or the broker cancels the consumer.
    ///
    /// Consumes the listener so its ingest handle is released on return.
    pub async fn run_until_shutdown(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        let Self {
            connection,
            channel,
            mut consumer,
            queue,
            handle,
        } = self;
        let mut settlements = JoinSet::new();
        let mut deliveries: u64 = 0;
        let mut failure = None;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(
                        queue = %queue,
                        deliveries,
                        "shutdown signal received, stopping consumer"
                    );
                    break;
                }
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => {
                        deliveries += 1;
                        let Delivery {
                            data,
                            acker,
                            redelivered,
                            ..
                        } = delivery;
                        let (inbound, settled) = Inbound::tracked(data);
                        if handle.send(inbound).await.is_err() {
                            warn!("ingest channel closed, consumer stopping");
                            settle(acker, Settlement::Requeue).await;
                            break;
                        }
                        settlements.spawn(await_settlement(acker, redelivered, settled));
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "amqp consumer failed");
                        failure = Some(Error::from(e));
                        break;
                    }
                    None => {
                        warn!(queue = %queue, "consumer cancelled by broker");
                        break;
                    }
                },
                Some(joined) = settlements.join_next(), if !settlements.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "settlement task failed");
                    }
                }
            }
        }

        if failure.is_none() {
            if let Err(e) = channel
                .basic_cancel(CONSUMER_TAG, BasicCancelOptions::default())
                .await
            {
                warn!(error = %e, "failed to cancel consumer");
            }
        }

        // In-flight deliveries settle once the processor drains them.
        drop(handle);
        while settlements.join_next().await.is_some() {}

        if let Err(e) = connection.close(200, "relay shutdown").await {
            debug!(error = %e, "amqp connection already closed");
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn await_settlement(
    acker: Acker,
    redelivered: bool,
    settled: oneshot::Receiver<Disposition>,
) {
    let settlement = match settled.await {
        Ok(disposition) => settlement_for(disposition, redelivered),
        // The processor went away without settling.
        Err(_) => Settlement::Requeue,
    };
    settle(acker, settlement).await;
}

async fn settle(acker: Acker, settlement: Settlement) {
    let result = match settlement {
        Settlement::Ack => acker.ack(BasicAckOptions::default()).await,
        Settlement::Requeue => {
            acker
                .nack(BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                })
                .await
        }
        Settlement::Reject => acker.nack(BasicNackOptions::default()).await,
    };
    if let Err(e) = result {
        warn!(?settlement, error = %e, "failed to settle delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::channel;
    use std::time::Duration;

    /// Live tests run only when a broker is provided.
    fn test_url() -> Option<String> {
        std::env::var("DATASYNC_TEST_AMQP_URL").ok()
    }

    #[test]
    fn test_settlement_policy() {
        assert_eq!(settlement_for(Disposition::Completed, false), Settlement::Ack);
        assert_eq!(settlement_for(Disposition::Completed, true), Settlement::Ack);
        assert_eq!(settlement_for(Disposition::DeadLettered, true), Settlement::Ack);

        let retryable = Disposition::Failed {
            reason: "cache_store",
            retryable: true,
        };
        assert_eq!(settlement_for(retryable, false), Settlement::Requeue);
        assert_eq!(settlement_for(retryable, true), Settlement::Reject);

        let parse = Disposition::Failed {
            reason: "parse",
            retryable: false,
        };
        assert_eq!(settlement_for(parse, false), Settlement::Reject);
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_reported() {
        let result = AmqpPublisher::connect("amqp://127.0.0.1:1/%2f", &["dims"]).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_published_event_is_consumed_and_acked() {
        let Some(url) = test_url() else {
            return;
        };
        let queue = format!("datasync-test-{}", std::process::id());
        let publisher = AmqpPublisher::connect(&url, &[queue.as_str()])
            .await
            .unwrap();

        let (tx, mut rx) = channel(4);
        let listener = AmqpListener::connect(&url, &queue, 4, IngestHandle::new(tx))
            .await
            .unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let running = tokio::spawn(listener.run_until_shutdown(shutdown_rx));

        let payload = r#"{"data_type":"brand","event_type":"add","id":1}"#;
        publisher.publish(&queue, payload).await.unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.payload(), payload.as_bytes());
        let (_, settled) = inbound.into_parts();
        settled.unwrap().send(Disposition::Completed).unwrap();

        shutdown_tx.send(()).unwrap();
        drop(rx);
        running.await.unwrap().unwrap();
    }
}
