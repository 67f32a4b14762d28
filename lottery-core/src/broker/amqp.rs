//! RabbitMQ transport.
//!
//! Each connection gets one channel and one pump task. The pump owns the
//! `lapin::Channel` and publishes queued messages in order, so
//! [`PublishChannel::publish`] only has to push onto a bounded buffer. When
//! the pump stops it closes the connection with it.
//!
//! lapin runs its I/O on the ambient Tokio runtime rather than its own
//! default executor.

use super::{BrokerConnector, BrokerError, LinkObserver, PublishChannel};
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Messages buffered per channel before further publishes are refused.
const OUTBOX_CAPACITY: usize = 1024;

/// AMQP reply code for a normal connection close.
const REPLY_SUCCESS: u16 = 200;

/// Opens RabbitMQ connections to a fixed URL.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    url: String,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(
        &self,
        exchange: &str,
        observer: LinkObserver,
    ) -> Result<Arc<dyn PublishChannel>, BrokerError> {
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let connection = Arc::new(Connection::connect(&self.url, properties).await?);

        let channel = match declare_channel(&connection, exchange).await {
            Ok(channel) => channel,
            Err(e) => {
                // Do not leak a half-initialized connection.
                let _ = connection.close(REPLY_SUCCESS, "setup failed").await;
                return Err(e.into());
            }
        };

        let on_error = observer.clone();
        connection.on_error(move |e| on_error.error(e.to_string()));

        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        tokio::spawn(pump(
            connection.clone(),
            channel,
            exchange.to_string(),
            outbox_rx,
            observer,
        ));

        Ok(Arc::new(AmqpChannel {
            connection,
            outbox: outbox_tx,
        }))
    }
}

async fn declare_channel(connection: &Connection, exchange: &str) -> Result<Channel, lapin::Error> {
    let channel = connection.create_channel().await?;
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(channel)
}

struct Outgoing {
    routing_key: String,
    payload: Vec<u8>,
}

/// Publish queued messages until the channel fails or the handle is dropped,
/// then close the connection.
async fn pump(
    connection: Arc<Connection>,
    channel: Channel,
    exchange: String,
    mut outbox: mpsc::Receiver<Outgoing>,
    observer: LinkObserver,
) {
    while let Some(message) = outbox.recv().await {
        let published = channel
            .basic_publish(
                &exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await;

        if let Err(e) = published {
            warn!(
                routing_key = %message.routing_key,
                error = %e,
                "Failed to publish to message broker"
            );
            observer.closed();
            break;
        }
    }
    debug!(generation = observer.generation(), "Publish pump stopped");

    if connection.status().connected()
        && let Err(e) = connection.close(REPLY_SUCCESS, "publisher stopped").await
    {
        debug!(error = %e, "Failed to close message broker connection");
    }
}

/// A live RabbitMQ channel handle.
pub struct AmqpChannel {
    connection: Arc<Connection>,
    outbox: mpsc::Sender<Outgoing>,
}

#[async_trait]
impl PublishChannel for AmqpChannel {
    fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let message = Outgoing {
            routing_key: routing_key.to_string(),
            payload,
        };
        self.outbox.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BrokerError::OutboxFull,
            mpsc::error::TrySendError::Closed(_) => BrokerError::ChannelClosed,
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.connection.close(REPLY_SUCCESS, "shutdown").await?;
        Ok(())
    }
}
