//! Message broker plumbing for lottery notifications.
//!
//! - `backoff`: retry delay schedule for connection attempts
//! - `publisher`: `ResilientPublisher`, which keeps one live channel to the
//!   broker and drops events while none is available
//! - `amqp`: the RabbitMQ transport built on `lapin`
//!
//! The publisher only talks to the transport through [`BrokerConnector`] and
//! [`PublishChannel`], which keeps the reconnection logic independent of
//! AMQP.

pub mod amqp;
pub mod backoff;
pub mod publisher;

#[cfg(test)]
pub(crate) mod testing;

pub use amqp::AmqpConnector;
pub use backoff::BackoffPolicy;
pub use publisher::{ConnectOutcome, LinkState, PublishOutcome, PublisherConfig, ResilientPublisher};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by a broker transport.
///
/// These never leave the publisher; they only decide whether a connection
/// attempt or a single hand-off succeeded.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// AMQP protocol or I/O error
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// The channel has been closed
    #[error("channel closed")]
    ChannelClosed,

    /// The channel's outbound buffer is full
    #[error("outbound buffer full")]
    OutboxFull,

    /// The broker could not be reached
    #[error("broker unreachable: {0}")]
    Unreachable(String),
}

/// Why a connection stopped being usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFailure {
    Error(String),
    Closed,
}

/// A failure report tagged with the connection generation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSignal {
    pub generation: u64,
    pub failure: LinkFailure,
}

/// Failure observer handed to a transport for one connection.
///
/// The transport calls [`error`](LinkObserver::error) or
/// [`closed`](LinkObserver::closed) from its callbacks. Reports from
/// connections that have already been replaced are ignored by the publisher.
#[derive(Debug, Clone)]
pub struct LinkObserver {
    generation: u64,
    signal_tx: mpsc::UnboundedSender<LinkSignal>,
}

impl LinkObserver {
    pub(crate) fn new(generation: u64, signal_tx: mpsc::UnboundedSender<LinkSignal>) -> Self {
        Self {
            generation,
            signal_tx,
        }
    }

    /// The connection generation this observer reports for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report a connection error.
    pub fn error(&self, reason: impl Into<String>) {
        self.report(LinkFailure::Error(reason.into()));
    }

    /// Report that the connection was closed.
    pub fn closed(&self) {
        self.report(LinkFailure::Closed);
    }

    fn report(&self, failure: LinkFailure) {
        // The publisher may already be shut down; nothing left to notify.
        let _ = self.signal_tx.send(LinkSignal {
            generation: self.generation,
            failure,
        });
    }
}

/// A usable publishing channel bound to one exchange.
#[async_trait]
pub trait PublishChannel: Send + Sync {
    /// Hand a message off for delivery without waiting on the network.
    fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Close the underlying connection.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Opens connections to the broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Connect, open a channel and declare `exchange` as a durable topic
    /// exchange.
    ///
    /// On success the transport must report later failures of this
    /// connection through `observer`.
    async fn connect(
        &self,
        exchange: &str,
        observer: LinkObserver,
    ) -> Result<Arc<dyn PublishChannel>, BrokerError>;
}
