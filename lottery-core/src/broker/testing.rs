//! In-memory broker transport for exercising the publisher without RabbitMQ.

use super::{BrokerConnector, BrokerError, LinkObserver, PublishChannel};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Messages recorded by every channel of one connector.
pub(crate) type Published = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

pub(crate) struct MemoryChannel {
    published: Published,
    closed: AtomicBool,
}

impl MemoryChannel {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublishChannel for MemoryChannel {
    fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ChannelClosed);
        }
        let value = serde_json::from_slice(&payload)
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;
        self.published
            .lock()
            .unwrap()
            .push((routing_key.to_string(), value));
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }
}

/// Connector whose availability is controlled by the test.
pub(crate) struct MemoryConnector {
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    connect_latency: Duration,
    links: Mutex<Vec<(LinkObserver, Arc<MemoryChannel>)>>,
    published: Published,
}

impl MemoryConnector {
    pub(crate) fn new() -> Arc<Self> {
        Self::failing(0)
    }

    /// A connector that refuses the first `failures` connection attempts.
    pub(crate) fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures_remaining: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            connect_latency: Duration::from_millis(50),
            links: Mutex::new(Vec::new()),
            published: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Refuse the next `failures` connection attempts.
    pub(crate) fn fail_next(&self, failures: u32) {
        self.failures_remaining.store(failures, Ordering::SeqCst);
    }

    /// Total connection attempts, successful or not.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of connection attempts that ran at the same time.
    pub(crate) fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// The most recently opened channel.
    pub(crate) fn last_channel(&self) -> Option<Arc<MemoryChannel>> {
        self.links
            .lock()
            .unwrap()
            .last()
            .map(|(_, channel)| Arc::clone(channel))
    }

    /// Kill the most recent connection the way a broker restart does: an
    /// error report immediately followed by a close report.
    pub(crate) fn break_link(&self) {
        let links = self.links.lock().unwrap();
        if let Some((observer, channel)) = links.last() {
            channel.closed.store(true, Ordering::SeqCst);
            observer.error("connection reset by peer");
            observer.closed();
        }
    }

    /// Report a failure for an arbitrary earlier connection.
    pub(crate) fn observer(&self, index: usize) -> Option<LinkObserver> {
        self.links
            .lock()
            .unwrap()
            .get(index)
            .map(|(observer, _)| observer.clone())
    }

    pub(crate) fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().unwrap().clone()
    }

    pub(crate) fn routing_keys(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .map(|(routing_key, _)| routing_key)
            .collect()
    }
}

#[async_trait]
impl BrokerConnector for MemoryConnector {
    async fn connect(
        &self,
        _exchange: &str,
        observer: LinkObserver,
    ) -> Result<Arc<dyn PublishChannel>, BrokerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        tokio::time::sleep(self.connect_latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let refused = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(BrokerError::Unreachable("connection refused".to_string()));
        }

        let channel = Arc::new(MemoryChannel {
            published: Arc::clone(&self.published),
            closed: AtomicBool::new(false),
        });
        self.links
            .lock()
            .unwrap()
            .push((observer, Arc::clone(&channel)));
        Ok(channel)
    }
}
