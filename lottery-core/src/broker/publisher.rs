//! ResilientPublisher.
//!
//! The ResilientPublisher is responsible for:
//! - Connecting to the broker with bounded, backing-off retries
//! - Holding at most one live publishing channel
//! - Handing events to that channel without ever waiting on the broker
//! - Reconnecting after a cool-down whenever the connection reports an
//!   error or a close, for as long as the publisher is alive
//!
//! All connection work runs on a single supervisor task. Connect requests
//! and failure reports are queued to it, so there is never more than one
//! connect attempt in flight and never more than one pending reconnect.

use super::{BackoffPolicy, BrokerConnector, LinkObserver, LinkSignal, PublishChannel};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Default exchange that lottery notifications are published to.
pub const DEFAULT_EXCHANGE: &str = "lottery_events";

/// Settings for [`ResilientPublisher`].
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Durable topic exchange to declare and publish to.
    pub exchange: String,
    /// Attempts per connect run, both at startup and on each reconnect.
    pub startup_attempts: u32,
    /// Delay schedule between attempts of one connect run.
    pub backoff: BackoffPolicy,
    /// Wait before reconnecting after a failure.
    pub reconnect_cooldown: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: DEFAULT_EXCHANGE.to_string(),
            startup_attempts: 10,
            backoff: BackoffPolicy::default(),
            reconnect_cooldown: Duration::from_secs(5),
        }
    }
}

/// Result of a connect run. Exhausting all attempts is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    NotConnected,
}

/// What happened to a single [`ResilientPublisher::publish`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed off to a live channel.
    Dispatched,
    /// No channel was available; the event was dropped.
    Unavailable,
    /// A channel existed but refused the message; the event was dropped.
    Failed,
}

/// Connection lifecycle as observed by callers.
#[derive(Clone)]
pub enum LinkState {
    Disconnected,
    Connecting {
        attempt: u32,
    },
    Connected {
        generation: u64,
        channel: Arc<dyn PublishChannel>,
    },
    ReconnectScheduled,
    Closed,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting { .. } => "connecting",
            LinkState::Connected { .. } => "connected",
            LinkState::ReconnectScheduled => "reconnect_scheduled",
            LinkState::Closed => "closed",
        }
    }
}

impl std::fmt::Debug for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Connecting { attempt } => write!(f, "Connecting({attempt})"),
            LinkState::Connected { generation, .. } => write!(f, "Connected(gen {generation})"),
            other => f.write_str(other.name()),
        }
    }
}

enum Command {
    Connect {
        max_attempts: u32,
        reply: oneshot::Sender<ConnectOutcome>,
    },
}

/// Best-effort publisher that heals its own broker connection.
///
/// Must be created inside a Tokio runtime; construction spawns the
/// supervisor task. Call [`close()`](ResilientPublisher::close) to stop it.
pub struct ResilientPublisher {
    state_rx: watch::Receiver<LinkState>,
    command_tx: mpsc::UnboundedSender<Command>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    startup_attempts: u32,
}

impl ResilientPublisher {
    /// Create a publisher and start its supervisor.
    ///
    /// No connection is made until [`connect()`](ResilientPublisher::connect)
    /// is called.
    pub fn new(connector: Arc<dyn BrokerConnector>, config: PublisherConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let startup_attempts = config.startup_attempts;

        let supervisor = Supervisor {
            connector,
            config,
            state_tx,
            signal_tx,
            generation: 0,
            retry_at: None,
        };
        let handle = tokio::spawn(supervisor.run(shutdown_rx, command_rx, signal_rx));

        Self {
            state_rx,
            command_tx,
            shutdown_tx,
            supervisor: Mutex::new(Some(handle)),
            startup_attempts,
        }
    }

    /// Connect with up to `max_attempts` attempts, backing off between them.
    ///
    /// Returns [`ConnectOutcome::NotConnected`] once the attempts are
    /// exhausted; the supervisor then keeps retrying in the background.
    /// Returns immediately if a channel is already live.
    pub async fn connect(&self, max_attempts: u32) -> ConnectOutcome {
        let (reply, outcome) = oneshot::channel();
        let command = Command::Connect {
            max_attempts,
            reply,
        };
        if self.command_tx.send(command).is_err() {
            return ConnectOutcome::NotConnected;
        }
        outcome.await.unwrap_or(ConnectOutcome::NotConnected)
    }

    /// Connect using the configured startup attempt count.
    pub async fn connect_default(&self) -> ConnectOutcome {
        self.connect(self.startup_attempts).await
    }

    /// The live channel, if any. Never blocks.
    pub fn current_channel(&self) -> Option<Arc<dyn PublishChannel>> {
        match &*self.state_rx.borrow() {
            LinkState::Connected { channel, .. } => Some(Arc::clone(channel)),
            _ => None,
        }
    }

    /// Whether a live channel is currently held.
    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Snapshot of the connection state.
    pub fn state(&self) -> LinkState {
        self.state_rx.borrow().clone()
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Serialize `payload` as JSON and hand it to the live channel.
    ///
    /// Drops the event when no channel is available. Never waits and never
    /// reports an error to the caller.
    pub fn publish<T>(&self, routing_key: &str, payload: &T) -> PublishOutcome
    where
        T: Serialize + ?Sized,
    {
        let Some(channel) = self.current_channel() else {
            debug!(routing_key, "Message broker unavailable, dropping event");
            return PublishOutcome::Unavailable;
        };

        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                error!(routing_key, error = %e, "Failed to serialize event payload");
                return PublishOutcome::Failed;
            }
        };

        match channel.publish(routing_key, body) {
            Ok(()) => {
                debug!(routing_key, "Event handed to message broker");
                PublishOutcome::Dispatched
            }
            Err(e) => {
                warn!(routing_key, error = %e, "Failed to hand event to message broker");
                PublishOutcome::Failed
            }
        }
    }

    /// Stop reconnecting and close the connection, if any.
    ///
    /// Safe to call more than once and when never connected.
    pub async fn close(&self) {
        let Some(handle) = self.supervisor.lock().await.take() else {
            return;
        };
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "Publisher supervisor task failed");
        }
    }
}

impl Drop for ResilientPublisher {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct Supervisor {
    connector: Arc<dyn BrokerConnector>,
    config: PublisherConfig,
    state_tx: watch::Sender<LinkState>,
    signal_tx: mpsc::UnboundedSender<LinkSignal>,
    /// Generation of the most recent successful connection.
    generation: u64,
    /// Deadline of the single pending reconnect, if one is scheduled.
    retry_at: Option<Instant>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
        mut signal_rx: mpsc::UnboundedReceiver<LinkSignal>,
    ) {
        debug!(exchange = %self.config.exchange, "Publisher supervisor started");

        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }

                Some(signal) = signal_rx.recv() => {
                    self.on_signal(signal);
                }

                Some(Command::Connect { max_attempts, reply }) = command_rx.recv() => {
                    let outcome = if self.state_tx.borrow().is_connected() {
                        ConnectOutcome::Connected
                    } else {
                        let Some(outcome) = self.connect_or_shutdown(max_attempts, &mut shutdown_rx).await else {
                            let _ = reply.send(ConnectOutcome::NotConnected);
                            break;
                        };
                        if outcome == ConnectOutcome::NotConnected {
                            self.schedule_reconnect();
                        }
                        outcome
                    };
                    let _ = reply.send(outcome);
                }

                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    info!("Reconnecting to message broker");
                    let attempts = self.config.startup_attempts;
                    match self.connect_or_shutdown(attempts, &mut shutdown_rx).await {
                        None => break,
                        Some(ConnectOutcome::Connected) => {}
                        Some(ConnectOutcome::NotConnected) => {
                            self.schedule_reconnect();
                        }
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// React to a failure report from a transport.
    ///
    /// Only the live connection's reports count. A second report for the same
    /// connection (an error followed by a close) finds the state already moved
    /// on and is ignored.
    fn on_signal(&mut self, signal: LinkSignal) {
        let is_live = matches!(
            &*self.state_tx.borrow(),
            LinkState::Connected { generation, .. } if *generation == signal.generation
        );
        if !is_live {
            debug!(
                generation = signal.generation,
                failure = ?signal.failure,
                "Ignoring failure report from a replaced connection"
            );
            return;
        }

        warn!(
            generation = signal.generation,
            failure = ?signal.failure,
            cooldown_ms = self.config.reconnect_cooldown.as_millis() as u64,
            "Message broker connection lost, reconnecting after cool-down"
        );
        if let LinkState::Connected { channel, .. } = self.schedule_reconnect() {
            tokio::spawn(async move {
                if let Err(e) = channel.close().await {
                    debug!(error = %e, "Failed connection did not close cleanly");
                }
            });
        }
    }

    /// Clear the channel and arm the reconnect deadline unless one is
    /// already pending. Returns the replaced state.
    fn schedule_reconnect(&mut self) -> LinkState {
        if self.retry_at.is_none() {
            self.retry_at = Some(Instant::now() + self.config.reconnect_cooldown);
        }
        self.state_tx.send_replace(LinkState::ReconnectScheduled)
    }

    /// Run a connect loop unless shutdown fires first (`None`).
    async fn connect_or_shutdown(
        &mut self,
        max_attempts: u32,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<ConnectOutcome> {
        if *shutdown_rx.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => None,
            outcome = self.connect(max_attempts) => Some(outcome),
        }
    }

    async fn connect(&mut self, max_attempts: u32) -> ConnectOutcome {
        let max_attempts = max_attempts.max(1);
        let exchange = self.config.exchange.clone();

        for attempt in 0..max_attempts {
            self.state_tx.send_replace(LinkState::Connecting {
                attempt: attempt + 1,
            });
            info!(
                attempt = attempt + 1,
                max_attempts, "Attempting to connect to message broker"
            );

            let generation = self.generation + 1;
            let observer = LinkObserver::new(generation, self.signal_tx.clone());
            match self.connector.connect(&exchange, observer).await {
                Ok(channel) => {
                    self.generation = generation;
                    self.retry_at = None;
                    self.state_tx.send_replace(LinkState::Connected {
                        generation,
                        channel,
                    });
                    info!(%exchange, generation, "Connected to message broker");
                    return ConnectOutcome::Connected;
                }
                Err(e) if attempt + 1 == max_attempts => {
                    error!(
                        error = %e,
                        max_attempts, "Failed to connect to message broker after all attempts"
                    );
                }
                Err(e) => {
                    let wait = self.config.backoff.delay(attempt);
                    warn!(
                        error = %e,
                        wait_ms = wait.as_millis() as u64,
                        "Message broker connection failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }

        self.state_tx.send_replace(LinkState::Disconnected);
        ConnectOutcome::NotConnected
    }

    async fn shutdown(self) {
        if self.retry_at.is_some() {
            debug!("Cancelling pending reconnect");
        }
        let previous = self.state_tx.send_replace(LinkState::Closed);
        if let LinkState::Connected { channel, .. } = previous {
            info!("Closing message broker connection");
            if let Err(e) = channel.close().await {
                debug!(error = %e, "Message broker connection was already closed");
            }
        }
        info!("Publisher shutdown complete");
    }
}
