//! Broadcast dispatcher: one bounded FIFO queue, one fan-out loop.
//!
//! Reader tasks submit decoded messages through a [`DispatchHandle`]. The
//! single [`Dispatcher`] loop takes them in order, snapshots the registry, and
//! writes each message to every target concurrently. A message is fully fanned
//! out (every write finished, failed, or timed out) before the next one is
//! taken, which keeps delivery order identical for all recipients.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message as WsMessage;
use futures_util::future::join_all;
use termotalks_proto::codec;
use termotalks_proto::message::Message;
use tokio::sync::mpsc;

use crate::connection::ConnectionId;
use crate::registry::ConnectionRegistry;

/// Default number of messages the dispatch queue holds before producers wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default upper bound on a single connection write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a message is written back to the connection that sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoPolicy {
    /// The sender receives its own message along with everyone else.
    #[default]
    IncludeSender,
    /// The sender's connection is skipped.
    ExcludeSender,
}

impl EchoPolicy {
    /// Maps the `echo_to_sender` configuration flag to a policy.
    #[must_use]
    pub const fn from_flag(echo_to_sender: bool) -> Self {
        if echo_to_sender {
            Self::IncludeSender
        } else {
            Self::ExcludeSender
        }
    }

    /// Whether `candidate` receives a message submitted by `origin`.
    fn targets(self, candidate: ConnectionId, origin: ConnectionId) -> bool {
        self == Self::IncludeSender || candidate != origin
    }
}

/// A queued message together with the connection it came from.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// The submitting connection.
    pub origin: ConnectionId,
    /// The message to broadcast.
    pub message: Message,
}

/// The dispatcher is no longer running; the message was not queued.
#[derive(Debug, thiserror::Error)]
#[error("dispatcher has shut down")]
pub struct DispatcherClosed;

/// Producer side of the dispatch queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<Dispatch>,
}

impl DispatchHandle {
    /// Queues a message for broadcast, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`DispatcherClosed`] if the fan-out loop has stopped.
    pub async fn submit(
        &self,
        origin: ConnectionId,
        message: Message,
    ) -> Result<(), DispatcherClosed> {
        self.tx
            .send(Dispatch { origin, message })
            .await
            .map_err(|_| DispatcherClosed)
    }
}

/// Outcome of fanning out one message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    /// Connections the message was written to.
    pub delivered: Vec<ConnectionId>,
    /// Connections whose write failed; they have been unregistered.
    pub failed: Vec<ConnectionId>,
}

/// Tunables for the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// Bound of the dispatch queue.
    pub queue_capacity: usize,
    /// Upper bound on a single connection write.
    pub write_timeout: Duration,
    /// Whether senders receive their own messages.
    pub echo: EchoPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            echo: EchoPolicy::default(),
        }
    }
}

/// The single consumer of the dispatch queue.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    rx: mpsc::Receiver<Dispatch>,
    write_timeout: Duration,
    echo: EchoPolicy,
}

impl Dispatcher {
    /// Creates the dispatcher and the producer handle for its queue.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        settings: DispatchSettings,
    ) -> (Self, DispatchHandle) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let dispatcher = Self {
            registry,
            rx,
            write_timeout: settings.write_timeout,
            echo: settings.echo,
        };
        (dispatcher, DispatchHandle { tx })
    }

    /// Runs the fan-out loop on a new task.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Takes messages off the queue in order until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(dispatch) = self.rx.recv().await {
            let report = self.fan_out(&dispatch).await;
            tracing::debug!(
                origin = %dispatch.origin,
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "message fanned out"
            );
        }
        tracing::info!("dispatch queue closed, fan-out loop stopping");
    }

    /// Writes one message to every connection in a fresh registry snapshot.
    ///
    /// Writes run concurrently, each bounded by the write timeout. A failed
    /// write unregisters that connection and does not affect the others.
    pub async fn fan_out(&self, dispatch: &Dispatch) -> FanOutReport {
        let text = match codec::encode(&dispatch.message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(origin = %dispatch.origin, error = %e, "failed to encode message");
                return FanOutReport::default();
            }
        };
        let frame = WsMessage::Text(text.into());

        let targets = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|conn| self.echo.targets(conn.id(), dispatch.origin));

        let writes = targets.map(|conn| {
            let frame = frame.clone();
            async move {
                let id = conn.id();
                match conn.send(frame, self.write_timeout).await {
                    Ok(()) => Ok(id),
                    Err(e) => {
                        tracing::warn!(
                            conn_id = %id,
                            error = %e,
                            "write failed, dropping connection"
                        );
                        self.registry.unregister(id);
                        Err(id)
                    }
                }
            }
        });

        let mut report = FanOutReport::default();
        for result in join_all(writes).await {
            match result {
                Ok(id) => report.delivered.push(id),
                Err(id) => report.failed.push(id),
            }
        }
        report
    }
}
