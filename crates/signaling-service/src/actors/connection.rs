//! `ConnectionActor` - per-connection outbound delivery actor.
//!
//! Each `ConnectionActor`:
//! - Owns the bounded outbound queue for exactly one transport session
//! - Drains queued events into a [`DeliverySink`] (the WebSocket in
//!   production, a channel in tests)
//! - Is cancelled on disconnect, which stops all further delivery
//!
//! # Backpressure
//!
//! Enqueueing is non-blocking (`try_send`). When the queue is full the
//! overflow policy force-disconnects the slow recipient: the connection's
//! token is cancelled and the event is dropped. Senders and other
//! recipients are never blocked on one slow connection.

use crate::protocol::ServerEvent;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Where drained events go. The transport layer provides the real sink;
/// tests substitute a channel.
pub trait DeliverySink: Send + 'static {
    /// Deliver one serialized event frame. An error means the transport is
    /// gone and the actor should stop.
    fn deliver(
        &mut self,
        frame: String,
    ) -> impl std::future::Future<Output = Result<(), SinkClosed>> + Send;
}

/// The transport behind a sink has closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Outcome of a failed `try_deliver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Queue overflow; the recipient has been force-disconnected.
    Full,
    /// The connection actor already exited; event silently dropped.
    Closed,
}

/// Messages sent to a `ConnectionActor`.
#[derive(Debug)]
enum ConnectionMessage {
    /// Deliver an event to the client.
    Deliver(ServerEvent),
    /// Close the connection gracefully.
    Close { reason: String },
}

/// Handle to a `ConnectionActor`.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: String,
    user_id: String,
}

impl ConnectionHandle {
    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Get the authenticated user ID.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Enqueue an event without blocking.
    ///
    /// On overflow the connection is force-disconnected (token cancelled)
    /// and `Err(DeliveryError::Full)` is returned. A closed queue means the
    /// connection is already going away; callers drop the event.
    pub fn try_deliver(&self, event: ServerEvent) -> Result<(), DeliveryError> {
        match self.sender.try_send(ConnectionMessage::Deliver(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "sg.actor.connection",
                    connection_id = %self.connection_id,
                    user_id = %self.user_id,
                    "Outbound queue overflow, force-disconnecting slow recipient"
                );
                self.cancel_token.cancel();
                Err(DeliveryError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Request a graceful close.
    pub async fn close(&self, reason: String) {
        let _ = self.sender.send(ConnectionMessage::Close { reason }).await;
    }

    /// Cancel the connection actor (stops all further delivery).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the connection is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Completes when the connection is cancelled.
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await;
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor<S: DeliverySink> {
    connection_id: String,
    user_id: String,
    receiver: mpsc::Receiver<ConnectionMessage>,
    cancel_token: CancellationToken,
    sink: S,
}

impl<S: DeliverySink> ConnectionActor<S> {
    /// Spawn a new connection actor with a bounded queue of `capacity`.
    ///
    /// Returns the handle used to enqueue deliveries and the task handle.
    pub fn spawn(
        connection_id: String,
        user_id: String,
        sink: S,
        cancel_token: CancellationToken,
        capacity: usize,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity);

        let actor = Self {
            connection_id: connection_id.clone(),
            user_id: user_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            sink,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionHandle {
            sender,
            cancel_token,
            connection_id,
            user_id,
        };

        (handle, task_handle)
    }

    /// Run the delivery loop.
    async fn run(mut self) {
        debug!(
            target: "sg.actor.connection",
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sg.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor cancelled"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(ConnectionMessage::Deliver(event)) => {
                            if !self.deliver(event).await {
                                break;
                            }
                        }
                        Some(ConnectionMessage::Close { reason }) => {
                            debug!(
                                target: "sg.actor.connection",
                                connection_id = %self.connection_id,
                                reason = %reason,
                                "Closing connection"
                            );
                            self.cancel_token.cancel();
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        debug!(
            target: "sg.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor stopped"
        );
    }

    /// Serialize and push one event into the sink. Returns false when the
    /// transport is gone.
    async fn deliver(&mut self, event: ServerEvent) -> bool {
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    target: "sg.actor.connection",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Failed to serialize outbound event"
                );
                return true;
            }
        };

        if self.sink.deliver(frame).await.is_err() {
            debug!(
                target: "sg.actor.connection",
                connection_id = %self.connection_id,
                "Delivery sink closed, stopping"
            );
            self.cancel_token.cancel();
            return false;
        }

        true
    }
}
