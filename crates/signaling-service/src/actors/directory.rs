//! `RoomDirectoryActor` - singleton actor that owns the room map.
//!
//! The directory performs only cheap structural operations: lazy creation,
//! lookup, and removal of room entries. All per-room state lives in the
//! `RoomActor` it spawns, so directory operations stay short even under a
//! large room population.
//!
//! # Generations
//!
//! Every spawned room gets a monotonically increasing generation, echoed
//! back in its expiry notice. A notice whose generation does not match the
//! current entry is stale (a fresh room was spawned under the same id
//! after the old one expired) and is ignored.

use crate::actors::messages::{DirectoryMessage, DirectoryStatus};
use crate::actors::metrics::ServiceMetrics;
use crate::actors::room::{RoomActor, RoomHandle};
use crate::errors::SignalingError;
use crate::metadata::MetadataNotifier;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default channel buffer size for the directory mailbox.
const DIRECTORY_CHANNEL_BUFFER: usize = 500;

/// How long to wait for an expired room's task during removal.
const ROOM_REAP_TIMEOUT: Duration = Duration::from_millis(100);

/// How long to wait for each room during graceful shutdown.
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `RoomDirectoryActor`.
#[derive(Debug, Clone)]
pub struct DirectoryHandle {
    sender: mpsc::Sender<DirectoryMessage>,
    cancel_token: CancellationToken,
}

impl DirectoryHandle {
    /// Look up a room, creating and spawning it if absent.
    pub async fn get_or_create(&self, room_id: String) -> Result<RoomHandle, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DirectoryMessage::GetOrCreate {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| SignalingError::ShuttingDown)?;

        rx.await.map_err(|_| SignalingError::ShuttingDown)?
    }

    /// Look up an existing room without creating one.
    pub async fn lookup(&self, room_id: String) -> Result<Option<RoomHandle>, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DirectoryMessage::Lookup {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| SignalingError::ShuttingDown)?;

        rx.await.map_err(|_| SignalingError::ShuttingDown)
    }

    /// Current directory status.
    pub async fn status(&self) -> Result<DirectoryStatus, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DirectoryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|_| SignalingError::ShuttingDown)?;

        rx.await.map_err(|_| SignalingError::ShuttingDown)
    }

    /// Cancel the directory and, through child tokens, every room.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the directory is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[cfg(test)]
    pub(crate) fn raw_sender(&self) -> mpsc::Sender<DirectoryMessage> {
        self.sender.clone()
    }
}

/// A spawned room under directory management.
struct ManagedRoom {
    handle: RoomHandle,
    task_handle: JoinHandle<()>,
    generation: u64,
}

/// The `RoomDirectoryActor` implementation.
pub struct RoomDirectoryActor {
    /// Message receiver.
    receiver: mpsc::Receiver<DirectoryMessage>,
    /// Self-sender, handed to rooms for expiry notices.
    sender: mpsc::Sender<DirectoryMessage>,
    /// Cancellation token (root of the actor tree).
    cancel_token: CancellationToken,
    /// Rooms by ID.
    rooms: HashMap<String, ManagedRoom>,
    /// Next room generation.
    next_generation: u64,
    /// Grace window handed to each spawned room.
    grace_window: Duration,
    /// Metadata collaborator handle, cloned into each room.
    notifier: MetadataNotifier,
    /// Whether the directory is shutting down.
    is_shutting_down: bool,
    /// Shared service metrics.
    metrics: Arc<ServiceMetrics>,
}

impl RoomDirectoryActor {
    /// Spawn the directory actor.
    pub fn spawn(
        grace_window: Duration,
        cancel_token: CancellationToken,
        notifier: MetadataNotifier,
        metrics: Arc<ServiceMetrics>,
    ) -> (DirectoryHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(DIRECTORY_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            next_generation: 1,
            grace_window,
            notifier,
            is_shutting_down: false,
            metrics,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = DirectoryHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    async fn run(mut self) {
        info!(
            target: "sg.actor.directory",
            grace_secs = self.grace_window.as_secs(),
            "RoomDirectoryActor started"
        );

        loop {
            self.reap_finished_rooms();

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sg.actor.directory",
                        "RoomDirectoryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "sg.actor.directory",
                                "RoomDirectoryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sg.actor.directory",
            rooms = self.rooms.len(),
            "RoomDirectoryActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: DirectoryMessage) {
        match message {
            DirectoryMessage::GetOrCreate {
                room_id,
                respond_to,
            } => {
                let result = self.handle_get_or_create(room_id);
                let _ = respond_to.send(result);
            }

            DirectoryMessage::Lookup {
                room_id,
                respond_to,
            } => {
                let handle = self.rooms.get(&room_id).map(|r| r.handle.clone());
                let _ = respond_to.send(handle);
            }

            DirectoryMessage::RoomExpired {
                room_id,
                generation,
            } => {
                self.handle_room_expired(&room_id, generation).await;
            }

            DirectoryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(DirectoryStatus {
                    room_count: self.rooms.len(),
                    accepting: !self.is_shutting_down,
                });
            }
        }
    }

    /// Look up or lazily create a room.
    fn handle_get_or_create(&mut self, room_id: String) -> Result<RoomHandle, SignalingError> {
        if self.is_shutting_down {
            return Err(SignalingError::ShuttingDown);
        }

        if let Some(managed) = self.rooms.get(&room_id) {
            return Ok(managed.handle.clone());
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            generation,
            self.grace_window,
            self.cancel_token.child_token(),
            self.sender.clone(),
            self.notifier.clone(),
            Arc::clone(&self.metrics),
        );

        info!(
            target: "sg.actor.directory",
            room_id = %room_id,
            generation = generation,
            total_rooms = self.rooms.len() + 1,
            "Room created"
        );

        self.metrics.room_created();
        self.rooms.insert(
            room_id,
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                generation,
            },
        );

        Ok(handle)
    }

    /// Process a room's expiry notice, guarding against stale generations.
    async fn handle_room_expired(&mut self, room_id: &str, generation: u64) {
        let Some(managed) = self.rooms.get(room_id) else {
            debug!(
                target: "sg.actor.directory",
                room_id = %room_id,
                "Expiry notice for unknown room, ignoring"
            );
            return;
        };

        if managed.generation != generation {
            debug!(
                target: "sg.actor.directory",
                room_id = %room_id,
                notice_generation = generation,
                current_generation = managed.generation,
                "Stale expiry notice, ignoring"
            );
            return;
        }

        if let Some(managed) = self.rooms.remove(room_id) {
            let _ = tokio::time::timeout(ROOM_REAP_TIMEOUT, managed.task_handle).await;
            self.metrics.room_removed();
            info!(
                target: "sg.actor.directory",
                room_id = %room_id,
                generation = generation,
                remaining_rooms = self.rooms.len(),
                "Room removed"
            );
        }
    }

    /// Remove entries whose room task ended without an expiry notice
    /// (panic or external cancellation).
    fn reap_finished_rooms(&mut self) {
        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            if let Some(managed) = self.rooms.remove(&room_id) {
                self.metrics.room_removed();
                if managed.handle.is_cancelled() {
                    debug!(
                        target: "sg.actor.directory",
                        room_id = %room_id,
                        "Reaped cancelled room"
                    );
                } else {
                    error!(
                        target: "sg.actor.directory",
                        room_id = %room_id,
                        generation = managed.generation,
                        "Room actor ended unexpectedly, entry removed"
                    );
                }
            }
        }
    }

    /// Perform graceful shutdown: cancel every room and wait for each
    /// with a timeout.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "sg.actor.directory",
            rooms = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.is_shutting_down = true;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sg.actor.directory",
                        room_id = %room_id,
                        "Room completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sg.actor.directory",
                        room_id = %room_id,
                        error = ?e,
                        "Room task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sg.actor.directory",
                        room_id = %room_id,
                        "Room shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(
            target: "sg.actor.directory",
            "Graceful shutdown complete"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::connection::{ConnectionActor, ConnectionHandle, DeliverySink, SinkClosed};

    const GRACE: Duration = Duration::from_secs(30);

    struct NullSink;

    impl DeliverySink for NullSink {
        async fn deliver(&mut self, _frame: String) -> Result<(), SinkClosed> {
            Ok(())
        }
    }

    fn test_connection(connection_id: &str, user_id: &str) -> ConnectionHandle {
        let (handle, _task) = ConnectionActor::spawn(
            connection_id.to_string(),
            user_id.to_string(),
            NullSink,
            CancellationToken::new(),
            64,
        );
        handle
    }

    fn test_directory() -> (DirectoryHandle, JoinHandle<()>) {
        RoomDirectoryActor::spawn(
            GRACE,
            CancellationToken::new(),
            MetadataNotifier::disabled(),
            ServiceMetrics::new(),
        )
    }

    #[tokio::test]
    async fn test_lazy_creation_and_reuse() {
        let (directory, _task) = test_directory();

        let first = directory.get_or_create("r1".to_string()).await.unwrap();
        let second = directory.get_or_create("r1".to_string()).await.unwrap();
        assert_eq!(first.generation(), second.generation());

        let other = directory.get_or_create("r2".to_string()).await.unwrap();
        assert_ne!(first.generation(), other.generation());

        let status = directory.status().await.unwrap();
        assert_eq!(status.room_count, 2);
        assert!(status.accepting);

        directory.cancel();
    }

    #[tokio::test]
    async fn test_lookup_does_not_create() {
        let (directory, _task) = test_directory();

        assert!(directory.lookup("nope".to_string()).await.unwrap().is_none());
        let status = directory.status().await.unwrap();
        assert_eq!(status.room_count, 0);

        directory.get_or_create("r1".to_string()).await.unwrap();
        assert!(directory.lookup("r1".to_string()).await.unwrap().is_some());

        directory.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_room_is_removed() {
        let (directory, _task) = test_directory();

        let room = directory.get_or_create("r1".to_string()).await.unwrap();
        room.join("c1".to_string(), "alice".to_string(), test_connection("c1", "alice"))
            .await
            .unwrap();
        room.leave("c1".to_string()).await.unwrap();

        // Sleep past the grace window; the expiry notice gets processed.
        tokio::time::sleep(GRACE + Duration::from_secs(1)).await;

        assert!(directory.lookup("r1".to_string()).await.unwrap().is_none());
        let status = directory.status().await.unwrap();
        assert_eq!(status.room_count, 0);

        directory.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_recreated_after_expiry_gets_new_generation() {
        let (directory, _task) = test_directory();

        let first = directory.get_or_create("r1".to_string()).await.unwrap();
        tokio::time::sleep(GRACE + Duration::from_secs(1)).await;

        let second = directory.get_or_create("r1".to_string()).await.unwrap();
        assert!(second.generation() > first.generation());

        directory.cancel();
    }

    #[tokio::test]
    async fn test_stale_expiry_notice_ignored() {
        let (directory, _task) = test_directory();

        let room = directory.get_or_create("r1".to_string()).await.unwrap();
        room.join("c1".to_string(), "alice".to_string(), test_connection("c1", "alice"))
            .await
            .unwrap();

        // A notice from a generation that never matched this entry.
        directory
            .raw_sender()
            .send(DirectoryMessage::RoomExpired {
                room_id: "r1".to_string(),
                generation: room.generation() + 100,
            })
            .await
            .unwrap();

        assert!(directory.lookup("r1".to_string()).await.unwrap().is_some());

        directory.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_rooms_and_rejects_new_ones() {
        let (directory, task) = test_directory();

        let room = directory.get_or_create("r1".to_string()).await.unwrap();
        room.join("c1".to_string(), "alice".to_string(), test_connection("c1", "alice"))
            .await
            .unwrap();

        directory.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert!(room.is_cancelled());
        let result = directory.get_or_create("r2".to_string()).await;
        assert!(matches!(result, Err(SignalingError::ShuttingDown)));
    }
}
