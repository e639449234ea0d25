//! Fire-and-forget notifications to the external meeting-metadata store.
//!
//! The signaling engine is the source of truth for live presence; the
//! metadata store only receives advisory snapshots (participant counts,
//! room closure). Notifications are queued on an unbounded channel and
//! posted by a background task, so a slow or absent collaborator never
//! blocks a presence or relay path. Failures are logged and dropped.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Request timeout for metadata posts.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Notification {
    CountChanged { room_id: String, count: usize },
    RoomClosed { room_id: String },
}

#[derive(Debug, Serialize)]
struct CountUpdate {
    count: usize,
}

/// Handle for enqueueing metadata notifications. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MetadataNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl MetadataNotifier {
    /// Spawn the notifier task.
    ///
    /// With `base_url` set, notifications are POSTed as JSON; without it
    /// they are logged at debug level and discarded.
    pub fn spawn(
        base_url: Option<String>,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();

        let worker = NotifierWorker {
            receiver,
            cancel_token,
            base_url,
        };
        let task_handle = tokio::spawn(worker.run());

        (Self { sender }, task_handle)
    }

    /// A notifier whose notifications go nowhere. For tests and for
    /// callers constructed before the worker exists.
    #[must_use]
    pub fn disabled() -> Self {
        let (sender, _receiver) = mpsc::unbounded_channel();
        Self { sender }
    }

    /// Report a room's participant count after a membership change.
    pub fn count_changed(&self, room_id: &str, count: usize) {
        let _ = self.sender.send(Notification::CountChanged {
            room_id: room_id.to_string(),
            count,
        });
    }

    /// Report that a room was evicted.
    pub fn room_closed(&self, room_id: &str) {
        let _ = self.sender.send(Notification::RoomClosed {
            room_id: room_id.to_string(),
        });
    }
}

struct NotifierWorker {
    receiver: mpsc::UnboundedReceiver<Notification>,
    cancel_token: CancellationToken,
    base_url: Option<String>,
}

impl NotifierWorker {
    async fn run(mut self) {
        let client = match reqwest::Client::builder().timeout(NOTIFY_TIMEOUT).build() {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(
                    target: "sg.metadata",
                    error = %e,
                    "Failed to build HTTP client, metadata notifications disabled"
                );
                None
            }
        };

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "sg.metadata", "Metadata notifier cancelled");
                    break;
                }

                notification = self.receiver.recv() => {
                    match notification {
                        Some(notification) => {
                            self.dispatch(client.as_ref(), notification).await;
                        }
                        None => break,
                    }
                }
            }
        }
    }

    async fn dispatch(&self, client: Option<&reqwest::Client>, notification: Notification) {
        let (Some(base_url), Some(client)) = (self.base_url.as_deref(), client) else {
            debug!(
                target: "sg.metadata",
                notification = ?notification,
                "Metadata store not configured, dropping notification"
            );
            return;
        };

        let result = match &notification {
            Notification::CountChanged { room_id, count } => {
                client
                    .post(format!("{base_url}/internal/rooms/{room_id}/participants"))
                    .json(&CountUpdate { count: *count })
                    .send()
                    .await
            }
            Notification::RoomClosed { room_id } => {
                client
                    .post(format!("{base_url}/internal/rooms/{room_id}/closed"))
                    .send()
                    .await
            }
        };

        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    target: "sg.metadata",
                    status = %response.status(),
                    notification = ?notification,
                    "Metadata store rejected notification"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    target: "sg.metadata",
                    error = %e,
                    notification = ?notification,
                    "Failed to notify metadata store"
                );
            }
        }
    }
}
