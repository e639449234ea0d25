//! `RoomActor` - per-room actor that owns room state.
//!
//! Each `RoomActor`:
//! - Owns the member map for one room (connection id → member)
//! - Serializes every membership mutation, presence broadcast, and relay
//!   fan-out through its mailbox, so all members observe room events in
//!   one order
//! - Manages the room lifecycle: Active while members remain, Draining
//!   with an armed eviction deadline when empty
//!
//! # Eviction
//!
//! An empty room is not removed immediately. It drains for a grace window;
//! a join processed before the deadline fires re-arms the room to Active.
//! The deadline and the mailbox live in the same `select!`, so a rejoin
//! and an expiry can never interleave - whichever the actor processes
//! first wins. On expiry the actor notifies the directory with its
//! generation and exits.

use crate::actors::connection::{ConnectionHandle, DeliveryError};
use crate::actors::messages::{
    DirectoryMessage, MemberInfo, RoomLifecycle, RoomMessage, RoomSnapshot,
};
use crate::actors::metrics::ServiceMetrics;
use crate::errors::SignalingError;
use crate::metadata::MetadataNotifier;
use crate::protocol::{PresenceKind, ServerEvent};

use serde_json::value::RawValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 256;

/// Handle to a `RoomActor`.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
    generation: u64,
}

impl RoomHandle {
    /// Get the room ID.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Get the generation assigned by the directory when this room spawned.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Join the room. Replies with the member count after the join.
    ///
    /// A closed mailbox maps to [`SignalingError::RoomClosed`]: the room
    /// expired under this handle and the caller retries through the
    /// directory.
    pub async fn join(
        &self,
        connection_id: String,
        user_id: String,
        connection: ConnectionHandle,
    ) -> Result<usize, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                connection_id,
                user_id,
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|_| SignalingError::RoomClosed)?;

        rx.await.map_err(|_| SignalingError::RoomClosed)?
    }

    /// Leave the room. Replies with the remaining member count.
    pub async fn leave(&self, connection_id: String) -> Result<usize, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Leave {
                connection_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| SignalingError::RoomClosed)?;

        rx.await.map_err(|_| SignalingError::RoomClosed)?
    }

    /// Relay an opaque payload to every member except the sender.
    pub async fn relay(
        &self,
        sender_connection_id: String,
        payload: Box<RawValue>,
    ) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Relay {
                sender_connection_id,
                payload,
                respond_to: tx,
            })
            .await
            .map_err(|_| SignalingError::RoomClosed)?;

        rx.await.map_err(|_| SignalingError::RoomClosed)?
    }

    /// Get a point-in-time snapshot of the room.
    pub async fn get_state(&self) -> Result<RoomSnapshot, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| SignalingError::RoomClosed)?;

        rx.await.map_err(|_| SignalingError::RoomClosed)
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// One member of the room.
#[derive(Debug)]
struct Member {
    user_id: String,
    connection: ConnectionHandle,
}

/// Internal lifecycle phase. `Draining` carries the armed eviction deadline.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Active,
    Draining { deadline: Instant },
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Room ID.
    room_id: String,
    /// Generation assigned by the directory; echoed back on expiry so the
    /// directory can ignore a notice from a superseded incarnation.
    generation: u64,
    /// Message receiver.
    receiver: mpsc::Receiver<RoomMessage>,
    /// Cancellation token (child of the directory's token).
    cancel_token: CancellationToken,
    /// Members by connection ID. The participant count is always the
    /// cardinality of this map.
    members: HashMap<String, Member>,
    /// Lifecycle phase.
    phase: Phase,
    /// Grace window applied when the room becomes empty.
    grace_window: Duration,
    /// Directory mailbox, for the expiry notice.
    directory: mpsc::Sender<DirectoryMessage>,
    /// External metadata collaborator (fire-and-forget).
    notifier: MetadataNotifier,
    /// Room creation timestamp.
    created_at: i64,
    /// Shared service metrics.
    metrics: Arc<ServiceMetrics>,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// A freshly spawned room is empty, so it starts Draining: a room
    /// created by a join that never completes still gets evicted.
    pub fn spawn(
        room_id: String,
        generation: u64,
        grace_window: Duration,
        cancel_token: CancellationToken,
        directory: mpsc::Sender<DirectoryMessage>,
        notifier: MetadataNotifier,
        metrics: Arc<ServiceMetrics>,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            generation,
            receiver,
            cancel_token: cancel_token.clone(),
            members: HashMap::new(),
            phase: Phase::Draining {
                deadline: Instant::now() + grace_window,
            },
            grace_window,
            directory,
            notifier,
            created_at: chrono::Utc::now().timestamp(),
            metrics,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            cancel_token,
            room_id,
            generation,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    async fn run(mut self) {
        info!(
            target: "sg.actor.room",
            room_id = %self.room_id,
            generation = self.generation,
            "RoomActor started"
        );

        loop {
            let deadline = match self.phase {
                Phase::Active => None,
                Phase::Draining { deadline } => Some(deadline),
            };

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sg.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                () = Self::draining_elapsed(deadline) => {
                    self.handle_expiry().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            debug!(
                                target: "sg.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sg.actor.room",
            room_id = %self.room_id,
            members = self.members.len(),
            "RoomActor stopped"
        );
    }

    /// Completes when the Draining deadline fires; pends forever while
    /// Active.
    async fn draining_elapsed(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                connection_id,
                user_id,
                connection,
                respond_to,
            } => {
                let result = self.handle_join(connection_id, user_id, connection);
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave {
                connection_id,
                respond_to,
            } => {
                let result = self.handle_leave(&connection_id);
                let _ = respond_to.send(result);
            }

            RoomMessage::Relay {
                sender_connection_id,
                payload,
                respond_to,
            } => {
                let result = self.handle_relay(&sender_connection_id, payload);
                let _ = respond_to.send(result);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }

        // Active iff at least one member.
        debug_assert_eq!(
            self.members.is_empty(),
            matches!(self.phase, Phase::Draining { .. })
        );
    }

    /// Handle a connection joining.
    fn handle_join(
        &mut self,
        connection_id: String,
        user_id: String,
        connection: ConnectionHandle,
    ) -> Result<usize, SignalingError> {
        if self.members.contains_key(&connection_id) {
            return Err(SignalingError::AlreadyMember(self.room_id.clone()));
        }

        if let Phase::Draining { .. } = self.phase {
            debug!(
                target: "sg.actor.room",
                room_id = %self.room_id,
                "Join while draining, eviction cancelled"
            );
        }
        self.phase = Phase::Active;

        self.members.insert(
            connection_id,
            Member {
                user_id: user_id.clone(),
                connection,
            },
        );
        let count = self.members.len();

        // The joiner sees its own joined event.
        self.broadcast_presence(PresenceKind::Joined, &user_id, count, None);
        self.metrics.presence_broadcast();

        info!(
            target: "sg.actor.room",
            room_id = %self.room_id,
            user_id = %user_id,
            members = count,
            "Member joined"
        );

        Ok(count)
    }

    /// Handle a connection leaving.
    fn handle_leave(&mut self, connection_id: &str) -> Result<usize, SignalingError> {
        let Some(member) = self.members.remove(connection_id) else {
            return Err(SignalingError::NotMember(self.room_id.clone()));
        };

        let count = self.members.len();

        // The leaver is already out of the map, so the broadcast can never
        // reach its (possibly closed) connection.
        self.broadcast_presence(PresenceKind::Left, &member.user_id, count, None);
        self.metrics.presence_broadcast();

        info!(
            target: "sg.actor.room",
            room_id = %self.room_id,
            user_id = %member.user_id,
            members = count,
            "Member left"
        );

        if self.members.is_empty() {
            let deadline = Instant::now() + self.grace_window;
            self.phase = Phase::Draining { deadline };
            debug!(
                target: "sg.actor.room",
                room_id = %self.room_id,
                grace_secs = self.grace_window.as_secs(),
                "Room empty, draining"
            );
        }

        Ok(count)
    }

    /// Handle a relay request from a member.
    fn handle_relay(
        &mut self,
        sender_connection_id: &str,
        payload: Box<RawValue>,
    ) -> Result<(), SignalingError> {
        if !self.members.contains_key(sender_connection_id) {
            return Err(SignalingError::Authorization(self.room_id.clone()));
        }

        for (connection_id, member) in &self.members {
            if connection_id == sender_connection_id {
                continue;
            }

            let event = ServerEvent::Signal {
                room_id: self.room_id.clone(),
                payload: payload.clone(),
            };
            self.deliver(member, event);
        }

        self.metrics.signal_relayed();
        Ok(())
    }

    /// Broadcast a presence event to every member except `exclude`.
    fn broadcast_presence(
        &self,
        kind: PresenceKind,
        user_id: &str,
        count: usize,
        exclude: Option<&str>,
    ) {
        for (connection_id, member) in &self.members {
            if exclude == Some(connection_id.as_str()) {
                continue;
            }

            let event = ServerEvent::Presence {
                room_id: self.room_id.clone(),
                kind,
                user_id: user_id.to_string(),
                count,
            };
            self.deliver(member, event);
        }
    }

    /// Non-blocking delivery to one member. Overflow already cancelled the
    /// recipient inside `try_deliver`; the transport layer runs its
    /// disconnect path from there.
    fn deliver(&self, member: &Member, event: ServerEvent) {
        match member.connection.try_deliver(event) {
            Ok(()) | Err(DeliveryError::Closed) => {}
            Err(DeliveryError::Full) => {
                self.metrics.delivery_dropped();
                warn!(
                    target: "sg.actor.room",
                    room_id = %self.room_id,
                    connection_id = %member.connection.connection_id(),
                    "Dropped delivery to overflowing member"
                );
            }
        }
    }

    /// The Draining deadline fired: notify the directory and exit.
    ///
    /// The notice is sent before this actor drops its receiver, so any
    /// in-flight join that raced the deadline fails with a closed channel
    /// and retries through the directory, which processes this removal
    /// first.
    async fn handle_expiry(&mut self) {
        info!(
            target: "sg.actor.room",
            room_id = %self.room_id,
            generation = self.generation,
            "Grace window elapsed, evicting room"
        );

        let _ = self
            .directory
            .send(DirectoryMessage::RoomExpired {
                room_id: self.room_id.clone(),
                generation: self.generation,
            })
            .await;

        self.notifier.room_closed(&self.room_id);
    }

    /// Point-in-time snapshot.
    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            generation: self.generation,
            lifecycle: match self.phase {
                Phase::Active => RoomLifecycle::Active,
                Phase::Draining { .. } => RoomLifecycle::Draining,
            },
            members: self
                .members
                .iter()
                .map(|(connection_id, member)| MemberInfo {
                    connection_id: connection_id.clone(),
                    user_id: member.user_id.clone(),
                })
                .collect(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::connection::{ConnectionActor, DeliverySink, SinkClosed};

    const GRACE: Duration = Duration::from_secs(30);

    struct ChannelSink(mpsc::UnboundedSender<String>);

    impl DeliverySink for ChannelSink {
        async fn deliver(&mut self, frame: String) -> Result<(), SinkClosed> {
            self.0.send(frame).map_err(|_| SinkClosed)
        }
    }

    /// Spawn a connection actor whose delivered frames land on the
    /// returned channel as parsed JSON.
    fn test_connection(
        connection_id: &str,
        user_id: &str,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (handle, _task) = ConnectionActor::spawn(
            connection_id.to_string(),
            user_id.to_string(),
            ChannelSink(tx),
            CancellationToken::new(),
            64,
        );
        (handle, rx)
    }

    fn test_room(
        room_id: &str,
    ) -> (RoomHandle, mpsc::Receiver<DirectoryMessage>) {
        let (directory_tx, directory_rx) = mpsc::channel(16);
        let (handle, _task) = RoomActor::spawn(
            room_id.to_string(),
            1,
            GRACE,
            CancellationToken::new(),
            directory_tx,
            MetadataNotifier::disabled(),
            ServiceMetrics::new(),
        );
        (handle, directory_rx)
    }

    async fn next_json(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("sink channel closed");
        serde_json::from_str(&frame).unwrap()
    }

    fn raw(payload: &str) -> Box<RawValue> {
        RawValue::from_string(payload.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_join_broadcasts_to_all_including_joiner() {
        let (room, _dir) = test_room("r1");
        let (alice, mut alice_rx) = test_connection("c1", "alice");
        let (bob, mut bob_rx) = test_connection("c2", "bob");

        let count = room
            .join("c1".to_string(), "alice".to_string(), alice)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let event = next_json(&mut alice_rx).await;
        assert_eq!(event["type"], "presence");
        assert_eq!(event["kind"], "joined");
        assert_eq!(event["user_id"], "alice");
        assert_eq!(event["count"], 1);

        let count = room
            .join("c2".to_string(), "bob".to_string(), bob)
            .await
            .unwrap();
        assert_eq!(count, 2);

        // Both the existing member and the joiner see bob's arrival.
        let event = next_json(&mut alice_rx).await;
        assert_eq!(event["user_id"], "bob");
        assert_eq!(event["count"], 2);
        let event = next_json(&mut bob_rx).await;
        assert_eq!(event["user_id"], "bob");
        assert_eq!(event["count"], 2);
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected() {
        let (room, _dir) = test_room("r1");
        let (alice, _alice_rx) = test_connection("c1", "alice");
        let (alice_again, _rx) = test_connection("c1", "alice");

        room.join("c1".to_string(), "alice".to_string(), alice)
            .await
            .unwrap();

        let result = room
            .join("c1".to_string(), "alice".to_string(), alice_again)
            .await;
        assert!(matches!(result, Err(SignalingError::AlreadyMember(_))));

        // Count unchanged.
        let state = room.get_state().await.unwrap();
        assert_eq!(state.members.len(), 1);
    }

    #[tokio::test]
    async fn test_leave_broadcasts_to_remaining_only() {
        let (room, _dir) = test_room("r1");
        let (alice, mut alice_rx) = test_connection("c1", "alice");
        let (bob, mut bob_rx) = test_connection("c2", "bob");

        room.join("c1".to_string(), "alice".to_string(), alice)
            .await
            .unwrap();
        room.join("c2".to_string(), "bob".to_string(), bob)
            .await
            .unwrap();

        // Drain the join events.
        next_json(&mut alice_rx).await;
        next_json(&mut alice_rx).await;
        next_json(&mut bob_rx).await;

        let count = room.leave("c2".to_string()).await.unwrap();
        assert_eq!(count, 1);

        let event = next_json(&mut alice_rx).await;
        assert_eq!(event["kind"], "left");
        assert_eq!(event["user_id"], "bob");
        assert_eq!(event["count"], 1);

        // The leaver got nothing after its own join event.
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_when_not_member() {
        let (room, _dir) = test_room("r1");
        let result = room.leave("ghost".to_string()).await;
        assert!(matches!(result, Err(SignalingError::NotMember(_))));
    }

    #[tokio::test]
    async fn test_relay_excludes_sender() {
        let (room, _dir) = test_room("r1");
        let (alice, mut alice_rx) = test_connection("c1", "alice");
        let (bob, mut bob_rx) = test_connection("c2", "bob");
        let (carol, mut carol_rx) = test_connection("c3", "carol");

        room.join("c1".to_string(), "alice".to_string(), alice)
            .await
            .unwrap();
        room.join("c2".to_string(), "bob".to_string(), bob)
            .await
            .unwrap();
        room.join("c3".to_string(), "carol".to_string(), carol)
            .await
            .unwrap();

        // Drain presence events.
        for _ in 0..3 {
            next_json(&mut alice_rx).await;
        }
        for _ in 0..2 {
            next_json(&mut bob_rx).await;
        }
        next_json(&mut carol_rx).await;

        room.relay("c1".to_string(), raw(r#"{"sdp":"v=0"}"#))
            .await
            .unwrap();

        let event = next_json(&mut bob_rx).await;
        assert_eq!(event["type"], "signal");
        assert_eq!(event["payload"]["sdp"], "v=0");
        let event = next_json(&mut carol_rx).await;
        assert_eq!(event["payload"]["sdp"], "v=0");

        // Sender never receives its own signal.
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_from_non_member_rejected() {
        let (room, _dir) = test_room("r1");
        let (alice, mut alice_rx) = test_connection("c1", "alice");

        room.join("c1".to_string(), "alice".to_string(), alice)
            .await
            .unwrap();
        next_json(&mut alice_rx).await;

        let result = room.relay("intruder".to_string(), raw("{}")).await;
        assert!(matches!(result, Err(SignalingError::Authorization(_))));

        // Nothing was fanned out.
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_room_expires_after_grace_window() {
        let (room, mut directory_rx) = test_room("r1");
        let (alice, _alice_rx) = test_connection("c1", "alice");

        room.join("c1".to_string(), "alice".to_string(), alice)
            .await
            .unwrap();
        room.leave("c1".to_string()).await.unwrap();

        let state = room.get_state().await.unwrap();
        assert_eq!(state.lifecycle, RoomLifecycle::Draining);

        // Just before the deadline the room is still there.
        tokio::time::advance(GRACE - Duration::from_secs(1)).await;
        let state = room.get_state().await.unwrap();
        assert_eq!(state.lifecycle, RoomLifecycle::Draining);

        // Awaiting the expiry notice advances past the deadline.
        let notice = directory_rx.recv().await.expect("expiry notice");
        match notice {
            DirectoryMessage::RoomExpired {
                room_id,
                generation,
            } => {
                assert_eq!(room_id, "r1");
                assert_eq!(generation, 1);
            }
            other => panic!("unexpected directory message: {other:?}"),
        }

        // The actor exited; the handle now reports the room closed.
        let result = room.leave("c1".to_string()).await;
        assert!(matches!(result, Err(SignalingError::RoomClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_cancels_pending_eviction() {
        let (room, mut directory_rx) = test_room("r1");
        let (alice, _alice_rx) = test_connection("c1", "alice");
        let (bob, _bob_rx) = test_connection("c2", "bob");

        room.join("c1".to_string(), "alice".to_string(), alice)
            .await
            .unwrap();
        room.leave("c1".to_string()).await.unwrap();

        tokio::time::advance(GRACE - Duration::from_secs(1)).await;

        // Rejoin one second before eviction.
        let count = room
            .join("c2".to_string(), "bob".to_string(), bob)
            .await
            .unwrap();
        assert_eq!(count, 1);

        // Long past the original deadline the room is alive and Active.
        tokio::time::advance(GRACE * 2).await;
        let state = room.get_state().await.unwrap();
        assert_eq!(state.lifecycle, RoomLifecycle::Active);
        assert!(directory_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_joined_room_expires() {
        let (room, mut directory_rx) = test_room("r1");

        // No join ever arrives; the room still gets evicted.
        let notice = directory_rx.recv().await.expect("expiry notice");
        assert!(matches!(notice, DirectoryMessage::RoomExpired { .. }));
        let result = room.get_state().await;
        assert!(matches!(result, Err(SignalingError::RoomClosed)));
    }

    #[tokio::test]
    async fn test_snapshot_reflects_members() {
        let (room, _dir) = test_room("standup");
        let (alice, _alice_rx) = test_connection("c1", "alice");
        let (bob, _bob_rx) = test_connection("c2", "bob");

        room.join("c1".to_string(), "alice".to_string(), alice)
            .await
            .unwrap();
        room.join("c2".to_string(), "bob".to_string(), bob)
            .await
            .unwrap();

        let state = room.get_state().await.unwrap();
        assert_eq!(state.room_id, "standup");
        assert_eq!(state.generation, 1);
        assert_eq!(state.lifecycle, RoomLifecycle::Active);
        assert_eq!(state.members.len(), 2);
    }
}
