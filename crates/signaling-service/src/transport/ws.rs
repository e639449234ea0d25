//! WebSocket transport.
//!
//! One task per socket: inbound frames are parsed and dispatched to the
//! coordinator; outbound events flow through the connection actor, whose
//! sink is the write half of the socket. When the socket drops - cleanly
//! or not - the disconnect path runs exactly once.

use crate::actors::connection::{ConnectionActor, ConnectionHandle, DeliverySink, SinkClosed};
use crate::coordinator::SignalingCoordinator;
use crate::protocol::{ClientEvent, ServerEvent};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::auth;

/// Shared state for the WebSocket router.
#[derive(Clone)]
pub struct TransportState {
    coordinator: SignalingCoordinator,
    /// Bounded capacity of each connection's outbound queue.
    queue_capacity: usize,
    /// Parent token for connection actors; cancelled on shutdown.
    cancel_token: CancellationToken,
}

impl TransportState {
    /// Create transport state.
    #[must_use]
    pub fn new(
        coordinator: SignalingCoordinator,
        queue_capacity: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            queue_capacity,
            cancel_token,
        }
    }
}

/// Create the WebSocket router.
pub fn ws_router(state: TransportState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<TransportState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(user_id) = auth::authenticated_user(&headers, &params) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

/// Write half of the socket as a delivery sink.
struct WebSocketSink(SplitSink<WebSocket, Message>);

impl DeliverySink for WebSocketSink {
    async fn deliver(&mut self, frame: String) -> Result<(), SinkClosed> {
        self.0
            .send(Message::Text(frame))
            .await
            .map_err(|_| SinkClosed)
    }
}

async fn handle_socket(socket: WebSocket, user_id: String, state: TransportState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (sink, stream) = socket.split();

    let (connection, _task) = ConnectionActor::spawn(
        connection_id.clone(),
        user_id.clone(),
        WebSocketSink(sink),
        state.cancel_token.child_token(),
        state.queue_capacity,
    );

    if let Err(e) = state.coordinator.register_connection(connection.clone()) {
        warn!(
            target: "sg.transport",
            connection_id = %connection_id,
            error = %e,
            "Failed to register connection"
        );
        connection.cancel();
        return;
    }

    info!(
        target: "sg.transport",
        connection_id = %connection_id,
        user_id = %user_id,
        "Connection established"
    );

    read_loop(&state.coordinator, &connection, stream).await;

    // Runs exactly once per connection, whether the client left cleanly,
    // the socket errored, or the service is shutting down.
    state.coordinator.handle_disconnect(&connection_id).await;

    info!(
        target: "sg.transport",
        connection_id = %connection_id,
        "Connection closed"
    );
}

async fn read_loop(
    coordinator: &SignalingCoordinator,
    connection: &ConnectionHandle,
    mut stream: SplitStream<WebSocket>,
) {
    loop {
        tokio::select! {
            () = connection.cancelled() => break,

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(coordinator, connection, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Binary frames are not part of the protocol;
                    // ping/pong is handled by axum.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(
                            target: "sg.transport",
                            connection_id = %connection.connection_id(),
                            error = %e,
                            "Socket read error"
                        );
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_frame(
    coordinator: &SignalingCoordinator,
    connection: &ConnectionHandle,
    text: &str,
) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(
                target: "sg.transport",
                connection_id = %connection.connection_id(),
                error = %e,
                "Malformed client event"
            );
            send_error_frame(connection, "invalid_event", "Malformed event".to_string());
            return;
        }
    };

    let result = match event {
        ClientEvent::Join { room_id } => coordinator
            .handle_join(connection.connection_id(), &room_id)
            .await
            .map(|_| ()),
        ClientEvent::Leave { room_id } => coordinator
            .handle_leave(connection.connection_id(), &room_id)
            .await
            .map(|_| ()),
        ClientEvent::Signal { room_id, payload } => {
            coordinator
                .relay(connection.connection_id(), &room_id, payload)
                .await
        }
    };

    if let Err(e) = result {
        send_error_frame(connection, e.error_code(), e.client_message());
    }
}

/// Queue an error event for the offending connection only.
fn send_error_frame(connection: &ConnectionHandle, code: &'static str, message: String) {
    let _ = connection.try_deliver(ServerEvent::Error { code, message });
}
