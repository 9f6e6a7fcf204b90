//! Live log WebSocket.
//!
//! Each connection registers one channel sink on the event bus. Frames are
//! forwarded as text messages until either side goes away; the bus drops
//! the sink itself if the client falls too far behind.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use bera_stream::Topic;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info};

use crate::ApiState;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Only stream this application's events.
    pub app: Option<String>,
}

/// GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let topic = Topic::from_filter(query.app.as_deref());
    ws.on_upgrade(move |socket| handle_socket(socket, state, topic))
}

async fn handle_socket(socket: WebSocket, state: ApiState, topic: Topic) {
    let (id, mut rx) = state
        .bus
        .subscribe_channel(topic.clone(), state.subscriber_buffer);
    info!(subscriber = id, ?topic, "live log connection established");

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        // Ends when the bus drops this sink or the client stops reading.
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.bus.unsubscribe(id);
    debug!(subscriber = id, "live log connection closed");
}
