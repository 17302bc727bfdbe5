use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use watchdata_log_stream::{FanOutHub, LogStore, SubscriberId, channel_subscriber};

use super::AppState;

// ═══════════════════════════════════════════════════════════════
//  WebSocket: /ws
// ═══════════════════════════════════════════════════════════════

pub(super) async fn handle_ws<S: LogStore>(
    State(state): State<AppState<S>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(socket, state))
}

/// One subscriber per connection.
///
/// The writer loop sends every record the hub delivers as one JSON text
/// frame. A separate reader task only watches for the client going away and
/// unregisters the subscriber when it does.
async fn ws_connection<S: LogStore>(socket: WebSocket, state: AppState<S>) {
    let id = SubscriberId::new();
    let (sink, mut rx) = channel_subscriber(state.subscriber_buffer);
    state.hub.register(id, sink);
    tracing::info!(subscriber = %id, "websocket subscriber connected");

    let (mut sender, receiver) = socket.split();
    let conn = state.shutdown.child_token();
    let reader = tokio::spawn(watch_for_close(
        receiver,
        Arc::clone(&state.hub),
        id,
        conn.clone(),
    ));

    loop {
        tokio::select! {
            biased;

            _ = conn.cancelled() => break,

            record = rx.recv() => {
                let Some(record) = record else {
                    // sender dropped: the hub evicted this subscriber
                    tracing::info!(subscriber = %id, "subscriber evicted, closing connection");
                    break;
                };

                let json = match serde_json::to_string(record.as_ref()) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(subscriber = %id, error = %e, "failed to encode record");
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    conn.cancel();
    let _ = reader.await;
    state.hub.unregister(id);
    tracing::info!(subscriber = %id, "websocket subscriber disconnected");
}

/// Read client frames until close, error or cancellation, then unregister.
///
/// Client frames carry no meaning and are discarded.
async fn watch_for_close(
    mut receiver: SplitStream<WebSocket>,
    hub: Arc<FanOutHub>,
    id: SubscriberId,
    conn: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = conn.cancelled() => break,

            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    if hub.unregister(id) {
        tracing::debug!(subscriber = %id, "subscriber unregistered on close");
    }
    conn.cancel();
}
