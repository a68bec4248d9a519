//! WebSocket connection gateway.
//!
//! `GET /ws` upgrades to a WebSocket. Each socket becomes one connection:
//! the hub spawns its `ConnectionActor`, a writer task owns the socket sink
//! and merges replies with pushes, and the read loop feeds frames to the
//! actor one at a time. When the socket closes, errors, or the hub shuts the
//! connection down, the actor is disconnected and its session released. The
//! writer then flushes replies already queued and closes the socket.

pub mod protocol;

use crate::actors::{ConnectionActorHandle, ServerPush, SignalingHubHandle};
use crate::errors::SfuError;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use common::types::ConnectionId;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

use protocol::{process_frame, push_text, ReplyFrame};

/// Pushes queued for a connection before the hub starts dropping them.
const PUSH_BUFFER: usize = 128;

/// Replies queued for the writer task.
const REPLY_BUFFER: usize = 32;

/// How long the writer may take to flush and send the close frame.
const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct GatewayState {
    hub: SignalingHubHandle,
}

/// Router serving the WebSocket endpoint.
pub fn gateway_router(hub: SignalingHubHandle) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(GatewayState { hub })
        .layer(TraceLayer::new_for_http())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

#[instrument(skip_all, name = "sfu.gateway.socket", fields(connection_id = tracing::field::Empty))]
async fn handle_socket(mut socket: WebSocket, hub: SignalingHubHandle) {
    let connection_id = ConnectionId::new();
    tracing::Span::current().record("connection_id", tracing::field::display(connection_id));

    let (push_tx, push_rx) = mpsc::channel::<ServerPush>(PUSH_BUFFER);

    let connection = match hub.connect(connection_id, push_tx).await {
        Ok(connection) => connection,
        Err(e) => {
            warn!(target: "sfu.gateway", error = %e, "Connection refused");
            let _ = socket
                .send(Message::Text(ReplyFrame::error(None, &e).to_text()))
                .await;
            let _ = socket.close().await;
            return;
        }
    };

    info!(target: "sfu.gateway", "Client connected");

    let (sink, mut stream) = socket.split();
    let (reply_tx, reply_rx) = mpsc::channel::<String>(REPLY_BUFFER);
    let stop_writer = CancellationToken::new();
    let mut writer = spawn_writer(sink, reply_rx, push_rx, stop_writer.clone());

    loop {
        tokio::select! {
            biased;

            () = connection.closed() => {
                debug!(target: "sfu.gateway", "Connection closed by server");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_text(&connection, &text, &reply_tx).await {
                            debug!(target: "sfu.gateway", error = %e, "Writer gone");
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let error = SfuError::InvalidRequest("binary frames are not supported".to_string());
                        if reply_tx.send(ReplyFrame::error(None, &error).to_text()).await.is_err() {
                            break;
                        }
                    }
                    // Pongs are produced by the socket itself
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(target: "sfu.gateway", "Client closed socket");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(target: "sfu.gateway", error = %e, "Socket read error");
                        break;
                    }
                }
            }
        }
    }

    connection.disconnect();
    stop_writer.cancel();
    drop(reply_tx);
    if tokio::time::timeout(WRITER_CLOSE_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        warn!(target: "sfu.gateway", "Writer did not close the socket in time");
        writer.abort();
    }

    info!(target: "sfu.gateway", "Client disconnected");
}

async fn handle_text(
    connection: &ConnectionActorHandle,
    text: &str,
    reply_tx: &mpsc::Sender<String>,
) -> Result<(), SfuError> {
    if let Some(reply) = process_frame(connection, text).await {
        reply_tx
            .send(reply.to_text())
            .await
            .map_err(|e| SfuError::Internal(format!("reply send failed: {e}")))?;
    }
    Ok(())
}

/// Own the sink and write replies and pushes in arrival order.
///
/// On `stop`, replies already queued are still written; pending pushes are
/// dropped. The sink is closed last so the client sees a close frame.
fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut reply_rx: mpsc::Receiver<String>,
    mut push_rx: mpsc::Receiver<ServerPush>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                biased;

                () = stop.cancelled() => {
                    flush_replies(&mut sink, &mut reply_rx).await;
                    break;
                }
                Some(text) = reply_rx.recv() => text,
                Some(push) = push_rx.recv() => match push_text(&push) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(target: "sfu.gateway", error = %e, "Dropped push");
                        continue;
                    }
                },
            };

            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!(target: "sfu.gateway", error = %e, "Socket write failed");
                break;
            }
        }
        if let Err(e) = sink.close().await {
            debug!(target: "sfu.gateway", error = %e, "Socket close failed");
        }
    })
}

async fn flush_replies(
    sink: &mut SplitSink<WebSocket, Message>,
    reply_rx: &mut mpsc::Receiver<String>,
) {
    while let Ok(text) = reply_rx.try_recv() {
        if let Err(e) = sink.send(Message::Text(text)).await {
            debug!(target: "sfu.gateway", error = %e, "Socket write failed while closing");
            return;
        }
    }
}
