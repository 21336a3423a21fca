//! WebSocket connection lifecycle. Grounded on
//! `at-bridge::terminal_ws::handle_terminal_ws`'s task-per-direction
//! shape: a reader task forwards hub broadcasts to the socket, a
//! writer task decodes inbound JSON commands, and a heartbeat task
//! pings on a fixed interval. All three are aborted together when any
//! one of them exits.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{info, warn};

use crate::hub::build_initial_state;
use crate::origin_validation::{get_default_allowed_origins, validate_websocket_origin};
use crate::protocol::{BridgeEvent, Command};
use crate::rpc::Dispatcher;

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct WsState {
    pub dispatcher: Arc<Dispatcher>,
}

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<WsState>, headers: HeaderMap) -> impl IntoResponse {
    let allowed = get_default_allowed_origins();
    if let Err(status) = validate_websocket_origin(&headers, &allowed) {
        return (status, "origin not allowed").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state.dispatcher))
}

async fn handle_socket(socket: WebSocket, dispatcher: Arc<Dispatcher>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let ws_sender = Arc::new(tokio::sync::Mutex::new(ws_sender));

    let (client_id, rx) = dispatcher.hub.register();
    info!(client_id, "websocket client connected");

    // If the recovery barrier is already down, send initial_state right
    // away; otherwise the client sits in the hub's pending queue until
    // the barrier lifts and the daemon flushes it explicitly.
    if !dispatcher.hub.is_recovering() {
        match build_initial_state(&dispatcher.store, &dispatcher.core, &dispatcher.instance_id).await {
            Ok(snapshot) => dispatcher.hub.send_to(client_id, snapshot),
            Err(e) => warn!(error = %e, "failed to build initial_state snapshot"),
        }
    }

    let broadcast_sender = ws_sender.clone();
    let broadcast_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv_async().await {
            let text = match serde_json::to_string(event.as_ref()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if broadcast_sender.lock().await.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let inbound_dispatcher = dispatcher.clone();
    let inbound_sender = ws_sender.clone();
    let inbound_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let parsed = serde_json::from_str::<Command>(&text);
                    match parsed {
                        Ok(cmd) => {
                            let name = cmd.name().to_string();
                            if let Err(e) = inbound_dispatcher.dispatch(cmd).await {
                                let event = BridgeEvent::CommandError { cmd: name, error: e.code().to_string() };
                                if let Ok(text) = serde_json::to_string(&event) {
                                    let _ = inbound_sender.lock().await.send(Message::Text(text.into())).await;
                                }
                            }
                        }
                        Err(_) => {
                            let body = json!({"event": "command_error", "cmd": "unknown", "error": "unknown command"});
                            let _ = inbound_sender.lock().await.send(Message::Text(body.to_string().into())).await;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let ping_sender = ws_sender.clone();
    let ping_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        loop {
            interval.tick().await;
            if ping_sender.lock().await.send(Message::Ping(Vec::new().into())).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = broadcast_task => {}
        _ = inbound_task => {}
        _ = ping_task => {}
    }

    dispatcher.hub.unregister(client_id);
    info!(client_id, "websocket client disconnected");
}
