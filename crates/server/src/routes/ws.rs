use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use shared::{ClientToServer, ServerToClient};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::auth::{verify_token, Caller};
use crate::state::AppState;

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = Uuid::new_v4();

    // Unbounded so changes keep their commit order per connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerToClient>();
    state.realtime.register(connection_id, tx);

    // Task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode realtime message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    tracing::info!("Realtime client connected: {}", connection_id);

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        match serde_json::from_str::<ClientToServer>(&text) {
            Ok(msg) => handle_message(&state, connection_id, msg).await,
            Err(e) => {
                tracing::warn!("Failed to parse realtime message: {}", e);
                state
                    .realtime
                    .send(&connection_id, ServerToClient::error("Malformed message"));
            }
        }
    }

    // Cleanup
    state.realtime.unregister(&connection_id);
    send_task.abort();
    tracing::info!("Realtime client disconnected: {}", connection_id);
}

async fn handle_message(state: &AppState, connection_id: Uuid, msg: ClientToServer) {
    let hub = &state.realtime;
    match msg {
        ClientToServer::Authenticate { token } => {
            let caller = match verify_token(&token, &state.config.auth.jwt_secret) {
                Ok(user_id) => Caller::load(state, user_id).await,
                Err(e) => Err(e),
            };
            match caller {
                Ok(caller) => {
                    hub.authenticate(
                        &connection_id,
                        caller.user_id,
                        caller.profile.company_id,
                        caller.permissions.role_name.clone(),
                    );
                    hub.send(
                        &connection_id,
                        ServerToClient::Authenticated {
                            user_id: caller.user_id,
                        },
                    );
                    tracing::debug!("Realtime client {} authenticated as {}", connection_id, caller.user_id);
                }
                Err(e) => {
                    hub.send(
                        &connection_id,
                        ServerToClient::AuthenticationFailed {
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
        ClientToServer::Subscribe { channel, tables } => {
            match hub.subscribe(&connection_id, &channel, tables) {
                Ok(()) => {
                    hub.send(&connection_id, ServerToClient::Subscribed { channel });
                }
                Err(e) => {
                    tracing::warn!("Subscribe to {} refused: {}", channel, e);
                    hub.send(
                        &connection_id,
                        ServerToClient::SubscribeFailed {
                            channel,
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
        ClientToServer::Unsubscribe { channel } => {
            hub.unsubscribe(&connection_id, &channel);
            hub.send(&connection_id, ServerToClient::Unsubscribed { channel });
        }
        ClientToServer::Heartbeat => {
            hub.send(&connection_id, ServerToClient::Heartbeat);
        }
    }
}
