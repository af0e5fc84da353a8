//! Realtime socket client: one connection, many named channels.

use futures::{SinkExt, StreamExt};
use shared::{ClientToServer, RowChange, ServerToClient, TableSubscription};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use crate::sync::{ChangeStream, SyncError};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open channels and the subscriptions still waiting for the server's answer
#[derive(Default)]
struct Channels {
    routes: HashMap<String, mpsc::UnboundedSender<RowChange>>,
    pending: HashMap<String, oneshot::Sender<Result<(), String>>>,
}

impl Channels {
    fn release(&mut self, channel: &str) {
        self.routes.remove(channel);
        self.pending.remove(channel);
    }
}

type SharedChannels = Arc<Mutex<Channels>>;

fn lock(channels: &SharedChannels) -> std::sync::MutexGuard<'_, Channels> {
    channels.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RealtimeClient {
    user_id: Uuid,
    outbound: mpsc::UnboundedSender<ClientToServer>,
    channels: SharedChannels,
    tasks: Vec<JoinHandle<()>>,
}

impl RealtimeClient {
    /// Connect and authenticate; returns once the server accepted the token
    pub async fn connect(server_url: &str, token: &str) -> Result<Self, SyncError> {
        let ws_url = ws_endpoint(server_url);
        tracing::info!("Connecting to {}...", ws_url);

        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let auth = serde_json::to_string(&ClientToServer::Authenticate {
            token: token.to_string(),
        })?;
        ws_sender
            .send(Message::Text(auth))
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let user_id = loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerToClient>(&text)? {
                    ServerToClient::Authenticated { user_id } => break user_id,
                    ServerToClient::AuthenticationFailed { reason } => {
                        return Err(SyncError::Api {
                            status: 401,
                            message: reason,
                        });
                    }
                    _ => continue,
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(SyncError::Transport(
                        "connection closed during authentication".to_string(),
                    ));
                }
                Some(Err(e)) => return Err(SyncError::Transport(e.to_string())),
                Some(Ok(_)) => continue,
            }
        };
        tracing::info!("Realtime connection authenticated as {}", user_id);

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientToServer>();
        let channels: SharedChannels = Arc::new(Mutex::new(Channels::default()));

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode realtime message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let reader_channels = channels.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerToClient>(&text) {
                        Ok(msg) => handle_message(&mut lock(&reader_channels), msg),
                        Err(e) => tracing::warn!("Unreadable realtime message: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Realtime connection error: {}", e);
                        break;
                    }
                }
            }
            tracing::info!("Realtime connection closed");
            // Ends every open change stream and fails pending subscriptions
            let mut channels = lock(&reader_channels);
            channels.routes.clear();
            channels.pending.clear();
        });

        let heartbeat_tx = outbound.clone();
        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if heartbeat_tx.send(ClientToServer::Heartbeat).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            user_id,
            outbound,
            channels,
            tasks: vec![writer, reader, heartbeat],
        })
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Open a channel; returns once the server confirmed it
    pub async fn subscribe(
        &self,
        channel: &str,
        tables: Vec<TableSubscription>,
    ) -> Result<ChangeStream, SyncError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (confirm_tx, confirm_rx) = oneshot::channel();
        {
            let mut channels = lock(&self.channels);
            if channels.routes.contains_key(channel) {
                return Err(SyncError::ChannelOpen(channel.to_string()));
            }
            channels.routes.insert(channel.to_string(), tx);
            channels.pending.insert(channel.to_string(), confirm_tx);
        }

        let msg = ClientToServer::Subscribe {
            channel: channel.to_string(),
            tables,
        };
        if self.outbound.send(msg).is_err() {
            lock(&self.channels).release(channel);
            return Err(SyncError::Transport("realtime connection closed".to_string()));
        }

        let outcome = await_confirmation(channel, confirm_rx, SUBSCRIBE_TIMEOUT).await;
        if outcome.is_err() {
            lock(&self.channels).release(channel);
        }
        outcome.map(|()| rx)
    }

    pub async fn unsubscribe(&self, channel: &str) -> Result<(), SyncError> {
        lock(&self.channels).release(channel);
        self.outbound
            .send(ClientToServer::Unsubscribe {
                channel: channel.to_string(),
            })
            .map_err(|_| SyncError::Transport("realtime connection closed".to_string()))
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Realtime endpoint for a configured server url
fn ws_endpoint(server_url: &str) -> String {
    let base = server_url
        .trim_end_matches('/')
        .replace("http://", "ws://")
        .replace("https://", "wss://");
    format!("{}/ws", base)
}

/// Route one server frame to the channel it concerns
fn handle_message(channels: &mut Channels, msg: ServerToClient) {
    match msg {
        ServerToClient::Change { channel, change } => {
            if !dispatch(&channels.routes, &channel, change) {
                tracing::debug!("Dropped change for closed channel {}", channel);
            }
        }
        ServerToClient::Subscribed { channel } => {
            tracing::debug!("Channel {} open", channel);
            if let Some(confirm) = channels.pending.remove(&channel) {
                let _ = confirm.send(Ok(()));
            }
        }
        ServerToClient::SubscribeFailed { channel, reason } => {
            tracing::warn!("Channel {} refused: {}", channel, reason);
            channels.routes.remove(&channel);
            if let Some(confirm) = channels.pending.remove(&channel) {
                let _ = confirm.send(Err(reason));
            }
        }
        ServerToClient::Error { message } => {
            tracing::warn!("Realtime error: {}", message);
        }
        _ => {}
    }
}

async fn await_confirmation(
    channel: &str,
    confirm: oneshot::Receiver<Result<(), String>>,
    timeout: Duration,
) -> Result<(), SyncError> {
    match tokio::time::timeout(timeout, confirm).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(reason))) => Err(SyncError::SubscribeRefused {
            channel: channel.to_string(),
            reason,
        }),
        Ok(Err(_)) => Err(SyncError::Transport("realtime connection closed".to_string())),
        Err(_) => Err(SyncError::Transport(format!("no answer for channel {}", channel))),
    }
}

/// Hand a change to its channel's stream; false if nobody is listening
fn dispatch(
    routes: &HashMap<String, mpsc::UnboundedSender<RowChange>>,
    channel: &str,
    change: RowChange,
) -> bool {
    routes
        .get(channel)
        .map(|tx| tx.send(change).is_ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::Table;

    #[test]
    fn test_ws_endpoint() {
        assert_eq!(ws_endpoint("http://localhost:8080"), "ws://localhost:8080/ws");
        assert_eq!(ws_endpoint("https://crm.example.com/"), "wss://crm.example.com/ws");
        assert_eq!(ws_endpoint("ws://localhost:8080"), "ws://localhost:8080/ws");
    }

    #[test]
    fn test_dispatch_routes_by_channel() {
        let (leads_tx, mut leads_rx) = mpsc::unbounded_channel();
        let (blocks_tx, mut blocks_rx) = mpsc::unbounded_channel();
        let mut routes = HashMap::new();
        routes.insert("leads-1".to_string(), leads_tx);
        routes.insert("blocks-1".to_string(), blocks_tx);

        let change = RowChange::insert(Table::Leads, None, &json!({"id": "x"})).unwrap();
        assert!(dispatch(&routes, "leads-1", change.clone()));
        assert!(!dispatch(&routes, "unknown", change.clone()));

        assert_eq!(leads_rx.try_recv().unwrap(), change);
        assert!(blocks_rx.try_recv().is_err());
    }

    #[test]
    fn test_refused_subscription_drops_its_route() {
        let mut channels = Channels::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (confirm_tx, mut confirm_rx) = oneshot::channel();
        channels.routes.insert("leads-1".to_string(), tx);
        channels.pending.insert("leads-1".to_string(), confirm_tx);

        handle_message(
            &mut channels,
            ServerToClient::SubscribeFailed {
                channel: "leads-1".to_string(),
                reason: "connection is not authenticated".to_string(),
            },
        );

        assert_eq!(
            confirm_rx.try_recv().unwrap(),
            Err("connection is not authenticated".to_string())
        );
        assert!(channels.routes.is_empty());
        assert!(channels.pending.is_empty());
        // The stream ends instead of waiting forever
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }

    #[test]
    fn test_confirmed_subscription_keeps_its_route() {
        let mut channels = Channels::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (confirm_tx, mut confirm_rx) = oneshot::channel();
        channels.routes.insert("leads-1".to_string(), tx);
        channels.pending.insert("leads-1".to_string(), confirm_tx);

        handle_message(
            &mut channels,
            ServerToClient::Subscribed {
                channel: "leads-1".to_string(),
            },
        );
        assert_eq!(confirm_rx.try_recv().unwrap(), Ok(()));

        let change = RowChange::insert(Table::Leads, None, &json!({"id": "x"})).unwrap();
        handle_message(
            &mut channels,
            ServerToClient::Change {
                channel: "leads-1".to_string(),
                change: change.clone(),
            },
        );
        assert_eq!(rx.try_recv().unwrap(), change);
    }

    #[tokio::test]
    async fn test_confirmation_outcomes() {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err("channel leads-1 is already subscribed".to_string()));
        let refused = await_confirmation("leads-1", rx, Duration::from_secs(1)).await;
        assert!(matches!(
            refused,
            Err(SyncError::SubscribeRefused { ref channel, .. }) if channel == "leads-1"
        ));

        let (tx, rx) = oneshot::channel::<Result<(), String>>();
        drop(tx);
        let closed = await_confirmation("leads-1", rx, Duration::from_secs(1)).await;
        assert!(matches!(closed, Err(SyncError::Transport(_))));

        let (_tx, rx) = oneshot::channel::<Result<(), String>>();
        let silent = await_confirmation("leads-1", rx, Duration::from_millis(10)).await;
        assert!(matches!(silent, Err(SyncError::Transport(_))));
    }

    #[test]
    fn test_dispatch_to_dropped_stream() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut routes = HashMap::new();
        routes.insert("leads-1".to_string(), tx);

        let change = RowChange::insert(Table::Leads, None, &json!({"id": "x"})).unwrap();
        assert!(!dispatch(&routes, "leads-1", change));
    }
}
