use dashmap::DashMap;
use shared::visibility::is_visible;
use shared::{ChangeKind, FilterParseError, RowChange, RowFilter, ServerToClient, Table, TableSubscription};
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum HubError {
    #[error("connection is not authenticated")]
    NotAuthenticated,
    #[error("channel {0} is already subscribed")]
    ChannelTaken(String),
    #[error(transparent)]
    InvalidFilter(#[from] FilterParseError),
    #[error("unknown connection")]
    UnknownConnection,
}

/// Fans committed row changes out to subscribed realtime connections
pub struct RealtimeHub {
    /// Map of connection ID -> connection state
    connections: DashMap<Uuid, Connection>,
}

struct Connection {
    sender: mpsc::UnboundedSender<ServerToClient>,
    user_id: Option<Uuid>,
    company_id: Option<Uuid>,
    role_name: Option<String>,
    /// Map of channel name -> parsed subscriptions
    channels: HashMap<String, Vec<Subscription>>,
}

struct Subscription {
    target: TableSubscription,
    filter: Option<RowFilter>,
}

/// What a connection is allowed to receive for one change
enum Delivery {
    Full,
    /// The row moved out of the connection's view; only its id is sent
    Retract(RowChange),
    Skip,
}

impl Connection {
    fn delivery(&self, change: &RowChange) -> Delivery {
        if !matches!(change.table, Table::Leads | Table::Appointments) {
            return Delivery::Full;
        }
        let (Some(user_id), Some(role_name)) = (self.user_id, self.role_name.as_deref()) else {
            return Delivery::Full;
        };

        let assigned_to = change
            .row()
            .and_then(|row| row.get("assigned_to"))
            .and_then(|value| value.as_str())
            .and_then(|value| Uuid::parse_str(value).ok());
        if is_visible(assigned_to, user_id, role_name) {
            return Delivery::Full;
        }

        match change.kind {
            ChangeKind::Update => change.retraction().map_or(Delivery::Skip, Delivery::Retract),
            ChangeKind::Insert | ChangeKind::Delete => Delivery::Skip,
        }
    }
}

impl Subscription {
    /// Table and row filter only; the event kind is checked by the caller
    fn selects(&self, change: &RowChange) -> bool {
        if self.target.table != change.table {
            return false;
        }
        match (&self.filter, change.row()) {
            (None, _) => true,
            (Some(filter), Some(row)) => filter.matches(row),
            (Some(_), None) => false,
        }
    }
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn register(&self, connection_id: Uuid, sender: mpsc::UnboundedSender<ServerToClient>) {
        self.connections.insert(
            connection_id,
            Connection {
                sender,
                user_id: None,
                company_id: None,
                role_name: None,
                channels: HashMap::new(),
            },
        );
        tracing::info!("Realtime connection registered: {}", connection_id);
    }

    pub fn authenticate(
        &self,
        connection_id: &Uuid,
        user_id: Uuid,
        company_id: Option<Uuid>,
        role_name: Option<String>,
    ) -> bool {
        match self.connections.get_mut(connection_id) {
            Some(mut connection) => {
                connection.user_id = Some(user_id);
                connection.company_id = company_id;
                connection.role_name = role_name;
                true
            }
            None => false,
        }
    }

    /// Drops the connection together with every channel it opened
    pub fn unregister(&self, connection_id: &Uuid) {
        if let Some((_, connection)) = self.connections.remove(connection_id) {
            tracing::info!(
                "Realtime connection unregistered: {} ({} channels released)",
                connection_id,
                connection.channels.len()
            );
        }
    }

    pub fn subscribe(
        &self,
        connection_id: &Uuid,
        channel: &str,
        tables: Vec<TableSubscription>,
    ) -> Result<(), HubError> {
        let mut connection = self
            .connections
            .get_mut(connection_id)
            .ok_or(HubError::UnknownConnection)?;

        if connection.user_id.is_none() {
            return Err(HubError::NotAuthenticated);
        }
        if connection.channels.contains_key(channel) {
            return Err(HubError::ChannelTaken(channel.to_string()));
        }

        let subscriptions = tables
            .into_iter()
            .map(|table| {
                let filter = table.row_filter()?;
                Ok(Subscription { target: table, filter })
            })
            .collect::<Result<Vec<_>, FilterParseError>>()?;

        connection.channels.insert(channel.to_string(), subscriptions);
        tracing::debug!("Connection {} subscribed channel {}", connection_id, channel);
        Ok(())
    }

    pub fn unsubscribe(&self, connection_id: &Uuid, channel: &str) -> bool {
        self.connections
            .get_mut(connection_id)
            .map(|mut connection| connection.channels.remove(channel).is_some())
            .unwrap_or(false)
    }

    pub fn send(&self, connection_id: &Uuid, msg: ServerToClient) -> bool {
        self.connections
            .get(connection_id)
            .map(|connection| connection.sender.send(msg).is_ok())
            .unwrap_or(false)
    }

    /// Deliver a change to every matching channel of the change's tenant,
    /// hiding rows the connection's role may not see; returns the number of
    /// channels reached
    pub fn publish(&self, change: RowChange) -> usize {
        let mut delivered = 0;
        for entry in self.connections.iter() {
            let connection = entry.value();
            if connection.user_id.is_none() {
                continue;
            }
            if change.company_id.is_some() && connection.company_id != change.company_id {
                continue;
            }

            let retraction;
            let outgoing = match connection.delivery(&change) {
                Delivery::Full => &change,
                Delivery::Retract(hidden) => {
                    retraction = hidden;
                    &retraction
                }
                Delivery::Skip => continue,
            };

            for (channel, subscriptions) in &connection.channels {
                // Filters run against the full row, the event kind against what is sent
                if !subscriptions
                    .iter()
                    .any(|sub| sub.selects(&change) && sub.target.event.matches(outgoing.kind))
                {
                    continue;
                }
                let msg = ServerToClient::Change {
                    channel: channel.clone(),
                    change: outgoing.clone(),
                };
                if connection.sender.send(msg).is_ok() {
                    delivered += 1;
                }
            }
        }
        tracing::debug!(
            "Published {} {:?} to {} channels",
            change.table,
            change.kind,
            delivered
        );
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}
