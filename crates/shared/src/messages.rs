use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Tables and change kinds
// ============================================================================

/// Backend tables a client can read and subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Leads,
    Appointments,
    Meetings,
    MeetingParticipants,
    ScheduleBlocks,
    Profiles,
    Roles,
    Pipelines,
    PipelineColumns,
    Invitations,
    CompanyRolePermissions,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Leads => "leads",
            Table::Appointments => "appointments",
            Table::Meetings => "meetings",
            Table::MeetingParticipants => "meeting_participants",
            Table::ScheduleBlocks => "schedule_blocks",
            Table::Profiles => "profiles",
            Table::Roles => "roles",
            Table::Pipelines => "pipelines",
            Table::PipelineColumns => "pipeline_columns",
            Table::Invitations => "invitations",
            Table::CompanyRolePermissions => "company_role_permissions",
        }
    }

    /// REST collection path served for this table
    pub fn path(&self) -> &'static str {
        match self {
            Table::Leads => "/leads",
            Table::Appointments => "/appointments",
            Table::Meetings => "/meetings",
            Table::MeetingParticipants => "/meetings",
            Table::ScheduleBlocks => "/schedule-blocks",
            Table::Profiles => "/profiles",
            Table::Roles => "/roles",
            Table::Pipelines => "/pipelines",
            Table::PipelineColumns => "/pipeline-columns",
            Table::Invitations => "/invitations",
            Table::CompanyRolePermissions => "/permissions",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which change kinds a subscription wants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFilter {
    #[default]
    #[serde(rename = "*")]
    All,
    Insert,
    Update,
    Delete,
}

impl EventFilter {
    pub fn matches(&self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (EventFilter::All, _)
                | (EventFilter::Insert, ChangeKind::Insert)
                | (EventFilter::Update, ChangeKind::Update)
                | (EventFilter::Delete, ChangeKind::Delete)
        )
    }
}

// ============================================================================
// Row filters
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterParseError {
    #[error("filter must look like <column>=eq.<value>: {0}")]
    Malformed(String),
    #[error("unsupported filter operator: {0}")]
    UnsupportedOperator(String),
}

/// Column equality predicate, written `company_id=eq.<id>` on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, FilterParseError> {
        let (column, predicate) = raw
            .split_once('=')
            .ok_or_else(|| FilterParseError::Malformed(raw.to_string()))?;
        let (operator, value) = predicate
            .split_once('.')
            .ok_or_else(|| FilterParseError::Malformed(raw.to_string()))?;
        if column.is_empty() {
            return Err(FilterParseError::Malformed(raw.to_string()));
        }
        if operator != "eq" {
            return Err(FilterParseError::UnsupportedOperator(operator.to_string()));
        }
        Ok(Self::eq(column, value))
    }

    /// Compare against the column of a JSON row
    pub fn matches(&self, record: &serde_json::Value) -> bool {
        match record.get(&self.column) {
            Some(serde_json::Value::String(s)) => *s == self.value,
            Some(serde_json::Value::Null) | None => self.value == "null",
            Some(other) => other.to_string() == self.value,
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// One table a channel listens to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSubscription {
    pub table: Table,
    #[serde(default)]
    pub event: EventFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl TableSubscription {
    pub fn all(table: Table) -> Self {
        Self {
            table,
            event: EventFilter::All,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter.to_string());
        self
    }

    pub fn row_filter(&self) -> Result<Option<RowFilter>, FilterParseError> {
        self.filter.as_deref().map(RowFilter::parse).transpose()
    }
}

// ============================================================================
// Row changes
// ============================================================================

/// A single committed row change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub table: Table,
    pub kind: ChangeKind,
    pub company_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<serde_json::Value>,
    pub commit_timestamp: DateTime<Utc>,
}

impl RowChange {
    fn new(
        table: Table,
        kind: ChangeKind,
        company_id: Option<Uuid>,
        record: Option<serde_json::Value>,
        old_record: Option<serde_json::Value>,
    ) -> Self {
        Self {
            table,
            kind,
            company_id,
            record,
            old_record,
            commit_timestamp: Utc::now(),
        }
    }

    pub fn insert<T: Serialize>(
        table: Table,
        company_id: Option<Uuid>,
        record: &T,
    ) -> Result<Self, serde_json::Error> {
        let record = serde_json::to_value(record)?;
        Ok(Self::new(table, ChangeKind::Insert, company_id, Some(record), None))
    }

    pub fn update<T: Serialize>(
        table: Table,
        company_id: Option<Uuid>,
        record: &T,
    ) -> Result<Self, serde_json::Error> {
        let record = serde_json::to_value(record)?;
        Ok(Self::new(table, ChangeKind::Update, company_id, Some(record), None))
    }

    /// Deletes carry the removed row as `old_record`
    pub fn delete<T: Serialize>(
        table: Table,
        company_id: Option<Uuid>,
        old_record: &T,
    ) -> Result<Self, serde_json::Error> {
        let old_record = serde_json::to_value(old_record)?;
        Ok(Self::new(table, ChangeKind::Delete, company_id, None, Some(old_record)))
    }

    /// The row this change is about (new row, or old row for deletes)
    pub fn row(&self) -> Option<&serde_json::Value> {
        self.record.as_ref().or(self.old_record.as_ref())
    }

    pub fn row_id(&self) -> Option<Uuid> {
        self.row()
            .and_then(|row| row.get("id"))
            .and_then(|id| id.as_str())
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    /// A delete carrying only the row id, for listeners that may no longer see the row
    pub fn retraction(&self) -> Option<Self> {
        let id = self.row_id()?;
        Some(Self {
            table: self.table,
            kind: ChangeKind::Delete,
            company_id: self.company_id,
            record: None,
            old_record: Some(serde_json::json!({ "id": id })),
            commit_timestamp: self.commit_timestamp,
        })
    }
}

// ============================================================================
// Client <-> Server realtime messages
// ============================================================================

/// Messages sent from a client to the realtime endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientToServer {
    /// Authenticate the socket with a JWT
    Authenticate { token: String },

    /// Open a named channel listening to one or more tables
    Subscribe {
        channel: String,
        tables: Vec<TableSubscription>,
    },

    /// Release a channel
    Unsubscribe { channel: String },

    /// Keep the connection alive
    Heartbeat,
}

/// Messages sent from the realtime endpoint to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToClient {
    Authenticated { user_id: Uuid },

    AuthenticationFailed { reason: String },

    Subscribed { channel: String },

    /// The channel was not opened; nothing will be delivered on it
    SubscribeFailed { channel: String, reason: String },

    Unsubscribed { channel: String },

    /// A row change matching one of the channel's subscriptions
    Change { channel: String, change: RowChange },

    Error { message: String },

    Heartbeat,
}

impl ServerToClient {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_serialization() {
        let company = Uuid::new_v4();
        let msg = ClientToServer::Subscribe {
            channel: "leads-abc-1".to_string(),
            tables: vec![TableSubscription::all(Table::Leads)
                .with_filter(RowFilter::eq("company_id", company))],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"subscribe\""));
        assert!(json.contains("\"event\":\"*\""));
        assert!(json.contains(&format!("company_id=eq.{}", company)));

        let deserialized: ClientToServer = serde_json::from_str(&json).unwrap();
        match deserialized {
            ClientToServer::Subscribe { channel, tables } => {
                assert_eq!(channel, "leads-abc-1");
                assert_eq!(tables[0].table, Table::Leads);
                let filter = tables[0].row_filter().unwrap().unwrap();
                assert_eq!(filter.column, "company_id");
                assert_eq!(filter.value, company.to_string());
            }
            _ => panic!("Expected Subscribe variant"),
        }
    }

    #[test]
    fn test_subscription_event_defaults_to_all() {
        let sub: TableSubscription = serde_json::from_str(r#"{"table":"schedule_blocks"}"#).unwrap();
        assert_eq!(sub.event, EventFilter::All);
        assert_eq!(sub.table, Table::ScheduleBlocks);
        assert!(sub.row_filter().unwrap().is_none());
    }

    #[test]
    fn test_event_filter_matching() {
        assert!(EventFilter::All.matches(ChangeKind::Delete));
        assert!(EventFilter::Insert.matches(ChangeKind::Insert));
        assert!(!EventFilter::Insert.matches(ChangeKind::Update));
        assert!(!EventFilter::Delete.matches(ChangeKind::Insert));
    }

    #[test]
    fn test_row_filter_parse_errors() {
        assert!(matches!(
            RowFilter::parse("company_id"),
            Err(FilterParseError::Malformed(_))
        ));
        assert!(matches!(
            RowFilter::parse("company_id=gt.5"),
            Err(FilterParseError::UnsupportedOperator(op)) if op == "gt"
        ));
        assert!(RowFilter::parse("=eq.5").is_err());
    }

    #[test]
    fn test_row_filter_matches_json_values() {
        let row = json!({"company_id": "c1", "position": 3, "assigned_to": null});
        assert!(RowFilter::parse("company_id=eq.c1").unwrap().matches(&row));
        assert!(!RowFilter::parse("company_id=eq.c2").unwrap().matches(&row));
        assert!(RowFilter::parse("position=eq.3").unwrap().matches(&row));
        assert!(RowFilter::parse("assigned_to=eq.null").unwrap().matches(&row));
        assert!(!RowFilter::parse("missing=eq.x").unwrap().matches(&row));
    }

    #[test]
    fn test_row_change_delete_carries_old_record() {
        let id = Uuid::new_v4();
        let change = RowChange::delete(Table::Leads, None, &json!({"id": id.to_string()})).unwrap();
        assert!(change.record.is_none());
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.row_id(), Some(id));

        let json = serde_json::to_string(&ServerToClient::Change {
            channel: "c".to_string(),
            change,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"change\""));
        assert!(json.contains("\"kind\":\"delete\""));
        assert!(!json.contains("\"record\""));
    }

    #[test]
    fn test_retraction_keeps_only_the_id() {
        let id = Uuid::new_v4();
        let company = Uuid::new_v4();
        let change = RowChange::update(
            Table::Leads,
            Some(company),
            &json!({"id": id.to_string(), "name": "Acme", "assigned_to": Uuid::new_v4().to_string()}),
        )
        .unwrap();

        let retraction = change.retraction().unwrap();
        assert_eq!(retraction.kind, ChangeKind::Delete);
        assert_eq!(retraction.company_id, Some(company));
        assert!(retraction.record.is_none());
        assert_eq!(retraction.old_record, Some(json!({"id": id.to_string()})));
        assert_eq!(retraction.row_id(), Some(id));

        let anonymous = RowChange::update(Table::Leads, None, &json!({"name": "x"})).unwrap();
        assert!(anonymous.retraction().is_none());
    }

    #[test]
    fn test_subscribe_failed_names_the_channel() {
        let msg = ServerToClient::SubscribeFailed {
            channel: "leads-1".to_string(),
            reason: "channel leads-1 is already subscribed".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"subscribe_failed\""));
        assert!(json.contains("\"channel\":\"leads-1\""));

        match serde_json::from_str::<ServerToClient>(&json).unwrap() {
            ServerToClient::SubscribeFailed { channel, .. } => assert_eq!(channel, "leads-1"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_table_names() {
        assert_eq!(Table::ScheduleBlocks.to_string(), "schedule_blocks");
        assert_eq!(Table::ScheduleBlocks.path(), "/schedule-blocks");
        let parsed: Table = serde_json::from_str("\"pipeline_columns\"").unwrap();
        assert_eq!(parsed, Table::PipelineColumns);
    }

    #[test]
    fn test_server_error_helper() {
        match ServerToClient::error("boom") {
            ServerToClient::Error { message } => assert_eq!(message, "boom"),
            _ => panic!("Expected Error variant"),
        }
    }
}
