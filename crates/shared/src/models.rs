use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::permissions::PermissionMap;

// ============================================================================
// Tenancy
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One per authenticated user; `id` is the auth user id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Either a system-wide role (`company_id` is null) or a company-scoped one
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[cfg_attr(feature = "db", sqlx(json))]
    pub permissions: PermissionMap,
    pub is_system_role: bool,
    pub company_id: Option<Uuid>,
}

// ============================================================================
// Leads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Lead {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub status: String,
    pub assigned_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Appointments
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type), sqlx(rename_all = "snake_case"))]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Appointment {
    pub id: Uuid,
    pub company_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// Minutes
    pub duration: i64,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Appointment joined with its lead and assignee at fetch time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct AppointmentDetails {
    #[serde(flatten)]
    #[cfg_attr(feature = "db", sqlx(flatten))]
    pub appointment: Appointment,
    pub lead_name: Option<String>,
    pub assignee_name: Option<String>,
}

// ============================================================================
// Meetings
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type), sqlx(rename_all = "snake_case"))]
pub enum MeetingStatus {
    #[default]
    Scheduled,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Meeting {
    pub id: Uuid,
    pub company_id: Uuid,
    pub title: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration: i64,
    pub status: MeetingStatus,
    pub organizer_id: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct MeetingParticipant {
    pub meeting_id: Uuid,
    pub profile_id: Uuid,
}

/// Meeting with the participant ids from the join table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeetingDetails {
    #[serde(flatten)]
    pub meeting: Meeting,
    #[serde(default)]
    pub participants: Vec<Uuid>,
}

// ============================================================================
// Schedule blocks
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type), sqlx(rename_all = "snake_case"))]
pub enum BlockType {
    TimeSlot,
    FullDay,
}

/// A user-defined interval of unavailability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct ScheduleBlock {
    pub id: Uuid,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub block_type: BlockType,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reason: Option<String>,
    pub is_recurring: bool,
    pub recurring_pattern: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Pipelines
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Pipeline {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct PipelineColumn {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    pub color: String,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineDetails {
    #[serde(flatten)]
    pub pipeline: Pipeline,
    #[serde(default)]
    pub columns: Vec<PipelineColumn>,
}

// ============================================================================
// Invitations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Invitation {
    pub id: Uuid,
    pub email: String,
    pub role_id: Uuid,
    pub company_id: Uuid,
    pub invited_by: Uuid,
    #[serde(skip_serializing, default)]
    pub token: String,
    pub sent_via_email: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

// ============================================================================
// Analytics
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct CompanyStats {
    pub company_id: Uuid,
    pub name: String,
    pub user_count: i64,
    pub lead_count: i64,
    pub appointment_count: i64,
    pub meeting_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct UserOverview {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub company_id: Option<Uuid>,
    pub company_name: Option<String>,
    pub role_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_appointment_details_flattens_appointment() {
        let details = AppointmentDetails {
            appointment: Appointment {
                id: Uuid::new_v4(),
                company_id: Uuid::new_v4(),
                lead_id: None,
                assigned_to: None,
                date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                duration: 45,
                status: AppointmentStatus::NoShow,
                notes: None,
                created_at: Utc::now(),
            },
            lead_name: Some("Maria".to_string()),
            assignee_name: None,
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["duration"], 45);
        assert_eq!(json["status"], "no_show");
        assert_eq!(json["lead_name"], "Maria");
        assert_eq!(json["date"], "2026-03-02");

        let back: AppointmentDetails = serde_json::from_value(json).unwrap();
        assert_eq!(back, details);
    }

    #[test]
    fn test_invitation_token_is_not_serialized() {
        let invitation = Invitation {
            id: Uuid::new_v4(),
            email: "new@example.com".to_string(),
            role_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            invited_by: Uuid::new_v4(),
            token: "secret".to_string(),
            sent_via_email: false,
            used_at: None,
            expires_at: Utc::now(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&invitation).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_invitation_usability() {
        let now = Utc::now();
        let mut invitation = Invitation {
            id: Uuid::new_v4(),
            email: "new@example.com".to_string(),
            role_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            invited_by: Uuid::new_v4(),
            token: "t".to_string(),
            sent_via_email: true,
            used_at: None,
            expires_at: now + Duration::days(7),
            created_at: now,
        };
        assert!(invitation.is_usable(now));

        invitation.used_at = Some(now);
        assert!(!invitation.is_usable(now));

        invitation.used_at = None;
        invitation.expires_at = now - Duration::seconds(1);
        assert!(!invitation.is_usable(now));
    }

    #[test]
    fn test_block_type_serialization() {
        assert_eq!(serde_json::to_string(&BlockType::FullDay).unwrap(), "\"full_day\"");
        let parsed: BlockType = serde_json::from_str("\"time_slot\"").unwrap();
        assert_eq!(parsed, BlockType::TimeSlot);
    }
}
