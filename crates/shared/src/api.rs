//! Request and response bodies of the HTTP API.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::{
    AppointmentStatus, BlockType, Company, Invitation, MeetingStatus, PermissionMap, Profile,
};

/// Distinguishes an absent field from an explicit `null`
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub invitation_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: Uuid,
}

/// Everything a client needs to scope its views
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub profile: Profile,
    pub role_name: Option<String>,
    pub company: Option<Company>,
    pub permissions: PermissionMap,
}

// ============================================================================
// Leads
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewLead {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub assigned_to: Option<Option<Uuid>>,
}

// ============================================================================
// Appointments
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAppointment {
    #[serde(default)]
    pub lead_id: Option<Uuid>,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub assigned_to: Option<Option<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

// ============================================================================
// Meetings
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMeeting {
    pub title: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    #[serde(default = "default_meeting_duration")]
    pub duration: i64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<Uuid>,
}

fn default_meeting_duration() -> i64 {
    60
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeetingPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MeetingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_ids: Option<Vec<Uuid>>,
}

// ============================================================================
// Schedule blocks
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduleBlock {
    /// Defaults to the caller
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub block_type: BlockType,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub recurring_pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockCheckRequest {
    pub user_id: Uuid,
    pub date: NaiveDate,
    #[serde(default)]
    pub time: Option<NaiveTime>,
    pub duration: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockCheckResponse {
    pub blocked: bool,
    pub block_id: Option<Uuid>,
}

// ============================================================================
// Profiles, roles, permissions
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: PermissionMap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionMap>,
}

// ============================================================================
// Pipelines
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPipeline {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPipelineColumn {
    pub name: String,
    #[serde(default = "default_column_color")]
    pub color: String,
    /// Appended after the last column when absent
    #[serde(default)]
    pub position: Option<i64>,
}

fn default_column_color() -> String {
    "#64748b".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineColumnPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

// ============================================================================
// Invitation function
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteUserRequest {
    pub email: String,
    pub role_id: Uuid,
    #[serde(default)]
    pub send_email: Option<bool>,
    #[serde(default)]
    pub redirect_to: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub create_with_password: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteUserResponse {
    pub success: bool,
    pub invitation: Option<Invitation>,
    pub user_id: Option<Uuid>,
    pub created_directly: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteUserFailure {
    pub success: bool,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lead_patch_distinguishes_null_from_absent() {
        let patch: LeadPatch = serde_json::from_str(r#"{"assigned_to": null}"#).unwrap();
        assert_eq!(patch.assigned_to, Some(None));
        assert_eq!(patch.email, None);

        let user = Uuid::new_v4();
        let patch: LeadPatch =
            serde_json::from_str(&format!(r#"{{"assigned_to": "{}"}}"#, user)).unwrap();
        assert_eq!(patch.assigned_to, Some(Some(user)));

        let patch: LeadPatch = serde_json::from_str("{}").unwrap();
        assert_eq!(patch.assigned_to, None);
    }

    #[test]
    fn test_lead_patch_serializes_explicit_unassign() {
        let patch = LeadPatch {
            assigned_to: Some(None),
            ..Default::default()
        };
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"assigned_to":null}"#);
    }

    #[test]
    fn test_invite_request_optional_fields() {
        let role = Uuid::new_v4();
        let req: InviteUserRequest =
            serde_json::from_str(&format!(r#"{{"email":"a@b.com","role_id":"{}"}}"#, role)).unwrap();
        assert_eq!(req.role_id, role);
        assert!(req.send_email.is_none());
        assert!(req.create_with_password.is_none());
    }
}
