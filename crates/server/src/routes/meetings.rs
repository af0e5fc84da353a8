use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use shared::{Meeting, MeetingDetails, MeetingPatch, MeetingStatus, NewMeeting, RowChange, Table};
use uuid::Uuid;

use super::auth::Caller;
use crate::{error::AppError, state::AppState};

/// GET /meetings
pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<MeetingDetails>>, AppError> {
    let company_id = caller.company_id()?;
    Ok(Json(state.db.list_meetings(company_id).await?))
}

/// POST /meetings
pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<NewMeeting>,
) -> Result<(StatusCode, Json<MeetingDetails>), AppError> {
    caller.require("meetings", "create")?;
    let company_id = caller.company_id()?;

    let title = req.title.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest("Meeting title is required".to_string()));
    }
    if req.duration <= 0 {
        return Err(AppError::BadRequest("Duration must be positive".to_string()));
    }

    let details = MeetingDetails {
        meeting: Meeting {
            id: Uuid::new_v4(),
            company_id,
            title: title.to_string(),
            date: req.date,
            time: req.time,
            duration: req.duration,
            status: MeetingStatus::Scheduled,
            organizer_id: caller.user_id,
            notes: req.notes,
            created_at: Utc::now(),
        },
        participants: dedup(req.participant_ids),
    };
    state.db.insert_meeting(&details).await?;
    state.publish(RowChange::insert(Table::Meetings, Some(company_id), &details.meeting));

    Ok((StatusCode::CREATED, Json(details)))
}

/// PATCH /meetings/:id
pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(patch): Json<MeetingPatch>,
) -> Result<Json<MeetingDetails>, AppError> {
    caller.require("meetings", "edit")?;
    let company_id = caller.company_id()?;

    let mut details = state
        .db
        .get_meeting(company_id, id)
        .await?
        .ok_or(AppError::NotFound("Meeting"))?;

    if let Some(title) = patch.title {
        details.meeting.title = title;
    }
    if let Some(date) = patch.date {
        details.meeting.date = date;
    }
    if let Some(time) = patch.time {
        details.meeting.time = time;
    }
    if let Some(status) = patch.status {
        details.meeting.status = status;
    }
    if let Some(participants) = patch.participant_ids {
        details.participants = dedup(participants);
    }

    state.db.update_meeting(&details).await?;
    state.publish(RowChange::update(Table::Meetings, Some(company_id), &details.meeting));

    Ok(Json(details))
}

/// DELETE /meetings/:id
pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require("meetings", "delete")?;
    let company_id = caller.company_id()?;

    let details = state
        .db
        .get_meeting(company_id, id)
        .await?
        .ok_or(AppError::NotFound("Meeting"))?;

    if state.db.delete_meeting(company_id, id).await? {
        state.publish(RowChange::delete(Table::Meetings, Some(company_id), &details.meeting));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn dedup(mut ids: Vec<Uuid>) -> Vec<Uuid> {
    ids.sort();
    ids.dedup();
    ids
}
