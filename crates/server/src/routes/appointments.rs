use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use shared::{
    schedule::blocking_block,
    visibility::{filter_visible, is_visible},
    Appointment, AppointmentDetails, AppointmentPatch, AppointmentStatus, NewAppointment, RowChange,
    Table,
};
use uuid::Uuid;

use super::auth::{ensure_member, Caller};
use crate::{error::AppError, state::AppState};

/// GET /appointments
pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<AppointmentDetails>>, AppError> {
    let company_id = caller.company_id()?;
    let appointments = state.db.list_appointment_details(company_id).await?;
    Ok(Json(filter_visible(appointments, caller.user_id, caller.role_name())))
}

/// POST /appointments
pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<NewAppointment>,
) -> Result<(StatusCode, Json<AppointmentDetails>), AppError> {
    caller.require("appointments", "create")?;
    let company_id = caller.company_id()?;

    if let Some(lead_id) = req.lead_id {
        if state.db.get_lead(company_id, lead_id).await?.is_none() {
            return Err(AppError::BadRequest("Lead does not belong to this company".to_string()));
        }
    }
    if let Some(assignee) = req.assigned_to {
        ensure_member(&state, company_id, assignee).await?;
    }
    ensure_slot_free(&state, company_id, req.assigned_to, req.date, req.time, req.duration).await?;

    let appointment = Appointment {
        id: Uuid::new_v4(),
        company_id,
        lead_id: req.lead_id,
        assigned_to: req.assigned_to,
        date: req.date,
        time: req.time,
        duration: req.duration,
        status: AppointmentStatus::Scheduled,
        notes: req.notes,
        created_at: Utc::now(),
    };
    state.db.insert_appointment(&appointment).await?;
    state.publish(RowChange::insert(Table::Appointments, Some(company_id), &appointment));

    let details = state
        .db
        .get_appointment_details(company_id, appointment.id)
        .await?
        .ok_or(AppError::NotFound("Appointment"))?;
    Ok((StatusCode::CREATED, Json(details)))
}

/// PATCH /appointments/:id
pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(patch): Json<AppointmentPatch>,
) -> Result<Json<AppointmentDetails>, AppError> {
    caller.require("appointments", "edit")?;
    let company_id = caller.company_id()?;

    let mut appointment = state
        .db
        .get_appointment(company_id, id)
        .await?
        .filter(|a| is_visible(a.assigned_to, caller.user_id, caller.role_name()))
        .ok_or(AppError::NotFound("Appointment"))?;

    let moved = patch.date.is_some()
        || patch.time.is_some()
        || patch.duration.is_some()
        || patch.assigned_to.is_some();

    if let Some(assigned_to) = patch.assigned_to {
        if let Some(assignee) = assigned_to {
            ensure_member(&state, company_id, assignee).await?;
        }
        appointment.assigned_to = assigned_to;
    }
    if let Some(date) = patch.date {
        appointment.date = date;
    }
    if let Some(time) = patch.time {
        appointment.time = time;
    }
    if let Some(duration) = patch.duration {
        appointment.duration = duration;
    }
    if let Some(status) = patch.status {
        appointment.status = status;
    }
    if let Some(notes) = patch.notes {
        appointment.notes = notes;
    }

    if moved {
        ensure_slot_free(
            &state,
            company_id,
            appointment.assigned_to,
            appointment.date,
            appointment.time,
            appointment.duration,
        )
        .await?;
    }

    state.db.update_appointment(&appointment).await?;
    state.publish(RowChange::update(Table::Appointments, Some(company_id), &appointment));

    let details = state
        .db
        .get_appointment_details(company_id, id)
        .await?
        .ok_or(AppError::NotFound("Appointment"))?;
    Ok(Json(details))
}

/// DELETE /appointments/:id
pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require("appointments", "delete")?;
    let company_id = caller.company_id()?;

    let appointment = state
        .db
        .get_appointment(company_id, id)
        .await?
        .ok_or(AppError::NotFound("Appointment"))?;

    if state.db.delete_appointment(company_id, id).await? {
        state.publish(RowChange::delete(Table::Appointments, Some(company_id), &appointment));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Rejects a slot that collides with one of the assignee's schedule blocks
async fn ensure_slot_free(
    state: &AppState,
    company_id: Uuid,
    assignee: Option<Uuid>,
    date: NaiveDate,
    time: NaiveTime,
    duration: i64,
) -> Result<(), AppError> {
    let duration = u32::try_from(duration)
        .ok()
        .filter(|minutes| *minutes > 0)
        .ok_or_else(|| AppError::BadRequest("Duration must be a positive number of minutes".to_string()))?;

    let Some(user_id) = assignee else {
        return Ok(());
    };

    let blocks = state.db.list_schedule_blocks(company_id, Some(user_id)).await?;
    match blocking_block(date, Some(time), duration, user_id, &blocks) {
        Some(block) => Err(AppError::Conflict(format!(
            "Time is blocked for this user{}",
            block
                .reason
                .as_deref()
                .map(|reason| format!(": {}", reason))
                .unwrap_or_default()
        ))),
        None => Ok(()),
    }
}
