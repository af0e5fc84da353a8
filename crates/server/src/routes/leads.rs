use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use shared::{
    visibility::{filter_visible, is_visible},
    Lead, LeadPatch, NewLead, RowChange, Table,
};
use uuid::Uuid;

use super::auth::{ensure_member, Caller};
use crate::{error::AppError, state::AppState};

const DEFAULT_STATUS: &str = "new";

/// GET /leads
pub async fn list(State(state): State<AppState>, caller: Caller) -> Result<Json<Vec<Lead>>, AppError> {
    let company_id = caller.company_id()?;
    let leads = state.db.list_leads(company_id).await?;
    Ok(Json(filter_visible(leads, caller.user_id, caller.role_name())))
}

/// POST /leads
pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<NewLead>,
) -> Result<(StatusCode, Json<Lead>), AppError> {
    caller.require("leads", "create")?;
    let company_id = caller.company_id()?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Lead name is required".to_string()));
    }
    if let Some(assignee) = req.assigned_to {
        ensure_member(&state, company_id, assignee).await?;
    }

    let now = Utc::now();
    let lead = Lead {
        id: Uuid::new_v4(),
        company_id,
        name: name.to_string(),
        email: req.email,
        phone: req.phone,
        source: req.source,
        notes: req.notes,
        status: req.status.unwrap_or_else(|| DEFAULT_STATUS.to_string()),
        assigned_to: req.assigned_to,
        created_at: now,
        updated_at: now,
    };
    state.db.insert_lead(&lead).await?;
    state.publish(RowChange::insert(Table::Leads, Some(company_id), &lead));

    tracing::debug!("Lead {} created by {}", lead.id, caller.user_id);
    Ok((StatusCode::CREATED, Json(lead)))
}

/// PATCH /leads/:id
pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(patch): Json<LeadPatch>,
) -> Result<Json<Lead>, AppError> {
    caller.require("leads", "edit")?;
    let company_id = caller.company_id()?;

    let mut lead = state
        .db
        .get_lead(company_id, id)
        .await?
        .filter(|lead| is_visible(lead.assigned_to, caller.user_id, caller.role_name()))
        .ok_or(AppError::NotFound("Lead"))?;

    if let Some(name) = patch.name {
        lead.name = name;
    }
    if let Some(email) = patch.email {
        lead.email = email;
    }
    if let Some(phone) = patch.phone {
        lead.phone = phone;
    }
    if let Some(notes) = patch.notes {
        lead.notes = notes;
    }
    if let Some(status) = patch.status {
        lead.status = status;
    }
    if let Some(assigned_to) = patch.assigned_to {
        if let Some(assignee) = assigned_to {
            ensure_member(&state, company_id, assignee).await?;
        }
        lead.assigned_to = assigned_to;
    }
    lead.updated_at = Utc::now();

    state.db.update_lead(&lead).await?;
    state.publish(RowChange::update(Table::Leads, Some(company_id), &lead));

    Ok(Json(lead))
}

/// DELETE /leads/:id
pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require("leads", "delete")?;
    let company_id = caller.company_id()?;

    let lead = state
        .db
        .get_lead(company_id, id)
        .await?
        .ok_or(AppError::NotFound("Lead"))?;

    if state.db.delete_lead(company_id, id).await? {
        state.publish(RowChange::delete(Table::Leads, Some(company_id), &lead));
    }
    Ok(StatusCode::NO_CONTENT)
}
