use axum::{
    extract::{Path, State},
    Json,
};
use shared::{Profile, ProfilePatch, RowChange, Table};
use uuid::Uuid;

use super::auth::Caller;
use crate::{error::AppError, state::AppState};

/// GET /profiles
pub async fn list(State(state): State<AppState>, caller: Caller) -> Result<Json<Vec<Profile>>, AppError> {
    let company_id = caller.company_id()?;
    Ok(Json(state.db.list_profiles(company_id).await?))
}

/// PATCH /profiles/:id
pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<Profile>, AppError> {
    let company_id = caller.company_id()?;
    if id != caller.user_id || patch.role_id.is_some() {
        caller.require("users", "edit")?;
    }

    let mut profile = state
        .db
        .get_profile(id)
        .await?
        .filter(|profile| profile.company_id == Some(company_id))
        .ok_or(AppError::NotFound("Profile"))?;

    if let Some(full_name) = patch.full_name {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(AppError::BadRequest("full_name cannot be empty".to_string()));
        }
        profile.full_name = full_name.to_string();
    }
    if let Some(role_id) = patch.role_id {
        let role = state.db.get_role(role_id).await?.ok_or(AppError::NotFound("Role"))?;
        if !role.is_system_role && role.company_id != Some(company_id) {
            return Err(AppError::Forbidden("Role belongs to another company".to_string()));
        }
        profile.role_id = Some(role_id);
    }

    state.db.update_profile(&profile).await?;
    state.publish(RowChange::update(Table::Profiles, Some(company_id), &profile));

    Ok(Json(profile))
}
