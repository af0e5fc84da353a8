use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use shared::{
    permissions::{resolve_permissions, Permissions},
    NewRole, PermissionMap, Role, RolePatch, RowChange, Table,
};
use uuid::Uuid;

use super::auth::Caller;
use crate::{db::SYSTEM_ROLES, error::AppError, state::AppState};

/// GET /roles
pub async fn list(State(state): State<AppState>, caller: Caller) -> Result<Json<Vec<Role>>, AppError> {
    let company_id = caller.company_id()?;
    Ok(Json(state.db.list_roles(company_id).await?))
}

/// POST /roles
pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<NewRole>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    caller.require("settings", "edit")?;
    let company_id = caller.company_id()?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Role name is required".to_string()));
    }
    let taken = SYSTEM_ROLES.contains(&name)
        || state
            .db
            .list_roles(company_id)
            .await?
            .iter()
            .any(|role| role.name == name);
    if taken {
        return Err(AppError::Conflict(format!("Role {} already exists", name)));
    }

    let role = Role {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: req.description,
        permissions: req.permissions,
        is_system_role: false,
        company_id: Some(company_id),
    };
    state.db.insert_role(&role).await?;
    // Custom roles resolve through the company override table
    state
        .db
        .set_permission_override(company_id, &role.name, &role.permissions)
        .await?;
    state.publish(RowChange::insert(Table::Roles, Some(company_id), &role));

    Ok((StatusCode::CREATED, Json(role)))
}

/// PATCH /roles/:id
pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(patch): Json<RolePatch>,
) -> Result<Json<Role>, AppError> {
    caller.require("settings", "edit")?;
    let company_id = caller.company_id()?;
    let mut role = company_role(&state, company_id, id).await?;

    if let Some(description) = patch.description {
        role.description = Some(description);
    }
    if let Some(permissions) = patch.permissions {
        ensure_keeps_settings_access(&caller, &role.name, &permissions)?;
        role.permissions = permissions;
        state
            .db
            .set_permission_override(company_id, &role.name, &role.permissions)
            .await?;
        publish_override(&state, company_id, &role.name, &role.permissions);
    }

    state.db.update_role(&role).await?;
    state.publish(RowChange::update(Table::Roles, Some(company_id), &role));

    Ok(Json(role))
}

/// DELETE /roles/:id
pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require("settings", "edit")?;
    let company_id = caller.company_id()?;
    let role = company_role(&state, company_id, id).await?;

    if state.db.count_profiles_with_role(id).await? > 0 {
        return Err(AppError::Conflict("Role is still assigned to users".to_string()));
    }

    if state.db.delete_role(&role).await? {
        state.publish(RowChange::delete(Table::Roles, Some(company_id), &role));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// A mutable role of the caller's company; system roles never qualify
async fn company_role(state: &AppState, company_id: Uuid, id: Uuid) -> Result<Role, AppError> {
    let role = state.db.get_role(id).await?.ok_or(AppError::NotFound("Role"))?;
    if role.is_system_role {
        return Err(AppError::Forbidden("System roles cannot be modified".to_string()));
    }
    if role.company_id != Some(company_id) {
        return Err(AppError::NotFound("Role"));
    }
    Ok(role)
}

// ============================================================================
// Permissions
// ============================================================================

/// GET /permissions
pub async fn my_permissions(caller: Caller) -> Json<Permissions> {
    Json(caller.permissions)
}

/// PUT /permissions/:role_name
pub async fn set_permissions(
    State(state): State<AppState>,
    caller: Caller,
    Path(role_name): Path<String>,
    Json(map): Json<PermissionMap>,
) -> Result<Json<Permissions>, AppError> {
    caller.require("settings", "edit")?;
    let company_id = caller.company_id()?;

    let known = state
        .db
        .list_roles(company_id)
        .await?
        .iter()
        .any(|role| role.name == role_name);
    if !known {
        return Err(AppError::NotFound("Role"));
    }
    ensure_keeps_settings_access(&caller, &role_name, &map)?;

    state
        .db
        .set_permission_override(company_id, &role_name, &map)
        .await?;
    publish_override(&state, company_id, &role_name, &map);
    tracing::info!("Permissions of {} overridden for company {}", role_name, company_id);

    Ok(Json(resolve_permissions(Some(&role_name), Some(&map))))
}

/// A caller may not strip settings.edit from their own role
fn ensure_keeps_settings_access(caller: &Caller, role_name: &str, map: &PermissionMap) -> Result<(), AppError> {
    if role_name != caller.role_name() {
        return Ok(());
    }
    if resolve_permissions(Some(role_name), Some(map)).has_permission("settings", "edit") {
        Ok(())
    } else {
        Err(AppError::Conflict(
            "Removing settings.edit from your own role would lock you out".to_string(),
        ))
    }
}

fn publish_override(state: &AppState, company_id: Uuid, role_name: &str, map: &PermissionMap) {
    let row = json!({
        "company_id": company_id,
        "role_name": role_name,
        "permissions": map,
    });
    state.publish(RowChange::update(Table::CompanyRolePermissions, Some(company_id), &row));
}
