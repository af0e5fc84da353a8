use axum::{extract::State, Json};
use shared::{CompanyStats, UserOverview};

use super::auth::Caller;
use crate::{error::AppError, state::AppState};

fn require_platform_admin(state: &AppState, caller: &Caller) -> Result<(), AppError> {
    if state.config.is_platform_admin(&caller.profile.email) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Platform administrators only".to_string()))
    }
}

/// GET /admin/companies
pub async fn companies(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<CompanyStats>>, AppError> {
    require_platform_admin(&state, &caller)?;
    Ok(Json(state.db.company_stats().await?))
}

/// GET /admin/users
pub async fn users(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<UserOverview>>, AppError> {
    require_platform_admin(&state, &caller)?;
    Ok(Json(state.db.user_overview().await?))
}
