use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use shared::{
    schedule::blocking_block, BlockCheckRequest, BlockCheckResponse, BlockType, NewScheduleBlock,
    RowChange, ScheduleBlock, Table,
};
use uuid::Uuid;

use super::auth::{ensure_member, Caller};
use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct BlockQuery {
    pub user_id: Option<Uuid>,
}

/// GET /schedule-blocks
pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<BlockQuery>,
) -> Result<Json<Vec<ScheduleBlock>>, AppError> {
    let company_id = caller.company_id()?;
    Ok(Json(state.db.list_schedule_blocks(company_id, query.user_id).await?))
}

/// POST /schedule-blocks
pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<NewScheduleBlock>,
) -> Result<(StatusCode, Json<ScheduleBlock>), AppError> {
    let company_id = caller.company_id()?;
    let user_id = req.user_id.unwrap_or(caller.user_id);

    // Blocking someone else's agenda is user management
    if user_id != caller.user_id {
        caller.require("users", "edit")?;
        ensure_member(&state, company_id, user_id).await?;
    }

    if let Some(end_date) = req.end_date {
        if end_date < req.start_date {
            return Err(AppError::BadRequest("end_date is before start_date".to_string()));
        }
    }
    if req.block_type == BlockType::TimeSlot {
        match (req.start_time, req.end_time) {
            (Some(start), Some(end)) if start < end => {}
            (Some(_), Some(_)) => {
                return Err(AppError::BadRequest("end_time must be after start_time".to_string()))
            }
            _ => {
                return Err(AppError::BadRequest(
                    "time_slot blocks need start_time and end_time".to_string(),
                ))
            }
        }
    }

    let block = ScheduleBlock {
        id: Uuid::new_v4(),
        company_id,
        user_id,
        block_type: req.block_type,
        start_date: req.start_date,
        end_date: req.end_date,
        start_time: req.start_time,
        end_time: req.end_time,
        reason: req.reason,
        is_recurring: req.is_recurring,
        recurring_pattern: req.recurring_pattern,
        created_at: Utc::now(),
    };
    state.db.insert_schedule_block(&block).await?;
    state.publish(RowChange::insert(Table::ScheduleBlocks, Some(company_id), &block));

    Ok((StatusCode::CREATED, Json(block)))
}

/// DELETE /schedule-blocks/:id
pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let company_id = caller.company_id()?;

    let block = state
        .db
        .get_schedule_block(company_id, id)
        .await?
        .ok_or(AppError::NotFound("Schedule block"))?;
    if block.user_id != caller.user_id {
        caller.require("users", "edit")?;
    }

    if state.db.delete_schedule_block(company_id, id).await? {
        state.publish(RowChange::delete(Table::ScheduleBlocks, Some(company_id), &block));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /schedule-blocks/check
pub async fn check(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<BlockCheckRequest>,
) -> Result<Json<BlockCheckResponse>, AppError> {
    let company_id = caller.company_id()?;
    let blocks = state
        .db
        .list_schedule_blocks(company_id, Some(req.user_id))
        .await?;
    let block = blocking_block(req.date, req.time, req.duration, req.user_id, &blocks);

    Ok(Json(BlockCheckResponse {
        blocked: block.is_some(),
        block_id: block.map(|b| b.id),
    }))
}
