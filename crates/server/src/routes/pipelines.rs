use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use shared::{
    NewPipeline, NewPipelineColumn, Pipeline, PipelineColumn, PipelineColumnPatch, PipelineDetails,
    RowChange, Table,
};
use uuid::Uuid;

use super::auth::Caller;
use crate::{error::AppError, state::AppState};

/// GET /pipelines
pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<PipelineDetails>>, AppError> {
    let company_id = caller.company_id()?;
    Ok(Json(state.db.list_pipelines(company_id).await?))
}

/// POST /pipelines
pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<NewPipeline>,
) -> Result<(StatusCode, Json<PipelineDetails>), AppError> {
    caller.require("pipelines", "create")?;
    let company_id = caller.company_id()?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Pipeline name is required".to_string()));
    }

    let pipeline = Pipeline {
        id: Uuid::new_v4(),
        company_id,
        name: name.to_string(),
        created_at: Utc::now(),
    };
    state.db.insert_pipeline(&pipeline).await?;
    state.publish(RowChange::insert(Table::Pipelines, Some(company_id), &pipeline));

    Ok((
        StatusCode::CREATED,
        Json(PipelineDetails {
            pipeline,
            columns: Vec::new(),
        }),
    ))
}

/// DELETE /pipelines/:id
pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require("pipelines", "delete")?;
    let company_id = caller.company_id()?;

    let pipeline = state
        .db
        .get_pipeline(company_id, id)
        .await?
        .ok_or(AppError::NotFound("Pipeline"))?;

    if state.db.delete_pipeline(company_id, id).await? {
        state.publish(RowChange::delete(Table::Pipelines, Some(company_id), &pipeline));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /pipelines/:id/columns
pub async fn add_column(
    State(state): State<AppState>,
    caller: Caller,
    Path(pipeline_id): Path<Uuid>,
    Json(req): Json<NewPipelineColumn>,
) -> Result<(StatusCode, Json<PipelineColumn>), AppError> {
    caller.require("pipelines", "edit")?;
    let company_id = caller.company_id()?;

    state
        .db
        .get_pipeline(company_id, pipeline_id)
        .await?
        .ok_or(AppError::NotFound("Pipeline"))?;

    let position = match req.position {
        Some(position) => position,
        None => state.db.next_column_position(pipeline_id).await?,
    };
    let column = PipelineColumn {
        id: Uuid::new_v4(),
        pipeline_id,
        name: req.name,
        color: req.color,
        position,
    };
    state.db.insert_pipeline_column(&column).await?;
    state.publish(RowChange::insert(Table::PipelineColumns, Some(company_id), &column));

    Ok((StatusCode::CREATED, Json(column)))
}

/// PATCH /pipeline-columns/:id
pub async fn update_column(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(patch): Json<PipelineColumnPatch>,
) -> Result<Json<PipelineColumn>, AppError> {
    caller.require("pipelines", "edit")?;
    let company_id = caller.company_id()?;

    let mut column = state
        .db
        .get_pipeline_column(company_id, id)
        .await?
        .ok_or(AppError::NotFound("Pipeline column"))?;

    if let Some(name) = patch.name {
        column.name = name;
    }
    if let Some(color) = patch.color {
        column.color = color;
    }
    if let Some(position) = patch.position {
        column.position = position;
    }

    state.db.update_pipeline_column(&column).await?;
    state.publish(RowChange::update(Table::PipelineColumns, Some(company_id), &column));

    Ok(Json(column))
}

/// DELETE /pipeline-columns/:id
pub async fn delete_column(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require("pipelines", "edit")?;
    let company_id = caller.company_id()?;

    let column = state
        .db
        .get_pipeline_column(company_id, id)
        .await?
        .ok_or(AppError::NotFound("Pipeline column"))?;

    if state.db.delete_pipeline_column(id).await? {
        state.publish(RowChange::delete(Table::PipelineColumns, Some(company_id), &column));
    }
    Ok(StatusCode::NO_CONTENT)
}
