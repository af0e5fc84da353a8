use anyhow::Result;
use shared::{Pipeline, PipelineColumn, PipelineDetails};
use std::collections::HashMap;
use uuid::Uuid;

use super::Database;

impl Database {
    /// Pipelines with their columns in `position` order
    pub async fn list_pipelines(&self, company_id: Uuid) -> Result<Vec<PipelineDetails>> {
        let pipelines = sqlx::query_as::<_, Pipeline>(
            "SELECT id, company_id, name, created_at FROM pipelines WHERE company_id = ? ORDER BY created_at ASC",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        let columns = sqlx::query_as::<_, PipelineColumn>(
            r#"
            SELECT c.id, c.pipeline_id, c.name, c.color, c.position
            FROM pipeline_columns c
            JOIN pipelines p ON p.id = c.pipeline_id
            WHERE p.company_id = ?
            ORDER BY c.position ASC
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_pipeline: HashMap<Uuid, Vec<PipelineColumn>> = HashMap::new();
        for column in columns {
            by_pipeline.entry(column.pipeline_id).or_default().push(column);
        }

        Ok(pipelines
            .into_iter()
            .map(|pipeline| PipelineDetails {
                columns: by_pipeline.remove(&pipeline.id).unwrap_or_default(),
                pipeline,
            })
            .collect())
    }

    pub async fn get_pipeline(&self, company_id: Uuid, id: Uuid) -> Result<Option<Pipeline>> {
        let pipeline = sqlx::query_as::<_, Pipeline>(
            "SELECT id, company_id, name, created_at FROM pipelines WHERE company_id = ? AND id = ?",
        )
        .bind(company_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(pipeline)
    }

    pub async fn insert_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        sqlx::query("INSERT INTO pipelines (id, company_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(pipeline.id)
            .bind(pipeline.company_id)
            .bind(&pipeline.name)
            .bind(pipeline.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_pipeline(&self, company_id: Uuid, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM pipelines WHERE company_id = ? AND id = ?")
            .bind(company_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() > 0 {
            sqlx::query("DELETE FROM pipeline_columns WHERE pipeline_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn next_column_position(&self, pipeline_id: Uuid) -> Result<i64> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(position) FROM pipeline_columns WHERE pipeline_id = ?")
                .bind(pipeline_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(max.map(|p| p + 1).unwrap_or(0))
    }

    /// A column, provided its pipeline belongs to `company_id`
    pub async fn get_pipeline_column(&self, company_id: Uuid, id: Uuid) -> Result<Option<PipelineColumn>> {
        let column = sqlx::query_as::<_, PipelineColumn>(
            r#"
            SELECT c.id, c.pipeline_id, c.name, c.color, c.position
            FROM pipeline_columns c
            JOIN pipelines p ON p.id = c.pipeline_id
            WHERE p.company_id = ? AND c.id = ?
            "#,
        )
        .bind(company_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(column)
    }

    pub async fn insert_pipeline_column(&self, column: &PipelineColumn) -> Result<()> {
        sqlx::query(
            "INSERT INTO pipeline_columns (id, pipeline_id, name, color, position) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(column.id)
        .bind(column.pipeline_id)
        .bind(&column.name)
        .bind(&column.color)
        .bind(column.position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_pipeline_column(&self, column: &PipelineColumn) -> Result<()> {
        sqlx::query("UPDATE pipeline_columns SET name = ?, color = ?, position = ? WHERE id = ?")
            .bind(&column.name)
            .bind(&column.color)
            .bind(column.position)
            .bind(column.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_pipeline_column(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pipeline_columns WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
