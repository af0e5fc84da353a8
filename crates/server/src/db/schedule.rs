use anyhow::Result;
use shared::ScheduleBlock;
use uuid::Uuid;

use super::Database;

const BLOCK_COLUMNS: &str = "id, company_id, user_id, block_type, start_date, end_date, start_time, end_time, reason, is_recurring, recurring_pattern, created_at";

impl Database {
    pub async fn list_schedule_blocks(
        &self,
        company_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<Vec<ScheduleBlock>> {
        let blocks = match user_id {
            Some(user_id) => {
                sqlx::query_as::<_, ScheduleBlock>(&format!(
                    "SELECT {} FROM schedule_blocks WHERE company_id = ? AND user_id = ? ORDER BY start_date ASC",
                    BLOCK_COLUMNS
                ))
                .bind(company_id)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ScheduleBlock>(&format!(
                    "SELECT {} FROM schedule_blocks WHERE company_id = ? ORDER BY start_date ASC",
                    BLOCK_COLUMNS
                ))
                .bind(company_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(blocks)
    }

    pub async fn get_schedule_block(&self, company_id: Uuid, id: Uuid) -> Result<Option<ScheduleBlock>> {
        let block = sqlx::query_as::<_, ScheduleBlock>(&format!(
            "SELECT {} FROM schedule_blocks WHERE company_id = ? AND id = ?",
            BLOCK_COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(block)
    }

    pub async fn insert_schedule_block(&self, block: &ScheduleBlock) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedule_blocks (id, company_id, user_id, block_type, start_date, end_date, start_time, end_time, reason, is_recurring, recurring_pattern, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(block.id)
        .bind(block.company_id)
        .bind(block.user_id)
        .bind(block.block_type)
        .bind(block.start_date)
        .bind(block.end_date)
        .bind(block.start_time)
        .bind(block.end_time)
        .bind(&block.reason)
        .bind(block.is_recurring)
        .bind(&block.recurring_pattern)
        .bind(block.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_schedule_block(&self, company_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedule_blocks WHERE company_id = ? AND id = ?")
            .bind(company_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
