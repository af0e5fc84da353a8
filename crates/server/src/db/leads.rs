use anyhow::Result;
use shared::Lead;
use uuid::Uuid;

use super::Database;

const LEAD_COLUMNS: &str =
    "id, company_id, name, email, phone, source, notes, status, assigned_to, created_at, updated_at";

impl Database {
    pub async fn list_leads(&self, company_id: Uuid) -> Result<Vec<Lead>> {
        let leads = sqlx::query_as::<_, Lead>(&format!(
            "SELECT {} FROM leads WHERE company_id = ? ORDER BY created_at DESC",
            LEAD_COLUMNS
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(leads)
    }

    pub async fn get_lead(&self, company_id: Uuid, id: Uuid) -> Result<Option<Lead>> {
        let lead = sqlx::query_as::<_, Lead>(&format!(
            "SELECT {} FROM leads WHERE company_id = ? AND id = ?",
            LEAD_COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lead)
    }

    pub async fn insert_lead(&self, lead: &Lead) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO leads (id, company_id, name, email, phone, source, notes, status, assigned_to, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(lead.id)
        .bind(lead.company_id)
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.source)
        .bind(&lead.notes)
        .bind(&lead.status)
        .bind(lead.assigned_to)
        .bind(lead.created_at)
        .bind(lead.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_lead(&self, lead: &Lead) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE leads SET name = ?, email = ?, phone = ?, notes = ?, status = ?, assigned_to = ?, updated_at = ?
            WHERE company_id = ? AND id = ?
            "#,
        )
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.notes)
        .bind(&lead.status)
        .bind(lead.assigned_to)
        .bind(lead.updated_at)
        .bind(lead.company_id)
        .bind(lead.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_lead(&self, company_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM leads WHERE company_id = ? AND id = ?")
            .bind(company_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
