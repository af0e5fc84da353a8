use anyhow::Result;
use shared::{CompanyStats, UserOverview};

use super::Database;

impl Database {
    /// Per-company usage counters across all tenants
    pub async fn company_stats(&self) -> Result<Vec<CompanyStats>> {
        let stats = sqlx::query_as::<_, CompanyStats>(
            r#"
            SELECT c.id AS company_id, c.name, c.created_at,
                (SELECT COUNT(*) FROM profiles p WHERE p.company_id = c.id) AS user_count,
                (SELECT COUNT(*) FROM leads l WHERE l.company_id = c.id) AS lead_count,
                (SELECT COUNT(*) FROM appointments a WHERE a.company_id = c.id) AS appointment_count,
                (SELECT COUNT(*) FROM meetings m WHERE m.company_id = c.id) AS meeting_count
            FROM companies c
            ORDER BY c.created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(stats)
    }

    pub async fn user_overview(&self) -> Result<Vec<UserOverview>> {
        let users = sqlx::query_as::<_, UserOverview>(
            r#"
            SELECT p.id, p.email, p.full_name, p.company_id, c.name AS company_name,
                   r.name AS role_name, p.created_at
            FROM profiles p
            LEFT JOIN companies c ON c.id = p.company_id
            LEFT JOIN roles r ON r.id = p.role_id
            ORDER BY p.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}
