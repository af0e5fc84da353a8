use anyhow::Result;
use shared::{PermissionMap, Role};
use sqlx::types::Json;
use uuid::Uuid;

use super::Database;

const ROLE_COLUMNS: &str = "id, name, description, permissions, is_system_role, company_id";

impl Database {
    pub async fn get_role(&self, id: Uuid) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(&format!("SELECT {} FROM roles WHERE id = ?", ROLE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    pub async fn get_system_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(&format!(
            "SELECT {} FROM roles WHERE name = ? AND is_system_role = 1",
            ROLE_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }

    /// System roles plus the company's own roles
    pub async fn list_roles(&self, company_id: Uuid) -> Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(&format!(
            "SELECT {} FROM roles WHERE is_system_role = 1 OR company_id = ? ORDER BY is_system_role DESC, name ASC",
            ROLE_COLUMNS
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    pub async fn insert_role(&self, role: &Role) -> Result<()> {
        sqlx::query(
            "INSERT INTO roles (id, name, description, permissions, is_system_role, company_id) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(Json(&role.permissions))
        .bind(role.is_system_role)
        .bind(role.company_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_role(&self, role: &Role) -> Result<()> {
        sqlx::query("UPDATE roles SET description = ?, permissions = ? WHERE id = ?")
            .bind(&role.description)
            .bind(Json(&role.permissions))
            .bind(role.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes a custom role together with its company permission override
    pub async fn delete_role(&self, role: &Role) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM roles WHERE id = ? AND is_system_role = 0")
            .bind(role.id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() > 0 {
            if let Some(company_id) = role.company_id {
                sqlx::query("DELETE FROM company_role_permissions WHERE company_id = ? AND role_name = ?")
                    .bind(company_id)
                    .bind(&role.name)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_profiles_with_role(&self, role_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles WHERE role_id = ?")
            .bind(role_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // Company permission overrides

    pub async fn get_permission_override(
        &self,
        company_id: Uuid,
        role_name: &str,
    ) -> Result<Option<PermissionMap>> {
        let row: Option<Json<PermissionMap>> = sqlx::query_scalar(
            "SELECT permissions FROM company_role_permissions WHERE company_id = ? AND role_name = ?",
        )
        .bind(company_id)
        .bind(role_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|Json(map)| map))
    }

    pub async fn set_permission_override(
        &self,
        company_id: Uuid,
        role_name: &str,
        permissions: &PermissionMap,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO company_role_permissions (company_id, role_name, permissions)
            VALUES (?, ?, ?)
            ON CONFLICT(company_id, role_name) DO UPDATE SET permissions = excluded.permissions
            "#,
        )
        .bind(company_id)
        .bind(role_name)
        .bind(Json(permissions))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
