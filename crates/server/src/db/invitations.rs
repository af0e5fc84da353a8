use anyhow::Result;
use shared::Invitation;
use uuid::Uuid;

use super::Database;

const INVITATION_COLUMNS: &str =
    "id, email, role_id, company_id, invited_by, token, sent_via_email, used_at, expires_at, created_at";

impl Database {
    pub async fn insert_invitation(&self, invitation: &Invitation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO invitations (id, email, role_id, company_id, invited_by, token, sent_via_email, used_at, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(invitation.id)
        .bind(&invitation.email)
        .bind(invitation.role_id)
        .bind(invitation.company_id)
        .bind(invitation.invited_by)
        .bind(&invitation.token)
        .bind(invitation.sent_via_email)
        .bind(invitation.used_at)
        .bind(invitation.expires_at)
        .bind(invitation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_invitation_by_token(&self, token: &str) -> Result<Option<Invitation>> {
        let invitation = sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {} FROM invitations WHERE token = ?",
            INVITATION_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invitation)
    }

    pub async fn set_invitation_sent(&self, id: Uuid, sent: bool) -> Result<()> {
        sqlx::query("UPDATE invitations SET sent_via_email = ? WHERE id = ?")
            .bind(sent)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
