use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Login credentials; the public side of a user is its `Profile`
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}
