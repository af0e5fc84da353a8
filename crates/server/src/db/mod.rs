use anyhow::Result;
use shared::{permissions::default_permissions, Company, Profile};
use sqlx::{sqlite::SqlitePoolOptions, types::Json, SqlitePool};
use std::path::Path;
use uuid::Uuid;

mod analytics;
mod appointments;
mod invitations;
mod leads;
mod meetings;
mod models;
mod pipelines;
mod roles;
mod schedule;

pub use models::*;

/// Built-in roles seeded as system roles
pub const SYSTEM_ROLES: [&str; 4] = ["Admin", "Gerente", "Vendedor", "Closer"];

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    pub async fn new(path: &str) -> Result<Self> {
        // Ensure the directory exists
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", path);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory database
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                id BLOB PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BLOB PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS roles (
                id BLOB PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                permissions TEXT NOT NULL DEFAULT '{}',
                is_system_role INTEGER NOT NULL DEFAULT 0,
                company_id BLOB REFERENCES companies(id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id BLOB PRIMARY KEY REFERENCES users(id),
                email TEXT NOT NULL,
                full_name TEXT NOT NULL,
                role_id BLOB REFERENCES roles(id),
                company_id BLOB REFERENCES companies(id),
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS company_role_permissions (
                company_id BLOB NOT NULL REFERENCES companies(id),
                role_name TEXT NOT NULL,
                permissions TEXT NOT NULL,
                PRIMARY KEY (company_id, role_name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS leads (
                id BLOB PRIMARY KEY,
                company_id BLOB NOT NULL REFERENCES companies(id),
                name TEXT NOT NULL,
                email TEXT,
                phone TEXT,
                source TEXT,
                notes TEXT,
                status TEXT NOT NULL DEFAULT 'new',
                assigned_to BLOB,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS appointments (
                id BLOB PRIMARY KEY,
                company_id BLOB NOT NULL REFERENCES companies(id),
                lead_id BLOB,
                assigned_to BLOB,
                date TEXT NOT NULL,
                time TEXT NOT NULL,
                duration INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled',
                notes TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS meetings (
                id BLOB PRIMARY KEY,
                company_id BLOB NOT NULL REFERENCES companies(id),
                title TEXT NOT NULL,
                date TEXT NOT NULL,
                time TEXT NOT NULL,
                duration INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled',
                organizer_id BLOB NOT NULL,
                notes TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS meeting_participants (
                meeting_id BLOB NOT NULL REFERENCES meetings(id),
                profile_id BLOB NOT NULL,
                PRIMARY KEY (meeting_id, profile_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS schedule_blocks (
                id BLOB PRIMARY KEY,
                company_id BLOB NOT NULL REFERENCES companies(id),
                user_id BLOB NOT NULL,
                block_type TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT,
                start_time TEXT,
                end_time TEXT,
                reason TEXT,
                is_recurring INTEGER NOT NULL DEFAULT 0,
                recurring_pattern TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pipelines (
                id BLOB PRIMARY KEY,
                company_id BLOB NOT NULL REFERENCES companies(id),
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_columns (
                id BLOB PRIMARY KEY,
                pipeline_id BLOB NOT NULL REFERENCES pipelines(id),
                name TEXT NOT NULL,
                color TEXT NOT NULL,
                position INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS invitations (
                id BLOB PRIMARY KEY,
                email TEXT NOT NULL,
                role_id BLOB NOT NULL REFERENCES roles(id),
                company_id BLOB NOT NULL REFERENCES companies(id),
                invited_by BLOB NOT NULL,
                token TEXT UNIQUE NOT NULL,
                sent_via_email INTEGER NOT NULL DEFAULT 0,
                used_at TEXT,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_leads_company ON leads(company_id)",
            "CREATE INDEX IF NOT EXISTS idx_appointments_company ON appointments(company_id)",
            "CREATE INDEX IF NOT EXISTS idx_blocks_user ON schedule_blocks(user_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        self.seed_system_roles().await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    async fn seed_system_roles(&self) -> Result<()> {
        for name in SYSTEM_ROLES {
            let permissions = default_permissions(name).unwrap_or_default();
            sqlx::query(
                r#"
                INSERT INTO roles (id, name, description, permissions, is_system_role, company_id)
                SELECT ?, ?, NULL, ?, 1, NULL
                WHERE NOT EXISTS (SELECT 1 FROM roles WHERE name = ? AND is_system_role = 1)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(Json(&permissions))
            .bind(name)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    // Account operations

    /// Create the credentials, the profile and optionally a new company in
    /// one transaction; a consumed invitation is marked used in the same one
    pub async fn create_account(
        &self,
        user: &User,
        profile: &Profile,
        company: Option<&Company>,
        invitation_id: Option<Uuid>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(company) = company {
            sqlx::query("INSERT INTO companies (id, name, created_at) VALUES (?, ?, ?)")
                .bind(company.id)
                .bind(&company.name)
                .bind(company.created_at)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)")
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.created_at)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO profiles (id, email, full_name, role_id, company_id, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(profile.id)
        .bind(&profile.email)
        .bind(&profile.full_name)
        .bind(profile.role_id)
        .bind(profile.company_id)
        .bind(profile.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(invitation_id) = invitation_id {
            sqlx::query("UPDATE invitations SET used_at = ? WHERE id = ?")
                .bind(chrono::Utc::now())
                .bind(invitation_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn get_company(&self, id: Uuid) -> Result<Option<Company>> {
        let company = sqlx::query_as::<_, Company>(
            "SELECT id, name, created_at FROM companies WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(company)
    }

    // Profile operations

    pub async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        let profile = sqlx::query_as::<_, Profile>(
            "SELECT id, email, full_name, role_id, company_id, created_at FROM profiles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    pub async fn list_profiles(&self, company_id: Uuid) -> Result<Vec<Profile>> {
        let profiles = sqlx::query_as::<_, Profile>(
            "SELECT id, email, full_name, role_id, company_id, created_at FROM profiles WHERE company_id = ? ORDER BY full_name ASC",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(profiles)
    }

    pub async fn update_profile(&self, profile: &Profile) -> Result<()> {
        sqlx::query("UPDATE profiles SET full_name = ?, role_id = ? WHERE id = ?")
            .bind(&profile.full_name)
            .bind(profile.role_id)
            .bind(profile.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
