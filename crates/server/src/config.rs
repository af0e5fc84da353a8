use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    /// Base URL of the web app, used in invitation links
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiry_hours: u64,
    #[serde(default = "default_invitation_expiry_days")]
    pub invitation_expiry_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub enabled: bool,
    /// Use local sendmail binary instead of SMTP server
    #[serde(default = "default_true")]
    pub use_sendmail: bool,
    /// SMTP server host (only used if use_sendmail is false)
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

/// Operators allowed to see cross-tenant analytics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub emails: Vec<String>,
}

fn default_true() -> bool { true }
fn default_smtp_port() -> u16 { 587 }
fn default_invitation_expiry_days() -> i64 { 7 }
fn default_public_url() -> String { "http://localhost:5173".to_string() }

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            use_sendmail: true,
            host: "".to_string(),
            port: 587,
            username: "".to_string(),
            password: "".to_string(),
            from_email: "noreply@crm.local".to_string(),
            from_name: "CRM".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                path: "./data/crm.db".to_string(),
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
                token_expiry_hours: 24,
                invitation_expiry_days: default_invitation_expiry_days(),
            },
            smtp: SmtpConfig::default(),
            admin: AdminConfig::default(),
            public_url: default_public_url(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env();
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        // Try to load from environment variable
        if let Ok(path) = std::env::var("CRM_CONFIG") {
            return Self::load_from_path(&PathBuf::from(path));
        }

        let default_paths = vec![
            PathBuf::from("crm-server.toml"),
            PathBuf::from("config/crm-server.toml"),
            PathBuf::from("/etc/crm/server.toml"),
        ];

        for path in default_paths {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        tracing::warn!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Secrets and deployment URLs come from the process environment
    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("CRM_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Ok(secret) = std::env::var("CRM_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(url) = std::env::var("CRM_PUBLIC_URL") {
            self.public_url = url;
        }
    }

    pub fn is_platform_admin(&self, email: &str) -> bool {
        self.admin
            .emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [database]
            path = "/tmp/crm.db"

            [auth]
            jwt_secret = "s3cret"
            token_expiry_hours = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.auth.invitation_expiry_days, 7);
        assert!(!config.smtp.enabled);
        assert!(config.admin.emails.is_empty());
        assert_eq!(config.public_url, "http://localhost:5173");
    }

    #[test]
    fn test_platform_admin_matching_ignores_case() {
        let mut config = Config::default();
        config.admin.emails = vec!["Ops@Example.com".to_string()];
        assert!(config.is_platform_admin("ops@example.com"));
        assert!(!config.is_platform_admin("someone@example.com"));
    }
}
