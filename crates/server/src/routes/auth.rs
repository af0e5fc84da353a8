use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::request::Parts,
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use shared::{
    permissions::{resolve_permissions, Permissions},
    AuthResponse, Company, CurrentUser, LoginRequest, Profile, RegisterRequest, RowChange, Table,
};
use uuid::Uuid;

use crate::{config::AuthConfig, db::User, error::AppError, state::AppState};

const ADMIN_ROLE: &str = "Admin";
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: usize,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("A valid email is required".to_string()));
    }
    validate_password(&req.password)?;

    // Check if user already exists
    if state.db.get_user_by_email(&email).await?.is_some() {
        return Err(AppError::BadRequest("Email already registered".to_string()));
    }

    let now = Utc::now();
    let user_id = Uuid::new_v4();

    let (company, role_id, company_id, invitation_id) = match req.invitation_token.as_deref() {
        Some(token) => {
            let invitation = state
                .db
                .get_invitation_by_token(token)
                .await?
                .filter(|invitation| invitation.is_usable(now))
                .ok_or_else(|| AppError::BadRequest("Invalid or expired invitation".to_string()))?;
            if !invitation.email.eq_ignore_ascii_case(&email) {
                return Err(AppError::BadRequest(
                    "Invitation was issued for a different email".to_string(),
                ));
            }
            (None, invitation.role_id, invitation.company_id, Some(invitation.id))
        }
        None => {
            let name = req
                .company_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    AppError::BadRequest("company_name or invitation_token is required".to_string())
                })?;
            let admin = state
                .db
                .get_system_role_by_name(ADMIN_ROLE)
                .await?
                .ok_or_else(|| AppError::Internal("Admin role is not seeded".to_string()))?;
            let company = Company {
                id: Uuid::new_v4(),
                name: name.to_string(),
                created_at: now,
            };
            let company_id = company.id;
            (Some(company), admin.id, company_id, None)
        }
    };

    let user = User {
        id: user_id,
        email: email.clone(),
        password_hash: hash_password(&req.password)?,
        created_at: now,
    };
    let profile = Profile {
        id: user_id,
        email,
        full_name: req.full_name.trim().to_string(),
        role_id: Some(role_id),
        company_id: Some(company_id),
        created_at: now,
    };

    state
        .db
        .create_account(&user, &profile, company.as_ref(), invitation_id)
        .await?;
    state.publish(RowChange::insert(Table::Profiles, Some(company_id), &profile));

    tracing::info!("Registered user {} in company {}", user_id, company_id);

    let token = generate_token(&user_id, &state.config.auth)?;
    Ok(Json(AuthResponse { token, user_id }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = req.email.trim().to_lowercase();

    // Find user
    let user = state
        .db
        .get_user_by_email(&email)
        .await?
        .ok_or_else(|| AppError::AuthError("Invalid email or password".to_string()))?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&user.password_hash).map_err(|e| AppError::Internal(e.to_string()))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::AuthError("Invalid email or password".to_string()))?;

    let token = generate_token(&user.id, &state.config.auth)?;

    Ok(Json(AuthResponse {
        token,
        user_id: user.id,
    }))
}

/// GET /me
pub async fn me(State(state): State<AppState>, caller: Caller) -> Result<Json<CurrentUser>, AppError> {
    let company = match caller.profile.company_id {
        Some(id) => state.db.get_company(id).await?,
        None => None,
    };
    Ok(Json(CurrentUser {
        profile: caller.profile,
        role_name: caller.permissions.role_name,
        company,
        permissions: caller.permissions.map,
    }))
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(e.to_string()))
}

pub fn generate_token(user_id: &Uuid, auth_config: &AuthConfig) -> Result<String, AppError> {
    let expiration = Utc::now()
        .checked_add_signed(chrono::Duration::hours(auth_config.token_expiry_hours as i64))
        .ok_or_else(|| AppError::Internal("Failed to calculate expiration".to_string()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth_config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, AppError> {
    let claims = jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
        &jsonwebtoken::Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::AuthError(e.to_string()))?;

    Uuid::parse_str(&claims.sub).map_err(|_| AppError::AuthError("Invalid token subject".to_string()))
}

// ============================================================================
// Caller context
// ============================================================================

/// The authenticated user with tenant and resolved permissions
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Uuid,
    pub profile: Profile,
    pub permissions: Permissions,
}

impl Caller {
    pub async fn load(state: &AppState, user_id: Uuid) -> Result<Self, AppError> {
        let profile = state
            .db
            .get_profile(user_id)
            .await?
            .ok_or_else(|| AppError::AuthError("Profile not found".to_string()))?;

        let role_name = match profile.role_id {
            Some(role_id) => state.db.get_role(role_id).await?.map(|role| role.name),
            None => None,
        };

        let company_override = match (profile.company_id, role_name.as_deref()) {
            (Some(company_id), Some(name)) => state.db.get_permission_override(company_id, name).await?,
            _ => None,
        };

        Ok(Self {
            user_id,
            permissions: resolve_permissions(role_name.as_deref(), company_override.as_ref()),
            profile,
        })
    }

    pub fn role_name(&self) -> &str {
        self.permissions.role_name.as_deref().unwrap_or_default()
    }

    pub fn company_id(&self) -> Result<Uuid, AppError> {
        self.profile
            .company_id
            .ok_or_else(|| AppError::Forbidden("User is not linked to a company".to_string()))
    }

    pub fn require(&self, module: &str, action: &str) -> Result<(), AppError> {
        if self.permissions.has_permission(module, action) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("Missing permission {}.{}", module, action)))
        }
    }
}

/// Rejects a user id that is not a member of the company
pub async fn ensure_member(state: &AppState, company_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
    let profile = state.db.get_profile(user_id).await?;
    if profile.and_then(|p| p.company_id) != Some(company_id) {
        return Err(AppError::BadRequest("User does not belong to this company".to_string()));
    }
    Ok(())
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::AuthError("Missing bearer token".to_string()))?;

        let user_id = verify_token(bearer.token(), &state.config.auth.jwt_secret)?;
        Self::load(state, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_token_round_trip() {
        let config = Config::default();
        let user_id = Uuid::new_v4();
        let token = generate_token(&user_id, &config.auth).unwrap();
        assert_eq!(verify_token(&token, &config.auth.jwt_secret).unwrap(), user_id);
        assert!(verify_token(&token, "other-secret").is_err());
    }

    #[test]
    fn test_password_hash_verifies() {
        let hash = hash_password("hunter22").unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default().verify_password(b"hunter22", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"wrong", &parsed).is_err());
    }

    #[test]
    fn test_short_password_is_rejected() {
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
    }
}
