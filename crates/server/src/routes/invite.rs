use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSendmailTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use rand::Rng;
use shared::{
    Invitation, InviteUserFailure, InviteUserRequest, InviteUserResponse, Profile, RowChange, Table,
};
use uuid::Uuid;

use super::auth::{hash_password, validate_password, Caller};
use crate::{config::SmtpConfig, db::User, error::AppError, state::AppState};

const TOKEN_LEN: usize = 32;
const CORS_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

/// OPTIONS /functions/invite-user
pub async fn preflight() -> Response {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, CORS_ALLOW_HEADERS),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
        ],
    )
        .into_response()
}

/// POST /functions/invite-user
///
/// Every failure, authentication included, answers `400 {success: false, error}`.
pub async fn invite_user(
    State(state): State<AppState>,
    caller: Result<Caller, AppError>,
    body: Result<Json<InviteUserRequest>, JsonRejection>,
) -> Response {
    let result = match (caller, body) {
        (Ok(caller), Ok(Json(req))) => handle_invite(&state, &caller, req).await,
        (Err(e), _) => Err(e),
        (_, Err(rejection)) => Err(AppError::BadRequest(rejection.body_text())),
    };

    match result {
        Ok(response) => (
            StatusCode::OK,
            [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
            Json(response),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Invitation failed: {}", e);
            let error = match e {
                AppError::Database(_) | AppError::Internal(_) => "Internal error".to_string(),
                other => other.to_string(),
            };
            (
                StatusCode::BAD_REQUEST,
                [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
                Json(InviteUserFailure {
                    success: false,
                    error,
                }),
            )
                .into_response()
        }
    }
}

async fn handle_invite(
    state: &AppState,
    caller: &Caller,
    req: InviteUserRequest,
) -> Result<InviteUserResponse, AppError> {
    caller.require("users", "create")?;
    let company_id = caller.company_id()?;

    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("A valid email is required".to_string()));
    }

    let role = state
        .db
        .get_role(req.role_id)
        .await?
        .ok_or(AppError::NotFound("Role"))?;
    if !role.is_system_role && role.company_id != Some(company_id) {
        return Err(AppError::Forbidden("Role belongs to another company".to_string()));
    }

    if state.db.get_user_by_email(&email).await?.is_some() {
        return Err(AppError::BadRequest("Email already registered".to_string()));
    }

    let now = Utc::now();

    if let (Some(true), Some(password)) = (req.create_with_password, req.password.as_deref()) {
        validate_password(password)?;

        let user_id = Uuid::new_v4();
        let user = User {
            id: user_id,
            email: email.clone(),
            password_hash: hash_password(password)?,
            created_at: now,
        };
        let profile = Profile {
            id: user_id,
            email: email.clone(),
            full_name: email.split('@').next().unwrap_or_default().to_string(),
            role_id: Some(role.id),
            company_id: Some(company_id),
            created_at: now,
        };
        state.db.create_account(&user, &profile, None, None).await?;
        state.publish(RowChange::insert(Table::Profiles, Some(company_id), &profile));

        tracing::info!("User {} created directly by {}", user_id, caller.user_id);
        return Ok(InviteUserResponse {
            success: true,
            invitation: None,
            user_id: Some(user_id),
            created_directly: true,
            message: format!("User {} created with role {}", email, role.name),
        });
    }

    let mut invitation = Invitation {
        id: Uuid::new_v4(),
        email: email.clone(),
        role_id: role.id,
        company_id,
        invited_by: caller.user_id,
        token: generate_invitation_token(),
        sent_via_email: false,
        used_at: None,
        expires_at: now + Duration::days(state.config.auth.invitation_expiry_days),
        created_at: now,
    };
    state.db.insert_invitation(&invitation).await?;

    let link = accept_link(
        req.redirect_to.as_deref().unwrap_or(&state.config.public_url),
        &invitation.token,
    );

    let message = if req.send_email.unwrap_or(false) {
        if !state.config.smtp.enabled {
            tracing::warn!("SMTP not configured, invitation link for {}: {}", email, link);
            "Invitation created; email delivery is not configured".to_string()
        } else {
            match send_invitation_email(&state.config.smtp, &email, &role.name, &link).await {
                Ok(()) => {
                    invitation.sent_via_email = true;
                    state.db.set_invitation_sent(invitation.id, true).await?;
                    tracing::info!("Invitation email sent to {}", email);
                    format!("Invitation sent to {}", email)
                }
                Err(e) => {
                    tracing::error!("Failed to send invitation email: {}", e);
                    "Invitation created but the email could not be sent".to_string()
                }
            }
        }
    } else {
        format!("Invitation created for {}", email)
    };

    state.publish(RowChange::insert(Table::Invitations, Some(company_id), &invitation));

    Ok(InviteUserResponse {
        success: true,
        invitation: Some(invitation),
        user_id: None,
        created_directly: false,
        message,
    })
}

fn generate_invitation_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn accept_link(base: &str, token: &str) -> String {
    format!("{}/accept-invite?token={}", base.trim_end_matches('/'), token)
}

async fn send_invitation_email(
    smtp_config: &SmtpConfig,
    to_email: &str,
    role_name: &str,
    link: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let email = Message::builder()
        .from(format!("{} <{}>", smtp_config.from_name, smtp_config.from_email).parse()?)
        .to(to_email.parse()?)
        .subject("You have been invited to the CRM")
        .header(ContentType::TEXT_HTML)
        .body(format!(
            r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>You have been invited</h2>
    <p>You were invited to join your team's CRM as <strong>{}</strong>.</p>
    <p style="text-align: center; margin: 30px 0;">
        <a href="{}" style="background-color: #0891b2; color: white; padding: 12px 24px; text-decoration: none; border-radius: 6px; display: inline-block;">Accept invitation</a>
    </p>
    <p>Or copy and paste this link into your browser:</p>
    <p style="word-break: break-all; color: #666;">{}</p>
</body>
</html>"#,
            role_name, link, link
        ))?;

    if smtp_config.use_sendmail {
        let mailer = AsyncSendmailTransport::<Tokio1Executor>::new();
        mailer.send(email).await?;
    } else {
        let creds = Credentials::new(smtp_config.username.clone(), smtp_config.password.clone());
        let mailer: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_config.host)?
                .credentials(creds)
                .port(smtp_config.port)
                .build();
        mailer.send(email).await?;
    }
    Ok(())
}
