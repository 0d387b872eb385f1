use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::config::AuthRoutesConfig;
use super::error::AuthError;
use super::extractor::BearerSession;
use super::state::AuthState;
use crate::oauth::pkce::session_id_from_state;
use crate::session::{SessionBroker, SessionStatus};
use crate::types::AccountId;

/// Create the session router: `login`, `callback`, `session`, `logout`
/// under the configured prefix.
pub fn auth_routes(config: AuthRoutesConfig, broker: Arc<SessionBroker>) -> Router {
    let auth_path = config.settings.auth_path.clone();

    let state = AuthState {
        broker,
        settings: config.settings,
    };

    Router::new()
        .route(&format!("{auth_path}/login"), get(login))
        .route(&format!("{auth_path}/callback"), get(callback))
        .route(&format!("{auth_path}/session"), get(session))
        .route(&format!("{auth_path}/logout"), post(logout))
        .with_state(state)
}

// ── Login ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginParams {
    /// Space- or comma-separated scopes.
    scope: Option<String>,
}

#[derive(Serialize)]
struct LoginResponse {
    session_token: String,
    authorization_url: String,
    token_type: &'static str,
    expires_in: u64,
}

async fn login(
    State(state): State<AuthState>,
    Query(params): Query<LoginParams>,
) -> Result<Json<LoginResponse>, AuthError> {
    let ttl = state
        .settings
        .token_ttl
        .unwrap_or(state.broker.settings().token_ttl);
    let scopes = match params.scope.as_deref() {
        Some(s) => s
            .split([' ', ','])
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => state.settings.scopes.clone(),
    };

    let started = state.broker.start_login(ttl, &scopes).await?;

    Ok(Json(LoginResponse {
        session_token: started.session_token.0,
        authorization_url: started.authorization_url,
        token_type: "bearer",
        expires_in: started.expires_in.as_secs(),
    }))
}

// ── Callback ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
struct CallbackResponse {
    status: &'static str,
    message: &'static str,
}

async fn callback(
    State(state): State<AuthState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<CallbackResponse>, AuthError> {
    if let Some(error) = &params.error {
        let desc = params.error_description.as_deref().unwrap_or("Unknown error");
        tracing::warn!(error = %error, description = %desc, "OAuth2 error from Spotify");
        return Err(AuthError::OAuth(format!("{error}: {desc}")));
    }

    let code = params
        .code
        .ok_or_else(|| AuthError::OAuth("missing_code".into()))?;
    let received_state = params
        .state
        .ok_or_else(|| AuthError::OAuth("missing_state".into()))?;
    let session_id = session_id_from_state(&received_state)
        .ok_or_else(|| AuthError::OAuth("state_mismatch".into()))?;

    state
        .broker
        .complete_oauth(&session_id, &code, &received_state)
        .await?;

    Ok(Json(CallbackResponse {
        status: "success",
        message: "Spotify account linked. You can return to the chat.",
    }))
}

// ── Session ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SessionResponse {
    status: &'static str,
    #[serde(with = "time::serde::rfc3339::option")]
    expires_at: Option<OffsetDateTime>,
    account_id: Option<AccountId>,
}

impl From<SessionStatus> for SessionResponse {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Authorized {
                expires_at,
                account_id,
            } => Self {
                status: "authorized",
                expires_at: Some(expires_at),
                account_id,
            },
            SessionStatus::Stale {
                expires_at,
                account_id,
            } => Self {
                status: "stale",
                expires_at: Some(expires_at),
                account_id,
            },
            SessionStatus::PendingOAuth => Self {
                status: "pending_oauth",
                expires_at: None,
                account_id: None,
            },
        }
    }
}

async fn session(
    State(state): State<AuthState>,
    BearerSession(token): BearerSession,
) -> Result<Json<SessionResponse>, AuthError> {
    let status = state.broker.status(token.as_str()).await?;
    Ok(Json(status.into()))
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout(
    State(state): State<AuthState>,
    BearerSession(token): BearerSession,
) -> Result<StatusCode, AuthError> {
    state.broker.logout(token.as_str()).await?;
    Ok(StatusCode::NO_CONTENT)
}
