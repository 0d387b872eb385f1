use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::Error;
use crate::session::AccessError;

const RETRY_AFTER_SECS: &str = "5";
const REAUTH_CHALLENGE: &str =
    r#"Bearer error="invalid_token", error_description="reauthorization required""#;

/// Authentication errors for the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Missing, malformed or expired session token, or OAuth not completed.
    #[error("Not authenticated")]
    Unauthenticated,

    /// The provider revoked the session's grant; the client must log in again.
    #[error("Reauthorization required")]
    ReauthorizationRequired,

    /// Transient provider or store failure.
    #[error("Temporarily unavailable: {0}")]
    Unavailable(String),

    /// OAuth callback failure (provider error, state mismatch, rejected code).
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// Corrupt data or misconfiguration.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
                Json(json!({ "error": "unauthenticated" })),
            )
                .into_response(),
            Self::ReauthorizationRequired => (
                StatusCode::UNAUTHORIZED,
                [(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(REAUTH_CHALLENGE),
                )],
                Json(json!({ "error": "reauthorization_required" })),
            )
                .into_response(),
            Self::Unavailable(ref detail) => {
                tracing::warn!(error = %detail, "Request failed transiently");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [(
                        header::RETRY_AFTER,
                        HeaderValue::from_static(RETRY_AFTER_SECS),
                    )],
                    Json(json!({ "error": "temporarily_unavailable" })),
                )
                    .into_response()
            }
            Self::OAuth(ref message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "oauth_failed", "message": message })),
            )
                .into_response(),
            Self::Internal(_) => {
                tracing::error!(error = %self, "Session broker internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<AccessError> for AuthError {
    fn from(e: AccessError) -> Self {
        match e {
            AccessError::Unauthenticated(_) => Self::Unauthenticated,
            AccessError::ReauthorizationRequired(_) => Self::ReauthorizationRequired,
            AccessError::Unavailable(e) if e.is_transient() => Self::Unavailable(e.to_string()),
            AccessError::Unavailable(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<Error> for AuthError {
    fn from(e: Error) -> Self {
        // the pending authorization is spent once an exchange was attempted,
        // so the callback cannot be retried; login has to start over
        if let Error::OAuthExchange(_) = e {
            return Self::OAuth(e.to_string());
        }
        if e.is_transient() {
            return Self::Unavailable(e.to_string());
        }
        match e {
            Error::Profile(_) => Self::OAuth(e.to_string()),
            Error::InvalidToken(_) | Error::NotFound => Self::Unauthenticated,
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderFailure;

    #[test]
    fn test_unauthenticated_carries_bearer_challenge() {
        let resp = AuthError::Unauthenticated.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[test]
    fn test_reauthorization_is_distinguishable() {
        let resp = AuthError::ReauthorizationRequired.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], REAUTH_CHALLENGE);
    }

    #[test]
    fn test_transient_failures_ask_for_retry() {
        let resp = AuthError::from(Error::StoreTimeout("get")).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers()[header::RETRY_AFTER], RETRY_AFTER_SECS);
    }

    #[test]
    fn test_callback_failures_are_bad_requests() {
        let err = AuthError::from(Error::OAuthExchange(ProviderFailure::StateMismatch));
        assert!(matches!(err, AuthError::OAuth(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_exchange_timeout_asks_for_new_login() {
        for failure in [
            ProviderFailure::Timeout,
            ProviderFailure::Transport("reset".into()),
            ProviderFailure::Unavailable { status: 503 },
        ] {
            let resp = AuthError::from(Error::OAuthExchange(failure)).into_response();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            assert!(resp.headers().get(header::RETRY_AFTER).is_none());
        }
    }

    #[test]
    fn test_corrupt_records_are_internal() {
        let err = AuthError::from(AccessError::Unavailable(Error::Corrupt("x".into())));
        assert!(matches!(err, AuthError::Internal(_)));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
