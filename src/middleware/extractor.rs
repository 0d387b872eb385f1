use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

use super::error::AuthError;
use crate::session::{LiveCredential, SessionBroker};
use crate::types::SessionToken;

/// Session token from the `Authorization: Bearer` header, not yet verified.
#[derive(Debug, Clone)]
pub struct BearerSession(pub SessionToken);

impl<S> FromRequestParts<S> for BearerSession
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AuthError::Unauthenticated)?;
        Ok(Self(SessionToken(bearer.token().to_string())))
    }
}

/// Session with a live provider credential.
///
/// Use as an Axum extractor in agent route handlers; the access token is
/// refreshed first when it is close to expiry. Rejections map to 401 (log in
/// again) or 503 (retry later).
///
/// # Example
///
/// ```rust,ignore
/// async fn now_playing(session: AuthorizedSession) -> impl IntoResponse {
///     spotify.currently_playing(&session.credential.access_token).await
/// }
///
/// let app = Router::new()
///     .route("/api/now-playing", get(now_playing))
///     .with_state(broker);
/// ```
#[derive(Debug, Clone)]
pub struct AuthorizedSession {
    pub credential: LiveCredential,
}

impl<S> FromRequestParts<S> for AuthorizedSession
where
    Arc<SessionBroker>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let BearerSession(token) = BearerSession::from_request_parts(parts, state).await?;
        let broker = Arc::<SessionBroker>::from_ref(state);

        let credential = broker.get_live_credential(token.as_str()).await?;
        Ok(Self { credential })
    }
}
