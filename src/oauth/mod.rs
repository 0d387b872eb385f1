//! Spotify `OAuth2` client: authorization URL, code exchange, refresh.
//!
//! Knows the provider protocol only. Persisting what it returns is the
//! [`CredentialStore`](crate::credential::CredentialStore)'s job.

mod config;
pub mod pkce;

pub use config::ProviderConfig;

use serde::Deserialize;
use time::OffsetDateTime;

use crate::credential::PendingAuthorization;
use crate::error::{Error, ProviderFailure};
use crate::types::{AccountId, SessionId};

/// Fallback lifetime when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Authorization URL plus the pending state to keep until the callback.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: String,
    pub pending: PendingAuthorization,
}

/// Token response from the provider token endpoint.
#[derive(Clone, Deserialize)]
#[non_exhaustive]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
}

impl ProviderTokens {
    #[must_use]
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: Some("Bearer".into()),
            refresh_token: None,
            expires_in,
            scope: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

impl std::fmt::Debug for ProviderTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTokens")
            .field("token_type", &self.token_type)
            .field("refresh_token_set", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN
}

#[derive(Deserialize)]
struct Profile {
    id: String,
}

/// `OAuth2` client for the music provider.
pub struct OAuthBroker {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl OAuthBroker {
    /// Create a broker whose HTTP client enforces the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self { config, http })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Build the consent URL for `session_id`, with a fresh state and PKCE pair.
    ///
    /// Falls back to the configured scopes when `scopes` is empty.
    #[must_use]
    pub fn build_authorization_url(
        &self,
        session_id: &SessionId,
        scopes: &[String],
    ) -> AuthorizationRequest {
        let state = pkce::generate_state(session_id);
        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::generate_code_challenge(&code_verifier);
        let scopes = if scopes.is_empty() {
            self.config.scopes.clone()
        } else {
            scopes.to_vec()
        };
        let scope = scopes.join(" ");

        let mut url = self.config.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", &scope)
            .append_pair("state", &state)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256");

        AuthorizationRequest {
            url: url.into(),
            pending: PendingAuthorization {
                session_id: *session_id,
                state,
                code_verifier,
                scopes,
                created_at: OffsetDateTime::now_utc(),
            },
        }
    }

    /// Exchange an authorization code for provider tokens.
    ///
    /// The received `state` is checked against `expected` before anything is
    /// sent to the provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OAuthExchange`] on a state mismatch, a provider
    /// rejection, a timeout, or a response without a refresh token.
    pub async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        expected: &PendingAuthorization,
    ) -> Result<ProviderTokens, Error> {
        if !pkce::states_match(state, &expected.state) {
            return Err(Error::OAuthExchange(ProviderFailure::StateMismatch));
        }

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", expected.code_verifier.as_str()),
        ];

        let tokens = self
            .token_request(&params, "token exchange")
            .await
            .map_err(Error::OAuthExchange)?;

        if tokens.refresh_token.is_none() {
            return Err(Error::OAuthExchange(ProviderFailure::Malformed(
                "missing refresh_token".into(),
            )));
        }
        Ok(tokens)
    }

    /// Trade a refresh token for a new access token.
    ///
    /// Never retried here: a rejected refresh token means the user must
    /// authorize again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OAuthRefresh`] if the refresh token is revoked or the
    /// request fails.
    pub async fn refresh(&self, refresh_token: &str) -> Result<ProviderTokens, Error> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        self.token_request(&params, "token refresh")
            .await
            .map_err(Error::OAuthRefresh)
    }

    /// Look up the provider account id for an access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Profile`] if the profile endpoint fails.
    pub async fn fetch_account_id(&self, access_token: &str) -> Result<AccountId, Error> {
        let response = self
            .http
            .get(self.config.profile_url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Profile(ProviderFailure::from_reqwest(&e)))?;

        let response = Self::ensure_success(response, "profile request")
            .await
            .map_err(Error::Profile)?;
        let profile = response
            .json::<Profile>()
            .await
            .map_err(|e| Error::Profile(ProviderFailure::Malformed(e.to_string())))?;
        Ok(AccountId(profile.id))
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
        operation: &'static str,
    ) -> Result<ProviderTokens, ProviderFailure> {
        let response = self
            .http
            .post(self.config.token_url.clone())
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(params)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(operation, error = %e, "Provider request failed");
                ProviderFailure::from_reqwest(&e)
            })?;

        let response = Self::ensure_success(response, operation).await?;
        response
            .json::<ProviderTokens>()
            .await
            .map_err(|e| ProviderFailure::Malformed(e.to_string()))
    }

    /// Checks HTTP response status; returns the response on success or a classified failure.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, ProviderFailure> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(operation, status = status.as_u16(), "Provider returned an error");

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(ProviderFailure::Unavailable {
                status: status.as_u16(),
            })
        } else {
            Err(ProviderFailure::Rejected {
                status: status.as_u16(),
                detail: body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use url::Url;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_config() -> ProviderConfig {
        ProviderConfig::new(
            "test-client",
            "test-secret",
            "https://example.com/callback".parse().unwrap(),
        )
    }

    fn broker_for(server: &MockServer) -> OAuthBroker {
        let config = test_config()
            .with_token_url(format!("{}/api/token", server.uri()).parse().unwrap())
            .with_profile_url(format!("{}/v1/me", server.uri()).parse().unwrap());
        OAuthBroker::new(config).unwrap()
    }

    fn query(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[test]
    fn test_authorization_url_contains_oauth_params() {
        let broker = OAuthBroker::new(test_config()).unwrap();
        let id = SessionId::generate();
        let req = broker.build_authorization_url(&id, &[]);
        let params = query(&req.url);

        assert!(req.url.starts_with("https://accounts.spotify.com/authorize?"));
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "test-client");
        assert_eq!(params["redirect_uri"], "https://example.com/callback");
        assert_eq!(params["state"], req.pending.state);
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(
            params["code_challenge"],
            pkce::generate_code_challenge(&req.pending.code_verifier)
        );
        assert!(params["scope"].contains("playlist-read-private"));
        assert_eq!(req.pending.session_id, id);
        assert_eq!(pkce::session_id_from_state(&req.pending.state), Some(id));
    }

    #[test]
    fn test_authorization_url_uses_requested_scopes() {
        let broker = OAuthBroker::new(test_config()).unwrap();
        let scopes = vec!["user-read-email".to_string(), "user-top-read".to_string()];
        let req = broker.build_authorization_url(&SessionId::generate(), &scopes);

        assert_eq!(query(&req.url)["scope"], "user-read-email user-top-read");
        assert_eq!(req.pending.scopes, scopes);
    }

    #[test]
    fn test_authorization_url_unique_per_call() {
        let broker = OAuthBroker::new(test_config()).unwrap();
        let id = SessionId::generate();
        let req1 = broker.build_authorization_url(&id, &[]);
        let req2 = broker.build_authorization_url(&id, &[]);

        assert_ne!(req1.pending.state, req2.pending.state);
        assert_ne!(req1.pending.code_verifier, req2.pending.code_verifier);
    }

    #[tokio::test]
    async fn test_exchange_rejects_state_mismatch_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let broker = broker_for(&server);
        let req = broker.build_authorization_url(&SessionId::generate(), &[]);
        let forged = pkce::generate_state(&req.pending.session_id);

        let err = broker
            .exchange_code("code", &forged, &req.pending)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::OAuthExchange(ProviderFailure::StateMismatch)
        ));
    }

    #[tokio::test]
    async fn test_exchange_posts_code_with_client_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(header_exists("authorization"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=good-code"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-1",
                "token_type": "Bearer",
                "refresh_token": "refresh-1",
                "expires_in": 3600,
                "scope": "user-read-email"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let broker = broker_for(&server);
        let req = broker.build_authorization_url(&SessionId::generate(), &[]);
        let tokens = broker
            .exchange_code("good-code", &req.pending.state.clone(), &req.pending)
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "access-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(tokens.expires_in, 3600);
        assert_eq!(tokens.scope.as_deref(), Some("user-read-email"));
    }

    #[tokio::test]
    async fn test_exchange_without_refresh_token_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-1",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let broker = broker_for(&server);
        let req = broker.build_authorization_url(&SessionId::generate(), &[]);
        let err = broker
            .exchange_code("code", &req.pending.state.clone(), &req.pending)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::OAuthExchange(ProviderFailure::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_classifies_provider_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("refresh_token=revoked"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("refresh_token=flaky"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let broker = broker_for(&server);

        match broker.refresh("revoked").await.unwrap_err() {
            Error::OAuthRefresh(ProviderFailure::Rejected { status, detail }) => {
                assert_eq!(status, 400);
                assert!(detail.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = broker.refresh("flaky").await.unwrap_err();
        assert!(matches!(
            err,
            Error::OAuthRefresh(ProviderFailure::Unavailable { status: 503 })
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_refresh_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(std::time::Duration::from_millis(500))
                    .set_body_json(serde_json::json!({"access_token": "late"})),
            )
            .mount(&server)
            .await;

        let config = test_config()
            .with_token_url(format!("{}/api/token", server.uri()).parse().unwrap())
            .with_request_timeout(std::time::Duration::from_millis(50));
        let broker = OAuthBroker::new(config).unwrap();

        let err = broker.refresh("refresh-1").await.unwrap_err();
        assert!(matches!(err, Error::OAuthRefresh(ProviderFailure::Timeout)));
    }

    #[tokio::test]
    async fn test_refresh_keeps_missing_refresh_token_optional() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-2",
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let tokens = broker_for(&server).refresh("refresh-1").await.unwrap();
        assert_eq!(tokens.access_token, "access-2");
        assert!(tokens.refresh_token.is_none());
        assert_eq!(tokens.expires_in, DEFAULT_EXPIRES_IN);
    }

    #[tokio::test]
    async fn test_fetch_account_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "spotify-user-1",
                "display_name": "Listener"
            })))
            .mount(&server)
            .await;

        let id = broker_for(&server).fetch_account_id("access-1").await.unwrap();
        assert_eq!(id, AccountId("spotify-user-1".into()));
    }
}
