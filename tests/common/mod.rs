//! Shared fixtures: a simulated Spotify provider and a broker wired to it.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use spotify_session_broker::{
    CredentialStore, MemoryStore, OAuthBroker, ProviderConfig, SessionBroker, SessionSettings,
    TokenCodec,
};
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// base64("client:secret")
pub const BASIC_AUTH: &str = "Basic Y2xpZW50OnNlY3JldA==";

pub struct Harness {
    pub provider: MockServer,
    pub broker: Arc<SessionBroker>,
    pub store: Arc<MemoryStore>,
}

pub async fn harness() -> Harness {
    harness_with(SessionSettings::default()).await
}

pub async fn harness_with(settings: SessionSettings) -> Harness {
    let provider = MockServer::start().await;
    let config = ProviderConfig::new(
        "client",
        "secret",
        "https://agent.example.com/api/auth/callback".parse().unwrap(),
    )
    .with_token_url(format!("{}/api/token", provider.uri()).parse().unwrap())
    .with_profile_url(format!("{}/v1/me", provider.uri()).parse().unwrap())
    .with_request_timeout(Duration::from_secs(2));

    let store = Arc::new(MemoryStore::new());
    let broker = SessionBroker::new(
        TokenCodec::ephemeral("integration").unwrap(),
        OAuthBroker::new(config).unwrap(),
        CredentialStore::new(store.clone()),
    )
    .with_settings(settings);

    Harness {
        provider,
        broker: Arc::new(broker),
        store,
    }
}

/// Code exchange answering `code` with the given tokens.
pub async fn mount_exchange(server: &MockServer, code: &str, access: &str, expires_in: u64) {
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(header("authorization", BASIC_AUTH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!("code={code}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access,
            "token_type": "Bearer",
            "refresh_token": "refresh-1",
            "expires_in": expires_in,
            "scope": "user-read-playback-state"
        })))
        .mount(server)
        .await;
}

pub async fn mount_profile(server: &MockServer, account_id: &str) {
    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": account_id,
            "display_name": "Test User"
        })))
        .mount(server)
        .await;
}

/// Refresh grant answering with `template`, expected exactly `calls` times.
pub async fn mount_refresh(server: &MockServer, template: ResponseTemplate, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(header("authorization", BASIC_AUTH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(template)
        .expect(calls)
        .named("refresh grant")
        .mount(server)
        .await;
}

pub fn refreshed(access: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": 3600
    }))
}

pub fn revoked() -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_json(json!({
        "error": "invalid_grant",
        "error_description": "Refresh token revoked"
    }))
}

/// The `state` parameter of an authorization URL.
pub fn state_of(authorization_url: &str) -> String {
    Url::parse(authorization_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}
