use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use spotify_session_broker::middleware::{AuthRoutesConfig, AuthorizedSession, auth_routes};
use spotify_session_broker::{BrokerConfig, MemoryStore, SessionBroker};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let broker: Arc<SessionBroker> =
        Arc::new(BrokerConfig::from_env()?.build(Arc::new(MemoryStore::new()))?);
    tracing::warn!("Using the in-memory credential store; linked accounts are lost on restart");

    let routes = AuthRoutesConfig::from_env()?;
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/me", get(me))
        .with_state(broker.clone())
        .merge(auth_routes(routes, broker));

    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".into())
        .parse()?;
    tracing::info!(%addr, "Session broker listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Linked Spotify account of the caller; refreshes the access token if needed.
async fn me(session: AuthorizedSession) -> Json<Value> {
    let credential = session.credential;
    Json(json!({
        "session_id": credential.session_id,
        "account_id": credential.account_id,
        "expires_at": credential
            .expires_at
            .format(&time::format_description::well_known::Rfc3339)
            .ok(),
    }))
}
