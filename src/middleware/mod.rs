//! Axum routes and extractors for bearer-token sessions.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use spotify_session_broker::middleware::{AuthRoutesConfig, AuthorizedSession, auth_routes};
//!
//! // 1. Assemble the broker over a durable store
//! let broker = Arc::new(BrokerConfig::from_env()?.build(store)?);
//!
//! // 2. Mount session routes (login, callback, session, logout)
//! let app = axum::Router::new()
//!     .merge(auth_routes(AuthRoutesConfig::from_env()?, broker.clone()))
//!     .route("/api/chat", post(chat))
//!     .with_state(broker);
//!
//! // 3. Take `AuthorizedSession` in agent handlers
//! async fn chat(session: AuthorizedSession, body: String) -> impl IntoResponse { /* ... */ }
//! ```

mod config;
mod error;
mod extractor;
mod routes;
mod state;

pub use config::AuthRoutesConfig;
pub use error::AuthError;
pub use extractor::{AuthorizedSession, BearerSession};
pub use routes::auth_routes;
