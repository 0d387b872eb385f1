#![doc = include_str!("../README.md")]

pub mod config;
pub mod credential;
pub mod error;
#[cfg(feature = "server")]
pub mod middleware;
pub mod oauth;
pub mod retry;
pub mod session;
pub mod store;
pub mod token;
pub mod types;

// Re-exports for convenient access
pub use config::BrokerConfig;
pub use credential::{CredentialRecord, CredentialStore, PendingAuthorization, StoreSettings};
pub use error::{Error, ProviderFailure};
pub use oauth::{AuthorizationRequest, OAuthBroker, ProviderConfig, ProviderTokens};
pub use retry::RetryPolicy;
pub use session::{
    AccessError, LiveCredential, LoginStart, SessionBroker, SessionSettings, SessionStatus,
};
pub use store::{BoxError, KeyValueStore, MemoryStore, Versioned};
pub use token::{SecretKey, SessionClaims, TokenCodec, parse_secret_key_hex};
pub use types::{AccountId, SessionId, SessionToken};
