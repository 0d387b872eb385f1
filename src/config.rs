use std::sync::Arc;
use std::time::Duration;

use crate::credential::{CredentialStore, StoreSettings};
use crate::error::Error;
use crate::oauth::{OAuthBroker, ProviderConfig};
use crate::session::{SessionBroker, SessionSettings};
use crate::store::KeyValueStore;
use crate::token::{SecretKey, TokenCodec, parse_secret_key_hex};

const DEFAULT_ISSUER: &str = "spotify-session-broker";

/// Everything needed to assemble a [`SessionBroker`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct BrokerConfig {
    pub provider: ProviderConfig,
    pub secret: SecretKey,
    pub issuer: String,
    pub session: SessionSettings,
    pub store: StoreSettings,
}

impl BrokerConfig {
    /// Config with default lifetimes, timeouts and issuer.
    #[must_use]
    pub fn new(provider: ProviderConfig, secret: SecretKey) -> Self {
        Self {
            provider,
            secret,
            issuer: DEFAULT_ISSUER.into(),
            session: SessionSettings::default(),
            store: StoreSettings::default(),
        }
    }

    /// Create config from environment variables.
    ///
    /// Provider variables are documented on [`ProviderConfig::from_env`].
    ///
    /// # Optional env vars
    /// - `SESSION_SECRET`: 64 hex chars. When unset a random key is generated and
    ///   every token issued dies with the process.
    /// - `SESSION_ISSUER`: `iss` claim (default `spotify-session-broker`)
    /// - `SESSION_TTL_SECS`: session token lifetime (default 3600)
    /// - `REFRESH_MARGIN_SECS`: refresh this long before access token expiry (default 60)
    /// - `STORE_TIMEOUT_SECS`: per-operation store bound (default 5)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is missing or malformed.
    pub fn from_env() -> Result<Self, Error> {
        let provider = ProviderConfig::from_env()?;

        let secret = match std::env::var("SESSION_SECRET") {
            Ok(hex) => parse_secret_key_hex(&hex).map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!("SESSION_SECRET: {msg}")),
                other => other,
            })?,
            Err(_) => {
                tracing::warn!(
                    "SESSION_SECRET not set; using an ephemeral key, sessions will not survive a restart"
                );
                SecretKey::generate()
            }
        };

        let mut config = Self::new(provider, secret);

        if let Ok(issuer) = std::env::var("SESSION_ISSUER") {
            config = config.with_issuer(issuer);
        }
        if let Some(ttl) = env_secs("SESSION_TTL_SECS")? {
            config.session.token_ttl = ttl;
        }
        if let Some(margin) = env_secs("REFRESH_MARGIN_SECS")? {
            config.session.refresh_margin = margin;
        }
        if let Some(timeout) = env_secs("STORE_TIMEOUT_SECS")? {
            config.store.op_timeout = timeout;
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_session_settings(mut self, settings: SessionSettings) -> Self {
        self.session = settings;
        self
    }

    #[must_use]
    pub fn with_store_settings(mut self, settings: StoreSettings) -> Self {
        self.store = settings;
        self
    }

    /// Assemble a broker over `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key or HTTP client cannot be built.
    pub fn build<S: KeyValueStore>(self, backend: Arc<S>) -> Result<SessionBroker, Error> {
        let codec = TokenCodec::new(&self.secret, self.issuer)?;
        let oauth = OAuthBroker::new(self.provider)?;
        let credentials = CredentialStore::new(backend).with_settings(self.store);
        Ok(SessionBroker::new(codec, oauth, credentials).with_settings(self.session))
    }
}

/// Read an optional whole-seconds duration from the environment.
pub(crate) fn env_secs(name: &str) -> Result<Option<Duration>, Error> {
    match std::env::var(name) {
        Ok(value) => parse_secs(name, &value).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_secs(name: &str, value: &str) -> Result<Duration, Error> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| Error::Config(format!("{name}: {e}")))
}
