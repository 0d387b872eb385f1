use std::time::Duration;

/// Shared route settings used by both config and runtime state.
#[derive(Debug, Clone)]
pub(crate) struct RouteSettings {
    pub(crate) auth_path: String,
    pub(crate) token_ttl: Option<Duration>,
    pub(crate) scopes: Vec<String>,
}

impl RouteSettings {
    fn defaults() -> Self {
        Self {
            auth_path: "/api/auth".into(),
            token_ttl: None,
            scopes: Vec::new(),
        }
    }
}

/// Configuration of the session routes.
///
/// Use [`from_env()`](AuthRoutesConfig::from_env) for convention-based setup,
/// or [`new()`](AuthRoutesConfig::new) with `with_*` methods for full control.
#[derive(Debug, Clone)]
pub struct AuthRoutesConfig {
    pub(super) settings: RouteSettings,
}

impl Default for AuthRoutesConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthRoutesConfig {
    /// Routes under `/api/auth`, token lifetime and scopes taken from the broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: RouteSettings::defaults(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `AUTH_PATH`: route prefix (default `/api/auth`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `AUTH_PATH` does not start with `/`.
    pub fn from_env() -> Result<Self, crate::Error> {
        let mut config = Self::new();
        if let Ok(path) = std::env::var("AUTH_PATH") {
            if !path.starts_with('/') {
                return Err(crate::Error::Config(format!(
                    "AUTH_PATH must start with '/': {path}"
                )));
            }
            config = config.with_auth_path(path);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        let path: String = path.into();
        self.settings.auth_path = path.trim_end_matches('/').to_string();
        self
    }

    /// Override the broker's session token lifetime for tokens issued by `/login`.
    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.settings.token_ttl = Some(ttl);
        self
    }

    /// Scopes requested when `/login` is called without a `scope` parameter.
    /// Empty means the provider config's scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.settings.scopes = scopes;
        self
    }

    #[must_use]
    pub fn auth_path(&self) -> &str {
        &self.settings.auth_path
    }
}
