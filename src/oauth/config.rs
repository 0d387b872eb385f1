use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Scopes the original music assistant asks for.
const DEFAULT_SCOPES: &[&str] = &[
    "user-read-private",
    "user-read-email",
    "user-top-read",
    "user-library-read",
    "user-follow-read",
    "playlist-read-private",
    "playlist-read-collaborative",
    "user-read-recently-played",
    "playlist-modify-public",
    "playlist-modify-private",
];

/// Spotify `OAuth2` client configuration.
///
/// Required fields are constructor parameters; there is no runtime "missing field" error.
///
/// ```rust,ignore
/// use spotify_session_broker::ProviderConfig;
///
/// let config = ProviderConfig::new("client-id", "client-secret", "https://my-app.com/callback".parse()?)
///     .with_token_url("http://127.0.0.1:9000/api/token".parse()?);
/// ```
#[derive(Clone)]
#[non_exhaustive]
pub struct ProviderConfig {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) redirect_uri: Url,
    pub(crate) auth_url: Url,
    pub(crate) token_url: Url,
    pub(crate) profile_url: Url,
    pub(crate) scopes: Vec<String>,
    pub(crate) request_timeout: Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("auth_url", &self.auth_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("profile_url", &self.profile_url.as_str())
            .field("scopes", &self.scopes)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: Url,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri,
            auth_url: "https://accounts.spotify.com/authorize"
                .parse()
                .expect("valid default URL"),
            token_url: "https://accounts.spotify.com/api/token"
                .parse()
                .expect("valid default URL"),
            profile_url: "https://api.spotify.com/v1/me"
                .parse()
                .expect("valid default URL"),
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `SPOTIFY_CLIENT_ID`
    /// - `SPOTIFY_CLIENT_SECRET`
    /// - `SPOTIFY_REDIRECT_URI`: callback URI registered with Spotify
    ///
    /// # Optional env vars
    /// - `SPOTIFY_AUTH_URL`, `SPOTIFY_TOKEN_URL`, `SPOTIFY_PROFILE_URL`: endpoint overrides
    /// - `SPOTIFY_SCOPES`: comma-separated scopes
    /// - `PROVIDER_TIMEOUT_SECS`: per-request timeout (default 10)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required env vars are missing or values are invalid.
    pub fn from_env() -> Result<Self, Error> {
        let client_id = required_env("SPOTIFY_CLIENT_ID")?;
        let client_secret = required_env("SPOTIFY_CLIENT_SECRET")?;
        let redirect_uri = parse_url("SPOTIFY_REDIRECT_URI", &required_env("SPOTIFY_REDIRECT_URI")?)?;

        let mut config = Self::new(client_id, client_secret, redirect_uri);

        if let Ok(s) = std::env::var("SPOTIFY_AUTH_URL") {
            config = config.with_auth_url(parse_url("SPOTIFY_AUTH_URL", &s)?);
        }
        if let Ok(s) = std::env::var("SPOTIFY_TOKEN_URL") {
            config = config.with_token_url(parse_url("SPOTIFY_TOKEN_URL", &s)?);
        }
        if let Ok(s) = std::env::var("SPOTIFY_PROFILE_URL") {
            config = config.with_profile_url(parse_url("SPOTIFY_PROFILE_URL", &s)?);
        }
        if let Ok(scopes) = std::env::var("SPOTIFY_SCOPES") {
            config = config.with_scopes(parse_scopes(&scopes));
        }
        if let Some(secs) = crate::config::env_secs("PROVIDER_TIMEOUT_SECS")? {
            config = config.with_request_timeout(secs);
        }

        Ok(config)
    }

    /// Override the authorization endpoint.
    #[must_use]
    pub fn with_auth_url(mut self, url: Url) -> Self {
        self.auth_url = url;
        self
    }

    /// Override the token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    /// Override the profile endpoint used to learn the account id.
    #[must_use]
    pub fn with_profile_url(mut self, url: Url) -> Self {
        self.profile_url = url;
        self
    }

    /// Override the default scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Bound every provider request by `timeout`.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub fn profile_url(&self) -> &Url {
        &self.profile_url
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

fn required_env(name: &str) -> Result<String, Error> {
    std::env::var(name).map_err(|_| Error::Config(format!("{name} is required")))
}

fn parse_url(name: &str, value: &str) -> Result<Url, Error> {
    value
        .parse()
        .map_err(|e| Error::Config(format!("{name}: {e}")))
}

fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig::new(
            "my-app",
            "shh",
            "https://my-app.com/callback".parse().unwrap(),
        )
    }

    #[test]
    fn test_config_defaults_to_spotify() {
        let config = config();

        assert_eq!(config.client_id(), "my-app");
        assert_eq!(config.redirect_uri().as_str(), "https://my-app.com/callback");
        assert_eq!(
            config.auth_url().as_str(),
            "https://accounts.spotify.com/authorize"
        );
        assert_eq!(
            config.token_url().as_str(),
            "https://accounts.spotify.com/api/token"
        );
        assert!(config.scopes().iter().any(|s| s == "user-top-read"));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_config_with_overrides() {
        let config = config()
            .with_token_url("http://127.0.0.1:9000/api/token".parse().unwrap())
            .with_scopes(vec!["user-read-email".into()])
            .with_request_timeout(Duration::from_secs(2));

        assert_eq!(config.token_url().as_str(), "http://127.0.0.1:9000/api/token");
        assert_eq!(config.scopes(), &["user-read-email"]);
        assert_eq!(config.request_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_debug_hides_client_secret() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("shh"));
        assert!(rendered.contains("my-app"));
    }

    #[test]
    fn test_parse_scopes_trims_and_skips_empty() {
        assert_eq!(
            parse_scopes(" user-read-email, ,playlist-read-private "),
            vec!["user-read-email", "playlist-read-private"]
        );
    }
}
