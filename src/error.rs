/// Why a call to the OAuth provider failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderFailure {
    /// Callback `state` does not match the one issued at login start.
    #[error("state parameter mismatch")]
    StateMismatch,
    /// No pending authorization exists for the session (never started or expired).
    #[error("no pending authorization for this session")]
    NoPendingAuthorization,
    /// Provider answered with a 4xx (invalid code, revoked refresh token, ...).
    #[error("provider rejected the request ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    /// Provider answered with a 5xx or 429.
    #[error("provider unavailable ({status})")]
    Unavailable { status: u16 },
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderFailure {
    /// Whether the same request could succeed later without user interaction.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Timeout | Self::Transport(_)
        )
    }

    pub(crate) fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Session token is malformed, forged, or expired.
    #[error("invalid session token: {0}")]
    InvalidToken(String),

    /// No credential record exists for the session (OAuth never completed).
    #[error("no credential record for session")]
    NotFound,

    #[error("authorization code exchange failed: {0}")]
    OAuthExchange(ProviderFailure),

    #[error("token refresh failed: {0}")]
    OAuthRefresh(ProviderFailure),

    #[error("profile request failed: {0}")]
    Profile(ProviderFailure),

    #[error("store {operation} failed: {detail}")]
    Store {
        operation: &'static str,
        detail: String,
    },

    #[error("store {0} timed out")]
    StoreTimeout(&'static str),

    /// Stored value could not be decoded or encoded.
    #[error("corrupt stored record: {0}")]
    Corrupt(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether retrying the failed operation later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store { .. } | Self::StoreTimeout(_) => true,
            Self::OAuthExchange(f) | Self::OAuthRefresh(f) | Self::Profile(f) => f.is_transient(),
            _ => false,
        }
    }
}
