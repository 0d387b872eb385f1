use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Server-generated session identifier (ULID).
///
/// Embedded in the session token's `sub` claim and used as the key of the
/// session's credential record. Never chosen by the client.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct SessionId(pub Ulid);

impl SessionId {
    /// Generate a fresh, unique session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

/// Provider account identifier (Spotify user id), when known.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct AccountId(pub String);

/// Client-held session token (opaque PASETO string).
///
/// Its validity is entirely its authentication tag plus expiry; it is never
/// looked up server-side.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(..)")
    }
}
