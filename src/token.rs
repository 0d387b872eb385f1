use std::time::Duration;

use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::{Generate, SymmetricKey};
use pasetors::token::UntrustedToken;
use pasetors::version4::V4;
use pasetors::{Local, local};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::Error;
use crate::types::{SessionId, SessionToken};

const TOKEN_PREFIX: &str = "v4.local.";

/// Process-wide 32-byte secret used to seal session tokens.
#[derive(Clone)]
pub struct SecretKey {
    bytes: [u8; 32],
}

impl SecretKey {
    /// Generate a random key. Tokens sealed with it do not survive a restart.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            bytes: rand::random(),
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Parses a hex-encoded 32-byte secret into a `SecretKey`.
///
/// # Errors
///
/// Returns `Error::Config` if the hex is invalid or the key length is not 32 bytes.
pub fn parse_secret_key_hex(secret_hex: &str) -> Result<SecretKey, Error> {
    let bytes =
        hex::decode(secret_hex.trim()).map_err(|e| Error::Config(format!("invalid hex: {e}")))?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
        Error::Config(format!("invalid key length: expected 32, got {}", b.len()))
    })?;
    Ok(SecretKey { bytes })
}

/// Claims recovered from a verified session token.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct SessionClaims {
    pub session_id: SessionId,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// Seals and opens session tokens (PASETO `v4.local`).
///
/// Verification is stateless: a token is valid iff its authentication tag
/// checks out under the process key, the issuer matches, and `exp` is in the
/// future. Tokens cannot be revoked before they expire.
pub struct TokenCodec {
    key: SymmetricKey<V4>,
    issuer: String,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// # Errors
    ///
    /// Returns `Error::Config` if the key is rejected by the PASETO implementation.
    pub fn new(secret: &SecretKey, issuer: impl Into<String>) -> Result<Self, Error> {
        let key = SymmetricKey::<V4>::from(secret.as_bytes())
            .map_err(|e| Error::Config(format!("session secret: {e}")))?;
        Ok(Self {
            key,
            issuer: issuer.into(),
        })
    }

    /// Codec with a random key, for tests and single-process development.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if key generation fails.
    pub fn ephemeral(issuer: impl Into<String>) -> Result<Self, Error> {
        let key = SymmetricKey::<V4>::generate()
            .map_err(|e| Error::Config(format!("session secret: {e}")))?;
        Ok(Self {
            key,
            issuer: issuer.into(),
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issue a token for `session_id` valid for `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `ttl` runs past the representable date range
    /// or the claims cannot be sealed.
    pub fn issue(&self, session_id: &SessionId, ttl: Duration) -> Result<SessionToken, Error> {
        self.issue_at(session_id, OffsetDateTime::now_utc(), ttl)
    }

    fn issue_at(
        &self,
        session_id: &SessionId,
        issued_at: OffsetDateTime,
        ttl: Duration,
    ) -> Result<SessionToken, Error> {
        let expires_at = time::Duration::try_from(ttl)
            .ok()
            .and_then(|ttl| issued_at.checked_add(ttl))
            .ok_or_else(|| {
                Error::Config(format!("session token ttl out of range: {}s", ttl.as_secs()))
            })?;
        let iat = format_time(issued_at)?;
        let exp = format_time(expires_at)?;

        let mut claims = Claims::new().map_err(seal_error)?;
        claims.issuer(&self.issuer).map_err(seal_error)?;
        claims.subject(&session_id.to_string()).map_err(seal_error)?;
        claims.issued_at(&iat).map_err(seal_error)?;
        claims.not_before(&iat).map_err(seal_error)?;
        claims.expiration(&exp).map_err(seal_error)?;

        let token = local::encrypt(&self.key, &claims, None, None).map_err(seal_error)?;
        Ok(SessionToken(token))
    }

    /// Verify a token and return the session id it carries.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidToken` if the token is malformed, tampered with,
    /// issued by someone else, or expired.
    pub fn verify(&self, token: &str) -> Result<SessionId, Error> {
        self.verify_claims(token).map(|c| c.session_id)
    }

    /// Verify a token and return all session claims.
    ///
    /// # Errors
    ///
    /// See [`TokenCodec::verify`].
    pub fn verify_claims(&self, token: &str) -> Result<SessionClaims, Error> {
        if !token.starts_with(TOKEN_PREFIX) {
            return Err(Error::InvalidToken("invalid token format".into()));
        }

        // exp, nbf and iat are validated by default
        let mut rules = ClaimsValidationRules::new();
        rules.validate_issuer_with(&self.issuer);

        let untrusted = UntrustedToken::<Local, V4>::try_from(token).map_err(token_error)?;
        let trusted =
            local::decrypt(&self.key, &untrusted, &rules, None, None).map_err(token_error)?;

        let claims = trusted
            .payload_claims()
            .ok_or_else(|| Error::InvalidToken("missing payload".into()))?;

        let session_id = claim_str(claims, "sub")?
            .parse::<SessionId>()
            .map_err(|_| Error::InvalidToken("sub is not a session id".into()))?;
        let issued_at = parse_time(claim_str(claims, "iat")?)?;
        let expires_at = parse_time(claim_str(claims, "exp")?)?;

        Ok(SessionClaims {
            session_id,
            issued_at,
            expires_at,
        })
    }
}

fn claim_str<'a>(claims: &'a Claims, key: &str) -> Result<&'a str, Error> {
    claims
        .get_claim(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidToken(format!("missing claim: {key}")))
}

fn format_time(t: OffsetDateTime) -> Result<String, Error> {
    t.format(&Rfc3339)
        .map_err(|e| Error::Config(format!("session token timestamp: {e}")))
}

fn parse_time(s: &str) -> Result<OffsetDateTime, Error> {
    OffsetDateTime::parse(s, &Rfc3339)
        .map_err(|e| Error::InvalidToken(format!("timestamp: {e}")))
}

fn token_error(e: pasetors::errors::Error) -> Error {
    Error::InvalidToken(e.to_string())
}

fn seal_error(e: pasetors::errors::Error) -> Error {
    Error::Config(format!("session token issuance: {e}"))
}
