use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::types::SessionId;

/// Separates the session id from the random nonce inside `state`.
const STATE_SEPARATOR: char = '.';

/// Generates a cryptographically random code verifier for PKCE.
///
/// Returns a 64-character URL-safe string (RFC 7636 compliant, 43-128 chars).
#[must_use]
pub fn generate_code_verifier() -> String {
    let random_bytes: [u8; 48] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Computes the S256 code challenge from a code verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generates the `OAuth2` state parameter for a login attempt.
///
/// Format: `<session_id>.<nonce>`, where the nonce is 32 random bytes
/// (256 bits) base64url-encoded. The session id prefix lets the callback
/// locate the pending authorization; only the nonce needs to be secret.
#[must_use]
pub fn generate_state(session_id: &SessionId) -> String {
    let nonce: [u8; 32] = rand::rng().random();
    format!(
        "{session_id}{STATE_SEPARATOR}{}",
        URL_SAFE_NO_PAD.encode(nonce)
    )
}

/// Recovers the session id prefix of a `state` value returned by the provider.
///
/// Says nothing about authenticity; the full state must still be compared
/// with [`states_match`].
#[must_use]
pub fn session_id_from_state(state: &str) -> Option<SessionId> {
    let (session_id, nonce) = state.split_once(STATE_SEPARATOR)?;
    if nonce.is_empty() {
        return None;
    }
    session_id.parse().ok()
}

/// Constant-time comparison of a received `state` with the issued one.
#[must_use]
pub fn states_match(received: &str, expected: &str) -> bool {
    received.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_verifier_length() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 64);
    }

    #[test]
    fn test_code_verifier_url_safe() {
        let verifier = generate_code_verifier();
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier should be URL-safe: {verifier}"
        );
    }

    #[test]
    fn test_code_challenge_matches_rfc7636_example() {
        // RFC 7636 appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            generate_code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_state_carries_session_id() {
        let id = SessionId::generate();
        let state = generate_state(&id);

        assert_eq!(session_id_from_state(&state), Some(id));
    }

    #[test]
    fn test_state_nonce_has_256_bits() {
        let state = generate_state(&SessionId::generate());
        let (_, nonce) = state.split_once('.').unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(nonce).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_state_uniqueness_for_same_session() {
        let id = SessionId::generate();
        assert_ne!(generate_state(&id), generate_state(&id));
    }

    #[test]
    fn test_session_id_from_malformed_state() {
        assert_eq!(session_id_from_state(""), None);
        assert_eq!(session_id_from_state("no-separator"), None);
        assert_eq!(session_id_from_state("not-a-ulid.nonce"), None);
        let id = SessionId::generate();
        assert_eq!(session_id_from_state(&format!("{id}.")), None);
    }

    #[test]
    fn test_states_match() {
        let state = generate_state(&SessionId::generate());
        assert!(states_match(&state, &state.clone()));
        assert!(!states_match(&state, &generate_state(&SessionId::generate())));
        assert!(!states_match(&state, &state[..state.len() - 1]));
        assert!(!states_match("", &state));
    }
}
