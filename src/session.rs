//! Session orchestration: login start, OAuth completion and the
//! `get_live_credential` choke point every provider call goes through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::credential::{CredentialRecord, CredentialStore};
use crate::error::{Error, ProviderFailure};
use crate::oauth::OAuthBroker;
use crate::store::Versioned;
use crate::token::TokenCodec;
use crate::types::{AccountId, SessionId, SessionToken};

/// Session lifetimes and refresh policy.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Lifetime of issued session tokens.
    pub token_ttl: Duration,
    /// Access tokens closer than this to expiry are refreshed before use.
    pub refresh_margin: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(3600),
            refresh_margin: Duration::from_secs(60),
        }
    }
}

/// Result of [`SessionBroker::start_login`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct LoginStart {
    pub session_id: SessionId,
    pub session_token: SessionToken,
    pub authorization_url: String,
    pub expires_in: Duration,
}

/// A provider access token that is valid for at least the refresh margin.
#[derive(Clone)]
#[non_exhaustive]
pub struct LiveCredential {
    pub session_id: SessionId,
    pub access_token: String,
    pub expires_at: OffsetDateTime,
    pub account_id: Option<AccountId>,
}

impl LiveCredential {
    fn from_record(session_id: SessionId, record: CredentialRecord) -> Self {
        Self {
            session_id,
            access_token: record.access_token,
            expires_at: record.expires_at,
            account_id: record.account_id,
        }
    }
}

impl std::fmt::Debug for LiveCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCredential")
            .field("session_id", &self.session_id)
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Where a session stands, as observed without calling the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStatus {
    /// Token issued, OAuth not completed yet.
    PendingOAuth,
    /// Access token usable.
    Authorized {
        expires_at: OffsetDateTime,
        account_id: Option<AccountId>,
    },
    /// Access token expired or about to; the next credential fetch refreshes it.
    Stale {
        expires_at: OffsetDateTime,
        account_id: Option<AccountId>,
    },
}

/// Externally visible failure of a credential fetch.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// Client must (re)run login: bad/expired session token or OAuth never completed.
    #[error("authentication required: {0}")]
    Unauthenticated(#[source] Error),
    /// The provider refused the refresh token; the session's credentials were deleted.
    #[error("reauthorization required: {0}")]
    ReauthorizationRequired(#[source] Error),
    /// Transient provider or store failure; retrying later may succeed.
    #[error("temporarily unavailable: {0}")]
    Unavailable(#[source] Error),
}

impl AccessError {
    /// Collapse an internal failure into "please authenticate" or "retry".
    #[must_use]
    pub fn classify(e: Error) -> Self {
        if e.is_transient() {
            return Self::Unavailable(e);
        }
        match e {
            Error::OAuthRefresh(_) => Self::ReauthorizationRequired(e),
            Error::InvalidToken(_) | Error::NotFound | Error::OAuthExchange(_) => {
                Self::Unauthenticated(e)
            }
            // corrupt records and misconfiguration need an operator, not the user
            other => Self::Unavailable(other),
        }
    }
}

/// Per-session refresh serialization.
///
/// Entries exist only while some caller holds or waits on them.
#[derive(Default)]
struct RefreshGuards {
    slots: Mutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>,
}

struct RefreshGuard<'a> {
    guards: &'a RefreshGuards,
    session_id: SessionId,
    slot: Arc<AsyncMutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl RefreshGuards {
    async fn lock(&self, session_id: &SessionId) -> RefreshGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(*session_id).or_default().clone()
        };
        let held = slot.clone().lock_owned().await;
        RefreshGuard {
            guards: self,
            session_id: *session_id,
            slot,
            held: Some(held),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        let mut slots = self
            .guards
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // one reference in the map, one here: nobody else is waiting
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.session_id);
        }
    }
}

/// Orchestrates token codec, OAuth client and credential store.
///
/// Cheap to share behind an `Arc`; all state lives in the store.
pub struct SessionBroker {
    codec: Arc<TokenCodec>,
    oauth: Arc<OAuthBroker>,
    credentials: CredentialStore,
    settings: SessionSettings,
    refresh_guards: RefreshGuards,
}

impl SessionBroker {
    #[must_use]
    pub fn new(codec: TokenCodec, oauth: OAuthBroker, credentials: CredentialStore) -> Self {
        Self {
            codec: Arc::new(codec),
            oauth: Arc::new(oauth),
            credentials,
            settings: SessionSettings::default(),
            refresh_guards: RefreshGuards::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub fn oauth(&self) -> &OAuthBroker {
        &self.oauth
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Begin a login: new session id, consent URL and session token.
    ///
    /// Only the pending authorization is stored; no credential record exists
    /// until [`complete_oauth`](Self::complete_oauth) succeeds.
    ///
    /// # Errors
    ///
    /// Returns a store error if the pending authorization cannot be saved.
    pub async fn start_login(&self, ttl: Duration, scopes: &[String]) -> Result<LoginStart, Error> {
        let session_id = SessionId::generate();
        let auth_req = self.oauth.build_authorization_url(&session_id, scopes);

        self.credentials.put_pending(&auth_req.pending).await?;
        let session_token = self.codec.issue(&session_id, ttl)?;

        tracing::info!(session_id = %session_id, "Login started");

        Ok(LoginStart {
            session_id,
            session_token,
            authorization_url: auth_req.url,
            expires_in: ttl,
        })
    }

    /// Finish the OAuth flow for `session_id` with the provider's callback values.
    ///
    /// On failure the session stays pending; a state mismatch leaves the
    /// pending authorization in place, any exchange that reached the provider
    /// consumes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OAuthExchange`] if no login is pending, the state does
    /// not match, or the provider rejects the code; a store error if the
    /// record cannot be written.
    pub async fn complete_oauth(
        &self,
        session_id: &SessionId,
        code: &str,
        state: &str,
    ) -> Result<(), Error> {
        let pending = self
            .credentials
            .get_pending(session_id)
            .await?
            .ok_or(Error::OAuthExchange(ProviderFailure::NoPendingAuthorization))?;

        let exchanged = self.oauth.exchange_code(code, state, &pending).await;
        match &exchanged {
            Err(Error::OAuthExchange(ProviderFailure::StateMismatch)) => {
                tracing::warn!(session_id = %session_id, "OAuth state mismatch");
            }
            _ => {
                if let Err(e) = self.credentials.delete_pending(session_id).await {
                    tracing::warn!(session_id = %session_id, error = %e, "Pending authorization cleanup failed");
                }
            }
        }
        let tokens = exchanged.inspect_err(|e| {
            tracing::warn!(session_id = %session_id, error = %e, "Code exchange failed");
        })?;

        let account_id = match self.oauth.fetch_account_id(&tokens.access_token).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Account lookup failed");
                None
            }
        };

        let record = CredentialRecord::from_exchange(tokens, OffsetDateTime::now_utc())?
            .with_account_id(account_id);
        self.credentials.put(session_id, &record).await?;

        tracing::info!(session_id = %session_id, "Provider account linked");
        Ok(())
    }

    /// Return a live provider access token for the session behind `token`.
    ///
    /// Refreshes (at most once per session at a time) when the stored access
    /// token is within the refresh margin of expiry.
    ///
    /// # Errors
    ///
    /// - [`AccessError::Unauthenticated`] if the token is invalid or OAuth never completed
    /// - [`AccessError::ReauthorizationRequired`] if the provider refused the refresh token
    /// - [`AccessError::Unavailable`] on transient provider or store failures
    pub async fn get_live_credential(&self, token: &str) -> Result<LiveCredential, AccessError> {
        let session_id = self.codec.verify(token).map_err(AccessError::Unauthenticated)?;

        let current = self
            .credentials
            .get(&session_id)
            .await
            .map_err(AccessError::classify)?;
        if current.value.is_fresh(OffsetDateTime::now_utc(), self.settings.refresh_margin) {
            return Ok(LiveCredential::from_record(session_id, current.value));
        }

        self.refresh_serialized(session_id).await
    }

    async fn refresh_serialized(&self, session_id: SessionId) -> Result<LiveCredential, AccessError> {
        let _guard = self.refresh_guards.lock(&session_id).await;

        // whoever held the guard before us may already have refreshed
        let current = self
            .credentials
            .get(&session_id)
            .await
            .map_err(AccessError::classify)?;
        if current.value.is_fresh(OffsetDateTime::now_utc(), self.settings.refresh_margin) {
            tracing::debug!(session_id = %session_id, "Credential refreshed by a concurrent request");
            return Ok(LiveCredential::from_record(session_id, current.value));
        }

        let refreshed = self
            .oauth
            .refresh(&current.value.refresh_token)
            .await
            .and_then(|tokens| current.value.refreshed(tokens, OffsetDateTime::now_utc()));
        match refreshed {
            Ok(record) => {
                self.store_refreshed(session_id, current.version, record)
                    .await
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(session_id = %session_id, error = %e, "Token refresh failed transiently");
                Err(AccessError::Unavailable(e))
            }
            Err(e) => self.revoke(session_id, &current, e).await,
        }
    }

    async fn store_refreshed(
        &self,
        session_id: SessionId,
        read_version: u64,
        record: CredentialRecord,
    ) -> Result<LiveCredential, AccessError> {
        let written = self
            .credentials
            .replace(&session_id, read_version, &record)
            .await
            .map_err(AccessError::classify)?;
        if written.is_some() {
            tracing::info!(session_id = %session_id, "Access token refreshed");
            return Ok(LiveCredential::from_record(session_id, record));
        }

        // another process wrote a newer record between our read and write
        let latest = self
            .credentials
            .get(&session_id)
            .await
            .map_err(AccessError::classify)?;
        if latest.value.is_fresh(OffsetDateTime::now_utc(), self.settings.refresh_margin) {
            return Ok(LiveCredential::from_record(session_id, latest.value));
        }
        Err(AccessError::Unavailable(Error::Store {
            operation: "replace",
            detail: "concurrent credential update".into(),
        }))
    }

    /// Handle a refresh the provider refused.
    ///
    /// Deletes the record only if it is still the one whose refresh token was
    /// spent. A record rewritten since (by another instance's refresh or a new
    /// login) is kept.
    async fn revoke(
        &self,
        session_id: SessionId,
        used: &Versioned<CredentialRecord>,
        cause: Error,
    ) -> Result<LiveCredential, AccessError> {
        let deleted = self
            .credentials
            .delete_if_unchanged(&session_id, used.version)
            .await
            .map_err(AccessError::Unavailable)?;

        if !deleted {
            match self.credentials.get(&session_id).await {
                Ok(latest)
                    if latest.value.is_fresh(OffsetDateTime::now_utc(), self.settings.refresh_margin) =>
                {
                    return Ok(LiveCredential::from_record(session_id, latest.value));
                }
                Ok(_) => {
                    tracing::warn!(session_id = %session_id, error = %cause, "Refresh rejected but credentials were rewritten; keeping them");
                    return Err(AccessError::Unavailable(Error::Store {
                        operation: "delete_if_unchanged",
                        detail: "concurrent credential update".into(),
                    }));
                }
                Err(Error::NotFound) => {}
                Err(e) => return Err(AccessError::Unavailable(e)),
            }
        }

        tracing::warn!(session_id = %session_id, error = %cause, "Refresh token rejected; credentials deleted");
        Err(AccessError::ReauthorizationRequired(cause))
    }

    /// Report where the session stands without calling the provider.
    ///
    /// # Errors
    ///
    /// [`AccessError::Unauthenticated`] for invalid tokens, [`AccessError::Unavailable`]
    /// for store failures.
    pub async fn status(&self, token: &str) -> Result<SessionStatus, AccessError> {
        let session_id = self.codec.verify(token).map_err(AccessError::Unauthenticated)?;

        match self.credentials.get(&session_id).await {
            Ok(Versioned { value: record, .. }) => {
                let fresh =
                    record.is_fresh(OffsetDateTime::now_utc(), self.settings.refresh_margin);
                let (expires_at, account_id) = (record.expires_at, record.account_id);
                Ok(if fresh {
                    SessionStatus::Authorized {
                        expires_at,
                        account_id,
                    }
                } else {
                    SessionStatus::Stale {
                        expires_at,
                        account_id,
                    }
                })
            }
            Err(Error::NotFound) => Ok(SessionStatus::PendingOAuth),
            Err(e) => Err(AccessError::classify(e)),
        }
    }

    /// Forget the session's provider credentials.
    ///
    /// The session token itself stays cryptographically valid until it
    /// expires; without a credential record it only ever yields
    /// `Unauthenticated`.
    ///
    /// # Errors
    ///
    /// [`AccessError::Unauthenticated`] for invalid tokens, [`AccessError::Unavailable`]
    /// if the store cannot be reached.
    pub async fn logout(&self, token: &str) -> Result<SessionId, AccessError> {
        let session_id = self.codec.verify(token).map_err(AccessError::Unauthenticated)?;

        self.credentials
            .delete(&session_id)
            .await
            .map_err(AccessError::classify)?;
        self.credentials
            .delete_pending(&session_id)
            .await
            .map_err(AccessError::classify)?;

        tracing::info!(session_id = %session_id, "Session logged out");
        Ok(session_id)
    }

    #[cfg(test)]
    fn refresh_guard_count(&self) -> usize {
        self.refresh_guards.len()
    }
}
