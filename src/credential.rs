//! Per-session credential records and their persistence.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use crate::error::{Error, ProviderFailure};
use crate::oauth::ProviderTokens;
use crate::retry::RetryPolicy;
use crate::store::{KeyValueStore, KeyValueStoreDyn, Versioned};
use crate::types::{AccountId, SessionId};

const CREDENTIAL_PREFIX: &str = "credential:";
const PENDING_PREFIX: &str = "pending:";

/// Provider credentials held server-side for one session.
///
/// Written only after a successful code exchange; replaced wholesale on
/// refresh. Both tokens are redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(default)]
    pub account_id: Option<AccountId>,
    /// Scopes granted by the provider (space separated, as returned).
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub linked_at: OffsetDateTime,
}

impl CredentialRecord {
    /// Record for a fresh code exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OAuthExchange`] if the provider omitted the refresh
    /// token or sent an `expires_in` that cannot be represented.
    pub fn from_exchange(tokens: ProviderTokens, now: OffsetDateTime) -> Result<Self, Error> {
        let refresh_token = tokens.refresh_token.ok_or_else(|| {
            Error::OAuthExchange(ProviderFailure::Malformed("missing refresh_token".into()))
        })?;
        let expires_at = expiry(now, tokens.expires_in).map_err(Error::OAuthExchange)?;
        Ok(Self {
            access_token: tokens.access_token,
            refresh_token,
            expires_at,
            account_id: None,
            scope: tokens.scope,
            linked_at: now,
        })
    }

    /// Record after a refresh. Keeps the previous refresh token and scope
    /// when the provider does not rotate them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OAuthRefresh`] if `expires_in` cannot be represented.
    pub fn refreshed(&self, tokens: ProviderTokens, now: OffsetDateTime) -> Result<Self, Error> {
        let expires_at = expiry(now, tokens.expires_in).map_err(Error::OAuthRefresh)?;
        Ok(Self {
            access_token: tokens.access_token,
            refresh_token: tokens
                .refresh_token
                .unwrap_or_else(|| self.refresh_token.clone()),
            expires_at,
            account_id: self.account_id.clone(),
            scope: tokens.scope.or_else(|| self.scope.clone()),
            linked_at: self.linked_at,
        })
    }

    #[must_use]
    pub fn with_account_id(mut self, account_id: Option<AccountId>) -> Self {
        self.account_id = account_id;
        self
    }

    /// Whether the access token stays valid for more than `margin` after `now`.
    #[must_use]
    pub fn is_fresh(&self, now: OffsetDateTime, margin: Duration) -> bool {
        time::Duration::try_from(margin)
            .ok()
            .and_then(|margin| now.checked_add(margin))
            .is_some_and(|deadline| deadline < self.expires_at)
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("account_id", &self.account_id)
            .field("scope", &self.scope)
            .field("linked_at", &self.linked_at)
            .finish()
    }
}

/// Login attempt awaiting the provider callback.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct PendingAuthorization {
    pub session_id: SessionId,
    pub state: String,
    pub code_verifier: String,
    pub scopes: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl std::fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("session_id", &self.session_id)
            .field("scopes", &self.scopes)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Timeouts, retries and TTLs for store access.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Upper bound on every single backend call.
    pub op_timeout: Duration,
    pub retry: RetryPolicy,
    /// Lifetime of a pending authorization.
    pub pending_ttl: Duration,
    /// Optional lifetime of credential records; `None` leaves expiry to the backend.
    pub credential_ttl: Option<Duration>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            pending_ttl: Duration::from_secs(600),
            credential_ttl: None,
        }
    }
}

/// Typed access to credential records and pending authorizations.
///
/// Every backend call is bounded by [`StoreSettings::op_timeout`] and
/// transient failures are retried per [`StoreSettings::retry`].
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn KeyValueStoreDyn>,
    settings: StoreSettings,
}

impl CredentialStore {
    #[must_use]
    pub fn new<S: KeyValueStore>(backend: Arc<S>) -> Self {
        Self {
            backend,
            settings: StoreSettings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: StoreSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Upsert the record for `session_id`. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails after retries.
    pub async fn put(&self, session_id: &SessionId, record: &CredentialRecord) -> Result<u64, Error> {
        let key = credential_key(session_id);
        let value = encode(record)?;
        let ttl = self.settings.credential_ttl;
        self.settings
            .retry
            .run("put", || {
                self.bounded("put", self.backend.put_dyn(&key, value.clone(), ttl))
            })
            .await
    }

    /// Load the record for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if OAuth never completed for the session,
    /// [`Error::Corrupt`] if the stored value cannot be decoded.
    pub async fn get(&self, session_id: &SessionId) -> Result<Versioned<CredentialRecord>, Error> {
        let key = credential_key(session_id);
        let stored = self
            .settings
            .retry
            .run("get", || self.bounded("get", self.backend.get_dyn(&key)))
            .await?
            .ok_or(Error::NotFound)?;

        Ok(Versioned {
            value: decode(&stored.value)?,
            version: stored.version,
        })
    }

    /// Compare-and-swap the record. Returns `None` if someone else wrote it
    /// since `expected_version` was read.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails after retries.
    pub async fn replace(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        record: &CredentialRecord,
    ) -> Result<Option<u64>, Error> {
        let key = credential_key(session_id);
        let value = encode(record)?;
        let ttl = self.settings.credential_ttl;
        self.settings
            .retry
            .run("replace", || {
                self.bounded(
                    "replace",
                    self.backend
                        .put_if_version_dyn(&key, expected_version, value.clone(), ttl),
                )
            })
            .await
    }

    /// Remove the record for `session_id`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails after retries.
    pub async fn delete(&self, session_id: &SessionId) -> Result<(), Error> {
        let key = credential_key(session_id);
        self.settings
            .retry
            .run("delete", || self.bounded("delete", self.backend.delete_dyn(&key)))
            .await
    }

    /// Remove the record only if it is still at `expected_version`.
    ///
    /// Returns `false` if the record is gone or was rewritten since.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails after retries.
    pub async fn delete_if_unchanged(
        &self,
        session_id: &SessionId,
        expected_version: u64,
    ) -> Result<bool, Error> {
        let key = credential_key(session_id);
        self.settings
            .retry
            .run("delete_if_unchanged", || {
                self.bounded(
                    "delete_if_unchanged",
                    self.backend.delete_if_version_dyn(&key, expected_version),
                )
            })
            .await
    }

    /// Store a pending authorization until the callback arrives.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails after retries.
    pub async fn put_pending(&self, pending: &PendingAuthorization) -> Result<(), Error> {
        let key = pending_key(&pending.session_id);
        let value = encode(pending)?;
        let ttl = Some(self.settings.pending_ttl);
        self.settings
            .retry
            .run("put_pending", || {
                self.bounded("put_pending", self.backend.put_dyn(&key, value.clone(), ttl))
            })
            .await
            .map(|_| ())
    }

    /// Load the pending authorization for `session_id`, if it has not expired.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails after retries.
    pub async fn get_pending(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<PendingAuthorization>, Error> {
        let key = pending_key(session_id);
        self.settings
            .retry
            .run("get_pending", || {
                self.bounded("get_pending", self.backend.get_dyn(&key))
            })
            .await?
            .map(|stored| decode(&stored.value))
            .transpose()
    }

    /// Remove the pending authorization for `session_id`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails after retries.
    pub async fn delete_pending(&self, session_id: &SessionId) -> Result<(), Error> {
        let key = pending_key(session_id);
        self.settings
            .retry
            .run("delete_pending", || {
                self.bounded("delete_pending", self.backend.delete_dyn(&key))
            })
            .await
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, crate::store::BoxError>>,
    ) -> Result<T, Error> {
        tokio::time::timeout(self.settings.op_timeout, fut)
            .await
            .map_err(|_| Error::StoreTimeout(operation))?
            .map_err(|e| Error::Store {
                operation,
                detail: e.to_string(),
            })
    }
}

fn expiry(now: OffsetDateTime, expires_in: u64) -> Result<OffsetDateTime, ProviderFailure> {
    i64::try_from(expires_in)
        .ok()
        .and_then(|secs| now.checked_add(time::Duration::seconds(secs)))
        .ok_or_else(|| ProviderFailure::Malformed(format!("expires_in out of range: {expires_in}")))
}

fn credential_key(session_id: &SessionId) -> String {
    format!("{CREDENTIAL_PREFIX}{session_id}")
}

fn pending_key(session_id: &SessionId) -> String {
    format!("{PENDING_PREFIX}{session_id}")
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(value).map_err(|e| Error::Corrupt(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(bytes).map_err(|e| Error::Corrupt(e.to_string()))
}
