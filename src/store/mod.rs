//! Durable key-value store interface consumed by the credential store.

mod memory;

pub use memory::MemoryStore;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Error type returned by store backends.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A stored value together with the version it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    /// Increases on every write of the key; used for compare-and-swap.
    pub version: u64,
}

/// Backend-provided key-value persistence.
///
/// Values are serialized credential records and are sensitive: production
/// backends must encrypt them at rest.
///
/// # Example
///
/// ```rust,ignore
/// impl KeyValueStore for RedisStore {
///     async fn get(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>, BoxError> {
///         self.client.hgetall(key).await.map(decode).map_err(Into::into)
///     }
///     // ...
/// }
/// ```
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read a value and its current version.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Versioned<Vec<u8>>>, BoxError>> + Send;

    /// Unconditional upsert. Returns the new version.
    fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<u64, BoxError>> + Send;

    /// Write only if the key currently exists at `expected_version`.
    ///
    /// Returns the new version, or `None` if the key was missing or changed.
    fn put_if_version(
        &self,
        key: &str,
        expected_version: u64,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<Option<u64>, BoxError>> + Send;

    /// Remove a key. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// Remove a key only if it is currently at `expected_version`.
    ///
    /// Returns `false` if the key was missing or changed.
    fn delete_if_version(
        &self,
        key: &str,
        expected_version: u64,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send;
}

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe wrapper for KeyValueStore (needed for Arc<dyn>).
pub(crate) trait KeyValueStoreDyn: Send + Sync {
    fn get_dyn<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Versioned<Vec<u8>>>, BoxError>>;

    fn put_dyn<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<u64, BoxError>>;

    fn put_if_version_dyn<'a>(
        &'a self,
        key: &'a str,
        expected_version: u64,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<Option<u64>, BoxError>>;

    fn delete_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), BoxError>>;

    fn delete_if_version_dyn<'a>(
        &'a self,
        key: &'a str,
        expected_version: u64,
    ) -> BoxFuture<'a, Result<bool, BoxError>>;
}

impl<T: KeyValueStore> KeyValueStoreDyn for T {
    fn get_dyn<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Versioned<Vec<u8>>>, BoxError>> {
        Box::pin(self.get(key))
    }

    fn put_dyn<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<u64, BoxError>> {
        Box::pin(self.put(key, value, ttl))
    }

    fn put_if_version_dyn<'a>(
        &'a self,
        key: &'a str,
        expected_version: u64,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<Option<u64>, BoxError>> {
        Box::pin(self.put_if_version(key, expected_version, value, ttl))
    }

    fn delete_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(self.delete(key))
    }

    fn delete_if_version_dyn<'a>(
        &'a self,
        key: &'a str,
        expected_version: u64,
    ) -> BoxFuture<'a, Result<bool, BoxError>> {
        Box::pin(self.delete_if_version(key, expected_version))
    }
}
