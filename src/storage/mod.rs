//! Persistence backends for encoded session records.
//!
//! A [`Connection`] stores opaque byte blobs under a session identifier and
//! owns the expiry policy for them:
//!
//! - [`MemoryConnection`] keeps records in a locked map and expires them
//!   lazily on read.
//! - [`FileConnection`] keeps records in an embedded redb database with a
//!   time-ordered index that a background task sweeps.
//! - [`RedisConnection`] delegates expiry to the server through key TTLs.
//!
//! Backends are chosen through [`StorageSettings`] and built by
//! [`open_connection`].

use async_trait::async_trait;
use std::sync::Arc;

use crate::settings::StorageSettings;

pub mod file;
pub mod memory;
pub mod redis;

pub use file::FileConnection;
pub use memory::MemoryConnection;
pub use redis::RedisConnection;

/// Errors raised by storage backends
///
/// Only a well formed "not found" is absence; every variant here is a hard
/// failure that callers must not read as "no session".
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("embedded database error: {0}")]
    Database(#[from] ::redb::Error),
    #[error("redis error: {0}")]
    Redis(#[from] bb8_redis::redis::RedisError),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("storage operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage task failed: {0}")]
    Task(String),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
    #[error("storage connection is closed")]
    Closed,
    #[error("invalid storage configuration: {0}")]
    Configuration(String),
}

macro_rules! redb_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StorageError {
                fn from(e: $ty) -> Self {
                    Self::Database(e.into())
                }
            }
        )*
    };
}

redb_error_from!(
    ::redb::DatabaseError,
    ::redb::TransactionError,
    ::redb::TableError,
    ::redb::StorageError,
    ::redb::CommitError,
);

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Durable mapping from session identifier to encoded session bytes
///
/// Implementations must be safe for concurrent use by many requests.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Load the record for `id`
    ///
    /// Returns `Ok(None)` when no live record exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached or read
    async fn load(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `data` under `id` for `max_age` seconds
    ///
    /// # Errors
    ///
    /// Returns an error if the write does not complete
    async fn save(&self, id: &str, data: &[u8], max_age: i64) -> Result<(), StorageError>;

    /// Remove the record for `id`; removing a missing record succeeds
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// Release backend resources and stop background work
    ///
    /// # Errors
    ///
    /// Returns an error if shutdown does not complete cleanly
    async fn close(&self) -> Result<(), StorageError>;

    /// Adopt a new session lifetime for background expiry
    ///
    /// Backends that expire records per write ignore this.
    fn set_max_age(&self, _max_age: i64) {}

    /// Backend name for logs
    fn kind(&self) -> &'static str;
}

/// Build the connection described by `settings`
///
/// `max_age` is the session lifetime the embedded-file sweep uses to decide
/// which records are stale. Must be called from within a tokio runtime when
/// the embedded-file backend sweeps.
///
/// # Errors
///
/// Returns an error if the backend cannot be opened or is misconfigured
pub fn open_connection(
    settings: &StorageSettings,
    max_age: i64,
) -> Result<Arc<dyn Connection>, StorageError> {
    let connection: Arc<dyn Connection> = match settings {
        StorageSettings::Memory => Arc::new(MemoryConnection::new()),
        StorageSettings::File {
            path,
            bucket,
            sweep_frequency_secs,
        } => Arc::new(FileConnection::open(
            path,
            bucket,
            max_age,
            std::time::Duration::from_secs(*sweep_frequency_secs),
        )?),
        StorageSettings::Redis {
            address,
            db,
            key_prefix,
            timeout_secs,
            ..
        } => Arc::new(RedisConnection::connect(&redis::RedisOptions {
            address: address.clone(),
            password: settings.redis_password(),
            db: *db,
            key_prefix: key_prefix.clone(),
            timeout: std::time::Duration::from_secs(*timeout_secs),
            ..redis::RedisOptions::default()
        })?),
    };
    log::info!("Opened {} session storage", connection.kind());
    Ok(connection)
}
