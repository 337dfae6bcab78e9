//! Session storage in a Redis server behind a connection pool.
//!
//! Records are written with `SET key value EX max_age`, so expiry is the
//! server's job and nothing is swept locally. Pooled connections are
//! pinged before they are handed out; a dead one is dropped and replaced.

use async_trait::async_trait;
use bb8::{Pool, RunError};
use bb8_redis::redis::{AsyncCommands, RedisError};
use bb8_redis::RedisConnectionManager;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{Connection, StorageError};

/// Connection settings for [`RedisConnection`]
#[derive(Debug, Clone)]
pub struct RedisOptions {
    /// `host:port`, or a full `redis://` URL
    pub address: String,
    pub password: Option<String>,
    pub db: i64,
    pub key_prefix: String,
    /// Upper bound for acquiring a connection and for each command
    pub timeout: Duration,
    pub max_size: u32,
    pub idle_timeout: Duration,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            password: None,
            db: 0,
            key_prefix: String::new(),
            timeout: Duration::from_secs(5),
            max_size: 16,
            idle_timeout: Duration::from_secs(240),
        }
    }
}

impl RedisOptions {
    /// Render the connection URL, escaping the password
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not form a valid URL
    pub fn connection_url(&self) -> Result<url::Url, StorageError> {
        let invalid = |reason: String| StorageError::Configuration(format!("redis address: {reason}"));
        let raw = if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("redis://{}/{}", self.address, self.db)
        };
        let mut url = url::Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|()| invalid("cannot carry a password".to_string()))?;
        }
        Ok(url)
    }
}

/// Pooled Redis session storage
pub struct RedisConnection {
    pool: Pool<RedisConnectionManager>,
    key_prefix: String,
    timeout: Duration,
    closed: AtomicBool,
}

impl RedisConnection {
    /// Build the pool; connections are opened lazily on first use
    ///
    /// # Errors
    ///
    /// Returns an error if the address or credentials are malformed
    pub fn connect(options: &RedisOptions) -> Result<Self, StorageError> {
        let url = options.connection_url()?;
        let manager = RedisConnectionManager::new(url.as_str())?;
        let pool = Pool::builder()
            .max_size(options.max_size)
            .idle_timeout(Some(options.idle_timeout))
            .connection_timeout(options.timeout)
            .test_on_check_out(true)
            .build_unchecked(manager);

        log::debug!(
            "Configured redis pool for {} (db {}, prefix {:?})",
            url.host_str().unwrap_or("unknown"),
            options.db,
            options.key_prefix
        );

        Ok(Self {
            pool,
            key_prefix: options.key_prefix.clone(),
            timeout: options.timeout,
            closed: AtomicBool::new(false),
        })
    }

    fn key(&self, id: &str) -> String {
        format!("{}{id}", self.key_prefix)
    }

    async fn bounded<T, Fut>(&self, op: Fut) -> Result<T, StorageError>
    where
        Fut: Future<Output = Result<T, StorageError>>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| StorageError::Timeout(self.timeout))?
    }
}

impl From<RunError<RedisError>> for StorageError {
    fn from(e: RunError<RedisError>) -> Self {
        match e {
            RunError::User(e) => Self::Redis(e),
            RunError::TimedOut => Self::Pool("timed out waiting for a connection".to_string()),
        }
    }
}

#[async_trait]
impl Connection for RedisConnection {
    async fn load(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = self.key(id);
        self.bounded(async {
            let mut conn = self.pool.get().await?;
            let data: Option<Vec<u8>> = conn.get(&key).await?;
            Ok(data)
        })
        .await
    }

    async fn save(&self, id: &str, data: &[u8], max_age: i64) -> Result<(), StorageError> {
        let Ok(seconds) = u64::try_from(max_age) else {
            return self.delete(id).await;
        };
        if seconds == 0 {
            return self.delete(id).await;
        }
        let key = self.key(id);
        self.bounded(async {
            let mut conn = self.pool.get().await?;
            conn.set_ex::<_, _, ()>(&key, data, seconds).await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let key = self.key(id);
        self.bounded(async {
            let mut conn = self.pool.get().await?;
            conn.del::<_, ()>(&key).await?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        // Pooled connections are dropped with the pool itself
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_url_from_address() {
        let options = RedisOptions {
            address: "cache.internal:6380".to_string(),
            password: Some("p@ss word".to_string()),
            db: 2,
            ..RedisOptions::default()
        };
        let url = options.connection_url().unwrap();
        assert_eq!(url.host_str(), Some("cache.internal"));
        assert_eq!(url.port(), Some(6380));
        assert_eq!(url.path(), "/2");
        assert!(url.password().is_some());
        assert_ne!(url.password(), Some("p@ss word"));
    }

    #[test]
    fn test_connection_url_passthrough() {
        let options = RedisOptions {
            address: "redis://localhost:6379/0".to_string(),
            ..RedisOptions::default()
        };
        assert_eq!(
            options.connection_url().unwrap().as_str(),
            "redis://localhost:6379/0"
        );
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let options = RedisOptions {
            address: "localhost:6379".to_string(),
            ..RedisOptions::default()
        };
        let conn = RedisConnection::connect(&options).unwrap();
        conn.close().await.unwrap();

        assert!(matches!(conn.load("abc").await, Err(StorageError::Closed)));
        assert!(matches!(conn.save("abc", b"x", 60).await, Err(StorageError::Closed)));
        assert!(matches!(conn.delete("abc").await, Err(StorageError::Closed)));
    }

    // These tests require a running Redis instance and are skipped unless
    // REDIS_URL is set

    fn redis_url() -> Option<String> {
        std::env::var("REDIS_URL").ok()
    }

    async fn connection(prefix: &str) -> Option<RedisConnection> {
        let Some(address) = redis_url() else {
            eprintln!("Skipping Redis test: REDIS_URL not set");
            return None;
        };
        let options = RedisOptions {
            address,
            key_prefix: prefix.to_string(),
            ..RedisOptions::default()
        };
        Some(RedisConnection::connect(&options).unwrap())
    }

    #[tokio::test]
    async fn test_redis_round_trip() {
        let Some(conn) = connection("oidc-gateway-test:").await else {
            return;
        };
        let id = crate::utils::crypto::generate_session_id();
        conn.save(&id, b"payload", 60).await.unwrap();
        assert_eq!(conn.load(&id).await.unwrap().as_deref(), Some(&b"payload"[..]));

        conn.delete(&id).await.unwrap();
        assert_eq!(conn.load(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_redis_ttl_expires_record() {
        let Some(conn) = connection("oidc-gateway-test:").await else {
            return;
        };
        let id = crate::utils::crypto::generate_session_id();
        conn.save(&id, b"payload", 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(conn.load(&id).await.unwrap(), None);
    }
}
