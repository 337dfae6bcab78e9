use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Connection, StorageError};

struct StoredRecord {
    data: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }
}

/// Process-local session storage
///
/// Expiry is checked when a record is read; nothing sweeps the map, since
/// records cannot outlive the process anyway.
#[derive(Default)]
pub struct MemoryConnection {
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl MemoryConnection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held, expired or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StorageError {
    StorageError::Task("memory store lock poisoned".to_string())
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn load(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let now = Utc::now();
        {
            let records = self.records.read().map_err(poisoned)?;
            match records.get(id) {
                None => return Ok(None),
                Some(record) if !record.is_expired(now) => return Ok(Some(record.data.clone())),
                Some(_) => {}
            }
        }
        // Expired: drop it while we are here
        let mut records = self.records.write().map_err(poisoned)?;
        if records.get(id).is_some_and(|record| record.is_expired(now)) {
            records.remove(id);
        }
        Ok(None)
    }

    async fn save(&self, id: &str, data: &[u8], max_age: i64) -> Result<(), StorageError> {
        let expires_at = if max_age > 0 {
            let expiry = Duration::try_seconds(max_age)
                .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
                .ok_or_else(|| {
                    StorageError::Configuration(format!("session max age {max_age}s is out of range"))
                })?;
            Some(expiry)
        } else {
            None
        };
        self.records.write().map_err(poisoned)?.insert(
            id.to_string(),
            StoredRecord {
                data: data.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.records.write().map_err(poisoned)?.remove(id);
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.records.write().map_err(poisoned)?.clear();
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
