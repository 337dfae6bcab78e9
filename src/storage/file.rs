//! Session storage in an embedded redb database file.
//!
//! Records live in a table named after the configured bucket. A second
//! table, `<bucket>-ttl`, indexes every record by insertion time so that
//! the sweep can range-scan stale entries oldest first:
//!
//! ```text
//! <bucket>      session id              -> insert nanos (8) | max age (8) | data
//! <bucket>-ttl  "{insert nanos:020}:id" -> session id
//! ```
//!
//! Saving a record replaces its index entry in the same transaction, so the
//! index always holds exactly one entry per live record.

use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use super::{Connection, StorageError};
use crate::utils::periodic::PeriodicTask;

const HEADER_LEN: usize = 16;
const NANOS_PER_SEC: i64 = 1_000_000_000;
/// Upper bound on waiting for in-flight operations when closing
const CLOSE_GRACE: Duration = Duration::from_secs(5);

struct Tables {
    records: String,
    index: String,
}

impl Tables {
    fn new(bucket: &str) -> Self {
        Self {
            records: bucket.to_string(),
            index: format!("{bucket}-ttl"),
        }
    }

    fn records(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.records)
    }

    fn index(&self) -> TableDefinition<'_, &'static str, &'static str> {
        TableDefinition::new(&self.index)
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn index_key(inserted_at: i64, id: &str) -> String {
    format!("{inserted_at:020}:{id}")
}

fn encode_record(inserted_at: i64, max_age: i64, data: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(HEADER_LEN + data.len());
    record.extend_from_slice(&inserted_at.to_be_bytes());
    record.extend_from_slice(&max_age.to_be_bytes());
    record.extend_from_slice(data);
    record
}

/// Split a stored record into `(inserted_at, max_age, data)`
fn decode_record(record: &[u8]) -> Option<(i64, i64, &[u8])> {
    if record.len() < HEADER_LEN {
        return None;
    }
    let inserted_at = i64::from_be_bytes(record[..8].try_into().ok()?);
    let max_age = i64::from_be_bytes(record[8..HEADER_LEN].try_into().ok()?);
    Some((inserted_at, max_age, &record[HEADER_LEN..]))
}

fn is_expired(inserted_at: i64, max_age: i64, now: i64) -> bool {
    max_age > 0 && inserted_at.saturating_add(max_age.saturating_mul(NANOS_PER_SEC)) <= now
}

/// Embedded-file session storage with optional background expiry sweep
pub struct FileConnection {
    /// `None` once closed
    db: RwLock<Option<Arc<Database>>>,
    tables: Arc<Tables>,
    max_age: Arc<AtomicI64>,
    sweeper: Mutex<Option<PeriodicTask>>,
}

impl FileConnection {
    /// Open or create the database at `path`
    ///
    /// When `sweep_frequency` is non-zero a background task removes records
    /// inserted more than `max_age` seconds ago on every tick; this needs a
    /// running tokio runtime. The limit follows later `set_max_age` calls. With a zero frequency nothing is swept and
    /// expiry is only enforced on read.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or the tables cannot
    /// be initialized
    pub fn open(
        path: &Path,
        bucket: &str,
        max_age: i64,
        sweep_frequency: Duration,
    ) -> Result<Self, StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::Configuration(
                "bucket name must not be empty".to_string(),
            ));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Arc::new(Database::create(path)?);
        let tables = Arc::new(Tables::new(bucket));

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(tables.records())?;
            let _ = write_txn.open_table(tables.index())?;
        }
        write_txn.commit()?;

        let max_age = Arc::new(AtomicI64::new(max_age));
        let sweeper = (!sweep_frequency.is_zero()).then(|| {
            let db = Arc::clone(&db);
            let tables = Arc::clone(&tables);
            let max_age = Arc::clone(&max_age);
            PeriodicTask::spawn(sweep_frequency, false, move || {
                let db = Arc::clone(&db);
                let tables = Arc::clone(&tables);
                let max_age = max_age.load(Ordering::Acquire);
                async move {
                    if max_age <= 0 {
                        return;
                    }
                    let result =
                        tokio::task::spawn_blocking(move || sweep(&db, &tables, max_age, now_nanos()))
                            .await;
                    match result {
                        Ok(Ok(0)) => log::debug!("Session sweep: nothing expired"),
                        Ok(Ok(count)) => log::info!("Session sweep removed {count} expired records"),
                        Ok(Err(e)) => log::warn!("Session sweep failed: {e}"),
                        Err(e) => log::warn!("Session sweep task failed: {e}"),
                    }
                }
            })
        });

        log::debug!(
            "Opened session database {} (bucket {bucket}, sweep every {sweep_frequency:?})",
            path.display()
        );

        Ok(Self {
            db: RwLock::new(Some(db)),
            tables,
            max_age,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Remove every record inserted more than `max_age` seconds ago
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep transaction fails
    pub async fn sweep_expired(&self, max_age: i64) -> Result<usize, StorageError> {
        self.blocking(move |db, tables| sweep(db, tables, max_age, now_nanos()))
            .await
    }

    /// Number of entries in the record table and the time index
    ///
    /// # Errors
    ///
    /// Returns an error if the tables cannot be read
    pub async fn table_sizes(&self) -> Result<(u64, u64), StorageError> {
        self.blocking(|db, tables| {
            let read_txn = db.begin_read()?;
            let records = read_txn.open_table(tables.records())?.len()?;
            let index = read_txn.open_table(tables.index())?.len()?;
            Ok((records, index))
        })
        .await
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database, &Tables) -> Result<T, StorageError> + Send + 'static,
    {
        let db = self
            .db
            .read()
            .map_err(|_| StorageError::Task("database lock poisoned".to_string()))?
            .clone()
            .ok_or(StorageError::Closed)?;
        let tables = Arc::clone(&self.tables);
        tokio::task::spawn_blocking(move || op(&db, &tables)).await?
    }
}

/// Drop the last handle to `db` once in-flight operations have finished
///
/// redb only unlocks the file when the `Database` itself is dropped.
async fn release(mut db: Arc<Database>) {
    let deadline = tokio::time::Instant::now() + CLOSE_GRACE;
    loop {
        match Arc::try_unwrap(db) {
            Ok(db) => {
                drop(db);
                log::debug!("Session database closed");
                return;
            }
            Err(shared) if tokio::time::Instant::now() < deadline => {
                db = shared;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(_) => {
                log::warn!("Session database still in use after {CLOSE_GRACE:?}; closing when idle");
                return;
            }
        }
    }
}

/// Delete index entries up to `now - max_age` and their records in one transaction
fn sweep(db: &Database, tables: &Tables, max_age: i64, now: i64) -> Result<usize, StorageError> {
    let cutoff = now.saturating_sub(max_age.saturating_mul(NANOS_PER_SEC));
    // Every key for a timestamp <= cutoff sorts below this bound
    let upper = format!("{:020}", cutoff.saturating_add(1));

    let write_txn = db.begin_write()?;
    let removed = {
        let mut index = write_txn.open_table(tables.index())?;
        let mut records = write_txn.open_table(tables.records())?;

        let stale = index
            .range(..upper.as_str())?
            .map(|entry| {
                let (key, id) = entry?;
                Ok((key.value().to_string(), id.value().to_string()))
            })
            .collect::<Result<Vec<_>, redb::StorageError>>()?;

        for (key, id) in &stale {
            index.remove(key.as_str())?;
            records.remove(id.as_str())?;
        }
        stale.len()
    };
    write_txn.commit()?;
    Ok(removed)
}

#[async_trait]
impl Connection for FileConnection {
    async fn load(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let id = id.to_string();
        self.blocking(move |db, tables| {
            let read_txn = db.begin_read()?;
            let records = read_txn.open_table(tables.records())?;
            let Some(stored) = records.get(id.as_str())? else {
                return Ok(None);
            };
            let stored = stored.value();
            let Some((inserted_at, max_age, data)) = decode_record(stored) else {
                return Err(StorageError::Corrupt(format!("record {id} has a truncated header")));
            };
            if is_expired(inserted_at, max_age, now_nanos()) {
                return Ok(None);
            }
            Ok(Some(data.to_vec()))
        })
        .await
    }

    async fn save(&self, id: &str, data: &[u8], max_age: i64) -> Result<(), StorageError> {
        let id = id.to_string();
        let data = data.to_vec();
        self.blocking(move |db, tables| {
            let inserted_at = now_nanos();
            let write_txn = db.begin_write()?;
            {
                let mut records = write_txn.open_table(tables.records())?;
                let mut index = write_txn.open_table(tables.index())?;

                let previous = records
                    .get(id.as_str())?
                    .and_then(|stored| decode_record(stored.value()).map(|(at, _, _)| at));
                if let Some(previous) = previous {
                    index.remove(index_key(previous, &id).as_str())?;
                }

                let record = encode_record(inserted_at, max_age, &data);
                records.insert(id.as_str(), record.as_slice())?;
                index.insert(index_key(inserted_at, &id).as_str(), id.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let id = id.to_string();
        self.blocking(move |db, tables| {
            let write_txn = db.begin_write()?;
            {
                let mut records = write_txn.open_table(tables.records())?;
                let mut index = write_txn.open_table(tables.index())?;
                let previous = records
                    .remove(id.as_str())?
                    .and_then(|stored| decode_record(stored.value()).map(|(at, _, _)| at));
                if let Some(previous) = previous {
                    index.remove(index_key(previous, &id).as_str())?;
                }
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        let db = self
            .db
            .write()
            .map_err(|_| StorageError::Task("database lock poisoned".to_string()))?
            .take();
        let sweeper = self
            .sweeper
            .lock()
            .map_err(|_| StorageError::Task("sweeper lock poisoned".to_string()))?
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await?;
            log::debug!("Session sweep stopped");
        }
        if let Some(db) = db {
            release(db).await;
        }
        Ok(())
    }

    fn set_max_age(&self, max_age: i64) {
        self.max_age.store(max_age, Ordering::Release);
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}
