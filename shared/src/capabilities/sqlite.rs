use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, instrument};

use super::kv::{KvError, KvKey, KvStore, StorageErrorCode, MAX_VALUE_SIZE};
use crate::get_current_time_ms;

/// Durable [`KvStore`] for native shells, one row per key. Statements run on
/// the blocking pool.
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

fn map_sqlite(e: &rusqlite::Error) -> KvError {
    let code = match e {
        rusqlite::Error::SqliteFailure(inner, _) => match inner.code {
            rusqlite::ErrorCode::DatabaseBusy => StorageErrorCode::Busy,
            rusqlite::ErrorCode::DatabaseLocked => StorageErrorCode::Locked,
            rusqlite::ErrorCode::DiskFull => StorageErrorCode::DiskFull,
            rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                StorageErrorCode::Corrupted
            }
            rusqlite::ErrorCode::PermissionDenied | rusqlite::ErrorCode::ReadOnly => {
                StorageErrorCode::PermissionDenied
            }
            rusqlite::ErrorCode::SystemIoFailure | rusqlite::ErrorCode::CannotOpen => {
                StorageErrorCode::IoError
            }
            _ => StorageErrorCode::Unknown,
        },
        _ => StorageErrorCode::Unknown,
    };
    KvError::storage(code, e.to_string())
}

impl SqliteKvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let conn = Connection::open(path).map_err(|e| map_sqlite(&e))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, KvError> {
        let conn = Connection::open_in_memory().map_err(|e| map_sqlite(&e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, KvError> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );
            ",
        )
        .map_err(|e| map_sqlite(&e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, KvError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| {
                error!("sqlite connection mutex poisoned");
                KvError::storage(StorageErrorCode::Locked, "connection lock poisoned")
            })?;
            op(&guard).map_err(|e| map_sqlite(&e))
        })
        .await
        .map_err(|e| {
            error!(error = %e, "sqlite task did not complete");
            KvError::storage(StorageErrorCode::Unknown, e.to_string())
        })?
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    #[instrument(skip_all, fields(key = %key.raw()))]
    async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
        let raw = key.raw();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![raw],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
        })
        .await
    }

    #[instrument(skip_all, fields(key = %key.raw(), bytes = value.len()))]
    async fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<(), KvError> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(KvError::ValueTooLarge {
                size: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }
        let now = i64::try_from(get_current_time_ms()).unwrap_or(i64::MAX);
        let raw = key.raw();
        self.with_conn(move |conn| {
            conn.execute(
                r"
                INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                ",
                params![raw, value, now],
            )
            .map(|_| ())
        })
        .await
    }

    #[instrument(skip_all, fields(key = %key.raw()))]
    async fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
        let raw = key.raw();
        let removed = self
            .with_conn(move |conn| conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![raw]))
            .await?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::kv::KeyNamespace;

    #[tokio::test]
    async fn in_memory_set_get_delete() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        let key = KvKey::new(KeyNamespace::History, "sos_history").unwrap();

        assert_eq!(store.get(&key).await.unwrap(), None);
        store.set(&key, b"[]".to_vec()).await.unwrap();
        store.set(&key, b"[1]".to_vec()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"[1]".to_vec()));
        assert!(store.delete(&key).await.unwrap());
        assert!(!store.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safehive.db");
        let key = KvKey::new(KeyNamespace::Contacts, "owner-hash").unwrap();

        {
            let store = SqliteKvStore::open(&path).unwrap();
            store.set(&key, b"persisted".to_vec()).await.unwrap();
        }

        let reopened = SqliteKvStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(&key).await.unwrap(),
            Some(b"persisted".to_vec())
        );
    }

    #[tokio::test]
    async fn rejects_oversized_values() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        let key = KvKey::new(KeyNamespace::Profile, "blob").unwrap();
        let result = store.set(&key, vec![0u8; MAX_VALUE_SIZE + 1]).await;
        assert!(matches!(result, Err(KvError::ValueTooLarge { .. })));
    }
}
