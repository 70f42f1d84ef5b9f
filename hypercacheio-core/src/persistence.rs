//! The persistence mirror: a narrow interface over an embedded SQLite
//! table. Every write is best-effort — the in-memory store is the
//! authority, persistence only speeds up a warm restart.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hypercacheio_common::HypercacheError;
use rusqlite::Connection;
use tracing::warn;

/// A single row as read back from `scan()` at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedEntry {
    pub key: String,
    pub value: Vec<u8>,
    /// `None` and `Some(0)` are both "never expires"; `scan` always
    /// normalizes to `None` for the never case.
    pub expiration: Option<u32>,
}

/// Narrow persistence interface the cache store mirrors every mutation
/// through. Implementations must never let an I/O failure propagate back
/// into the caller's in-memory operation — log and return.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn upsert(&self, key: &str, value: &[u8], expiration: Option<u32>);
    async fn delete(&self, key: &str);
    async fn delete_all(&self);
    /// Full scan, used once at boot to warm the in-memory map.
    async fn scan(&self) -> Vec<PersistedEntry>;
}

/// SQLite-backed mirror. A single shared connection is used rather than a
/// pool: SQLite serializes writes internally regardless, so a pool would
/// only add contention without adding throughput.
pub struct SqlitePersistence {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache(
        key TEXT PRIMARY KEY,
        value BLOB NOT NULL,
        expiration INTEGER
    );
    CREATE TABLE IF NOT EXISTS cache_locks(
        key TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        expiration INTEGER
    );
";

impl SqlitePersistence {
    /// Opens (creating if needed) the SQLite file at `path`. Failure here
    /// is fatal at startup.
    pub fn open(path: &Path) -> Result<Self, HypercacheError> {
        let conn = Connection::open(path).map_err(|e| HypercacheError::Persistence(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(|e| HypercacheError::Persistence(e.to_string()))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// An ephemeral, file-less store for tests.
    pub fn open_in_memory() -> Result<Self, HypercacheError> {
        let conn = Connection::open_in_memory().map_err(|e| HypercacheError::Persistence(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(|e| HypercacheError::Persistence(e.to_string()))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn upsert(&self, key: &str, value: &[u8], expiration: Option<u32>) {
        let key = key.to_owned();
        let value = value.to_owned();
        let normalized = expiration.filter(|&e| e != 0);
        let result = self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO cache(key, value, expiration) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expiration = excluded.expiration",
                rusqlite::params![key, value, normalized],
            )
        })
        .await;
        if let Err(e) = result {
            warn!(error = %e, "persistence upsert failed; continuing on in-memory state");
        }
    }

    async fn delete(&self, key: &str) {
        let key = key.to_owned();
        let result = self.with_conn(move |conn| conn.execute("DELETE FROM cache WHERE key = ?1", [key])).await;
        if let Err(e) = result {
            warn!(error = %e, "persistence delete failed; continuing on in-memory state");
        }
    }

    async fn delete_all(&self) {
        let result = self.with_conn(|conn| conn.execute("DELETE FROM cache", [])).await;
        if let Err(e) = result {
            warn!(error = %e, "persistence delete_all failed; continuing on in-memory state");
        }
    }

    async fn scan(&self) -> Vec<PersistedEntry> {
        let result = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT key, value, expiration FROM cache")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(PersistedEntry {
                            key: row.get(0)?,
                            value: row.get(1)?,
                            expiration: row.get::<_, Option<u32>>(2)?.filter(|&e| e != 0),
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await;
        match result {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "persistence scan failed; booting with an empty store");
                Vec::new()
            }
        }
    }
}

impl SqlitePersistence {
    /// Runs a blocking rusqlite operation on the blocking thread pool so the
    /// async caller never stalls the executor on file I/O.
    async fn with_conn<F, T>(&self, f: F) -> rusqlite::Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("persistence connection mutex poisoned");
            f(&conn)
        })
        .await
        .expect("persistence blocking task panicked")
    }
}
