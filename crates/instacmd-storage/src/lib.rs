//! instacmd-storage: SQLite-based persistence for snippet sources.
//!
//! Two collections (`commands`, `dev_values`) map a snippet name to its
//! source text. A `meta` table holds one-shot migration flags. Live
//! registrations are never stored; they are rebuilt from these records.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex;

use instacmd_types::{Collection, SnippetRecord, cleanup_code};

/// Set once every stored body has been normalized with `cleanup_code`.
pub const BODY_MIGRATION_FLAG: &str = "updated_body";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Name → source text for one collection, ordered by name.
pub type SnippetMap = BTreeMap<String, String>;

/// SQLite-based storage for snippet records.
#[derive(Clone)]
pub struct SnippetStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SnippetStorage {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let mut conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        init_schema(&mut conn)?;

        tracing::info!("Storage opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        init_schema(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Snapshot of a whole collection.
    pub async fn load(&self, collection: Collection) -> Result<SnippetMap> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            Ok(read_collection(&conn, collection)?)
        })
        .await?
    }

    /// Source text of one snippet.
    pub async fn get(&self, collection: Collection, name: &str) -> Result<Option<String>> {
        let conn = self.conn.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let source = conn
                .query_row(
                    &format!("SELECT source FROM {} WHERE name = ?1", collection.table()),
                    rusqlite::params![name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(source)
        })
        .await?
    }

    /// Full records of a collection, ordered by name.
    pub async fn records(&self, collection: Collection) -> Result<Vec<SnippetRecord>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT name, source, updated_at FROM {} ORDER BY name",
                collection.table()
            ))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(SnippetRecord {
                        name: row.get(0)?,
                        source: row.get(1)?,
                        collection,
                        updated_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?
    }

    /// Scoped read-modify-write over one collection.
    ///
    /// The collection is loaded into a map, `f` mutates it, and the difference
    /// is written back in a single SQLite transaction. The write-back happens
    /// for whatever `f` returns, so a closure bailing out early with an `Err`
    /// value still commits the mutations made before it returned.
    pub async fn transact<T, F>(&self, collection: Collection, f: F) -> Result<T>
    where
        F: FnOnce(&mut SnippetMap) -> T + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let before = read_collection(&conn, collection)?;
            let mut after = before.clone();
            let out = f(&mut after);
            let changed = write_back(&mut conn, collection, &before, &after)?;
            if changed > 0 {
                tracing::debug!(%collection, changed, "Committed snippet changes");
            }
            Ok(out)
        })
        .await?
    }
}

fn init_schema(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS commands (
            name TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS dev_values (
            name TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    // Migration: add updated_at to stores created before it existed (ignore error if present)
    for collection in Collection::all() {
        let _ = conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN updated_at INTEGER NOT NULL DEFAULT 0;",
            collection.table()
        ));
    }

    if !read_flag(conn, BODY_MIGRATION_FLAG)? {
        let normalized = normalize_bodies(conn)?;
        write_flag(conn, BODY_MIGRATION_FLAG, true)?;
        if normalized > 0 {
            tracing::info!(normalized, "Normalized stored snippet bodies");
        }
    }

    Ok(())
}

/// Strip leftover code fences from every stored body.
fn normalize_bodies(conn: &mut Connection) -> rusqlite::Result<usize> {
    let mut total = 0;
    for collection in Collection::all() {
        let before = read_collection(conn, collection)?;
        let after: SnippetMap = before
            .iter()
            .map(|(name, source)| (name.clone(), cleanup_code(source)))
            .collect();
        total += write_back(conn, collection, &before, &after)?;
    }
    Ok(total)
}

fn read_collection(conn: &Connection, collection: Collection) -> rusqlite::Result<SnippetMap> {
    let mut stmt = conn.prepare(&format!(
        "SELECT name, source FROM {}",
        collection.table()
    ))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<SnippetMap>>()?;
    Ok(rows)
}

/// Apply the difference between two snapshots. Returns the number of rows touched.
fn write_back(
    conn: &mut Connection,
    collection: Collection,
    before: &SnippetMap,
    after: &SnippetMap,
) -> rusqlite::Result<usize> {
    let table = collection.table();
    let now = chrono::Utc::now().timestamp_millis();
    let tx = conn.transaction()?;
    let mut changed = 0;

    for name in before.keys().filter(|name| !after.contains_key(*name)) {
        changed += tx.execute(
            &format!("DELETE FROM {table} WHERE name = ?1"),
            rusqlite::params![name],
        )?;
    }

    for (name, source) in after {
        if before.get(name) == Some(source) {
            continue;
        }
        changed += tx.execute(
            &format!(
                "INSERT INTO {table} (name, source, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                    source = excluded.source,
                    updated_at = excluded.updated_at"
            ),
            rusqlite::params![name, source, now],
        )?;
    }

    tx.commit()?;
    Ok(changed)
}

fn read_flag(conn: &Connection, key: &str) -> rusqlite::Result<bool> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.as_deref() == Some("1"))
}

fn write_flag(conn: &Connection, key: &str, value: bool) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        rusqlite::params![key, if value { "1" } else { "0" }],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transact_insert_and_load() {
        let storage = SnippetStorage::open_in_memory().unwrap();
        storage
            .transact(Collection::Commands, |map| {
                map.insert("foo".into(), "return 1".into());
            })
            .await
            .unwrap();

        let commands = storage.load(Collection::Commands).await.unwrap();
        assert_eq!(commands.get("foo").map(String::as_str), Some("return 1"));
        // Collections are independent.
        assert!(storage.load(Collection::DevValues).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let storage = SnippetStorage::open_in_memory().unwrap();
        let result = storage.get(Collection::Commands, "nonexistent").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_transact_remove() {
        let storage = SnippetStorage::open_in_memory().unwrap();
        storage
            .transact(Collection::DevValues, |map| {
                map.insert("a".into(), "return 1".into());
                map.insert("b".into(), "return 2".into());
            })
            .await
            .unwrap();

        let removed = storage
            .transact(Collection::DevValues, |map| map.remove("a"))
            .await
            .unwrap();
        assert_eq!(removed.as_deref(), Some("return 1"));

        let values = storage.load(Collection::DevValues).await.unwrap();
        assert_eq!(values.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_transact_writes_back_on_early_error() {
        let storage = SnippetStorage::open_in_memory().unwrap();
        let result: std::result::Result<(), &str> = storage
            .transact(Collection::Commands, |map| {
                map.insert("partial".into(), "return 1".into());
                Err("bailed out")
            })
            .await
            .unwrap();
        assert!(result.is_err());

        let source = storage.get(Collection::Commands, "partial").await.unwrap();
        assert_eq!(source.as_deref(), Some("return 1"));
    }

    #[tokio::test]
    async fn test_overwrite_updates_source() {
        let storage = SnippetStorage::open_in_memory().unwrap();
        for body in ["return 1", "return 2"] {
            storage
                .transact(Collection::Commands, move |map| {
                    map.insert("foo".into(), body.into());
                })
                .await
                .unwrap();
        }
        let records = storage.records(Collection::Commands).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "return 2");
        assert!(records[0].updated_at > 0);
    }

    #[tokio::test]
    async fn test_records_ordered_by_name() {
        let storage = SnippetStorage::open_in_memory().unwrap();
        storage
            .transact(Collection::Commands, |map| {
                map.insert("zeta".into(), "return 1".into());
                map.insert("alpha".into(), "return 2".into());
            })
            .await
            .unwrap();
        let names: Vec<_> = storage
            .records(Collection::Commands)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_flags() {
        let storage = SnippetStorage::open_in_memory().unwrap();
        let conn = storage.conn.lock().await;
        // A fresh store runs the body migration immediately.
        assert!(read_flag(&conn, BODY_MIGRATION_FLAG).unwrap());
        assert!(!read_flag(&conn, "other").unwrap());
        write_flag(&conn, "other", true).unwrap();
        assert!(read_flag(&conn, "other").unwrap());
    }

    #[tokio::test]
    async fn test_legacy_store_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE commands (name TEXT PRIMARY KEY, source TEXT NOT NULL);
                 CREATE TABLE dev_values (name TEXT PRIMARY KEY, source TEXT NOT NULL);
                 INSERT INTO commands (name, source) VALUES ('foo', '```rust\nreturn 1\n```');",
            )
            .unwrap();
        }

        let storage = SnippetStorage::open(&db_path).unwrap();
        let source = storage.get(Collection::Commands, "foo").await.unwrap();
        assert_eq!(source.as_deref(), Some("return 1"));
        assert!(read_flag(&*storage.conn.lock().await, BODY_MIGRATION_FLAG).unwrap());

        // Reopening leaves already-migrated bodies alone.
        drop(storage);
        let storage = SnippetStorage::open(&db_path).unwrap();
        let records = storage.records(Collection::Commands).await.unwrap();
        assert_eq!(records[0].source, "return 1");
    }
}
