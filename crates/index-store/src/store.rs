use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::rows::{RepoMetadata, RepoStats};
use crate::{schema, Result};

/// An open per-repo store.
///
/// Writable stores are held exclusively by the ingest path for the span of
/// one transaction; read stores are short-lived, opened per request by the
/// repo handle. SQLite connections are not shareable across concurrent
/// readers, so nothing here is `Sync` — callers move a `Store` onto the
/// blocking pool to run queries.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if absent) a writable store and bring its schema up to
    /// date.
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Write-ahead journaling keeps readers unblocked during ingest.
        // rusqlite is finicky about this pragma and requires query_row.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_row| Ok(()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", -64 * 1024)?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;

        schema::ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an existing store for reading only.
    pub fn open_read(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

        conn.pragma_update(None, "query_only", "ON")?;
        conn.pragma_update(None, "cache_size", -32 * 1024)?;
        conn.pragma_update(None, "mmap_size", 128 * 1024 * 1024)?;

        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> Result<i32> {
        schema::schema_version(&self.conn)
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM index_meta WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn put_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Load the denormalized metadata the repo handle caches. Each field is
    /// read by its own query; a failing query defaults that field rather
    /// than failing the load.
    pub fn load_metadata(&self) -> RepoMetadata {
        let meta_string = |key: &str| self.get_meta(key).ok().flatten();

        let commit = meta_string("commit").unwrap_or_default();
        let index_version = meta_string("index_version").unwrap_or_else(|| "1.0".to_string());
        let sync_seq = meta_string("sync_seq")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let indexed_at = meta_string("indexed_at");
        let ref_count: i64 = meta_string("ref_count")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let schema_version = self.schema_version().unwrap_or(0);

        let count = |sql: &str| -> i64 {
            self.conn
                .query_row(sql, [], |row| row.get(0))
                .unwrap_or_default()
        };
        let files = count("SELECT COUNT(*) FROM indexed_files");
        let symbols = count("SELECT COUNT(*) FROM symbol_mappings WHERE state = 'active'");
        let call_edges = count("SELECT COUNT(*) FROM callgraph");

        let languages = self.distinct_languages().unwrap_or_default();

        RepoMetadata {
            commit,
            index_version,
            sync_seq,
            schema_version,
            indexed_at,
            languages,
            stats: RepoStats {
                files,
                symbols,
                refs: ref_count.max(call_edges),
                call_edges,
            },
        }
    }

    /// Distinct languages across active symbols. Derived, never
    /// authoritative.
    fn distinct_languages(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT language FROM symbol_mappings
             WHERE state = 'active' AND language IS NOT NULL AND language != ''
             ORDER BY language",
        )?;
        let languages = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(languages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_upsert_round_trip() {
        let store = Store::in_memory().unwrap();

        assert_eq!(store.get_meta("commit").unwrap(), None);
        store.put_meta("commit", "abc123").unwrap();
        store.put_meta("commit", "def456").unwrap();
        assert_eq!(store.get_meta("commit").unwrap().as_deref(), Some("def456"));
    }

    #[test]
    fn metadata_defaults_on_empty_store() {
        let store = Store::in_memory().unwrap();
        let meta = store.load_metadata();

        assert_eq!(meta.commit, "");
        assert_eq!(meta.index_version, "1.0");
        assert_eq!(meta.sync_seq, 0);
        assert_eq!(meta.schema_version, crate::SCHEMA_VERSION);
        assert_eq!(meta.stats.files, 0);
        assert_eq!(meta.stats.symbols, 0);
        assert!(meta.languages.is_empty());
    }

    #[test]
    fn create_then_reopen_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckb.db");

        let store = Store::create(&path).unwrap();
        store.put_meta("commit", "abc123").unwrap();
        drop(store);

        let read = Store::open_read(&path).unwrap();
        assert_eq!(read.get_meta("commit").unwrap().as_deref(), Some("abc123"));
        // query_only rejects writes.
        assert!(read.put_meta("commit", "nope").is_err());
    }
}
