//! Checked-in schema for the per-repo store.
//!
//! `MIGRATIONS[n]` carries the DDL that takes a store from schema version
//! `n` to `n + 1`; `schema_version` holds the number of applied migrations.
//! Cursors embed the version, so a migration invalidates outstanding cursors.

use rusqlite::Connection;

use crate::Result;

pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

const MIGRATIONS: &[&str] = &[
    // v1: base tables.
    r#"
    CREATE TABLE symbol_mappings (
        stable_id              TEXT PRIMARY KEY NOT NULL,
        state                  TEXT NOT NULL DEFAULT 'active',
        fingerprint_json       TEXT NOT NULL,
        location_json          TEXT NOT NULL,
        last_verified_at       TEXT,
        last_verified_state_id TEXT,
        deleted_at             TEXT,
        deleted_in_state_id    TEXT
    );
    CREATE INDEX idx_symbol_mappings_state ON symbol_mappings (state);

    CREATE TABLE indexed_files (
        path         TEXT PRIMARY KEY NOT NULL,
        hash         TEXT NOT NULL,
        mtime        TEXT,
        indexed_at   TEXT NOT NULL,
        symbol_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE callgraph (
        caller_id    TEXT,
        callee_id    TEXT NOT NULL,
        caller_file  TEXT NOT NULL,
        call_line    INTEGER NOT NULL,
        call_col     INTEGER NOT NULL,
        call_end_col INTEGER,
        PRIMARY KEY (caller_file, call_line, call_col, callee_id)
    );
    CREATE INDEX idx_callgraph_caller_file ON callgraph (caller_file);
    CREATE INDEX idx_callgraph_caller_id ON callgraph (caller_id);
    CREATE INDEX idx_callgraph_callee_id ON callgraph (callee_id);

    CREATE TABLE index_meta (
        key   TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    );
    "#,
    // v2: a first-class language column, so the declared `language` query
    // filter is enforced instead of ignored.
    r#"
    ALTER TABLE symbol_mappings ADD COLUMN language TEXT;
    CREATE INDEX idx_symbol_mappings_language ON symbol_mappings (language);
    "#,
];

/// Apply any outstanding migrations. Safe to call on every writable open.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            rowid   INTEGER PRIMARY KEY DEFAULT 0 CHECK (rowid = 0),
            version INTEGER NOT NULL
        );
        INSERT OR IGNORE INTO schema_version (rowid, version) VALUES (0, 0);",
    )?;

    let applied: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    for (index, block) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
        conn.execute_batch(block)?;
        conn.execute(
            "UPDATE schema_version SET version = ?",
            [(index + 1) as i32],
        )?;
        tracing::debug!(version = index + 1, "applied store schema migration");
    }
    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<i32> {
    use rusqlite::OptionalExtension;

    let version = conn
        .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
        .optional()?;
    Ok(version.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_once_and_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // A second pass is a no-op rather than a duplicate-table error.
        ensure_schema(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // The v2 column exists and is indexed.
        conn.execute(
            "INSERT INTO symbol_mappings (stable_id, fingerprint_json, location_json, language)
             VALUES ('s1', '{}', '{}', 'rust')",
            [],
        )
        .unwrap();
        let language: String = conn
            .query_row(
                "SELECT language FROM symbol_mappings WHERE stable_id = 's1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(language, "rust");
    }
}
