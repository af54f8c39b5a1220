use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use index_store::{language_for_path, Fingerprint, Location, Store};
use proto_scip::{Document, Index, SymbolInformation, SymbolRole};
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::{ChangeType, DeltaMeta, Error, IngestMeta, ProcessResult, Result};

/// Ingest a full SCIP artifact, replacing the repo's entire index.
pub fn process_full(
    db_path: &Path,
    repo_id: &str,
    artifact: &[u8],
    meta: &IngestMeta,
) -> Result<ProcessResult> {
    let started = Instant::now();
    let index = Index::decode_bytes(artifact)?;

    let store = Store::create(db_path)?;
    let conn = store.conn();
    conn.execute_batch("BEGIN")?;

    let result = (|| {
        conn.execute("DELETE FROM symbol_mappings", [])?;
        conn.execute("DELETE FROM indexed_files", [])?;
        conn.execute("DELETE FROM callgraph", [])?;

        let mut tally = Tally::default();
        for document in &index.documents {
            ingest_document(conn, document, &mut tally)?;
        }

        store.put_meta("commit", &meta.commit)?;
        store.put_meta("indexed_at", &Utc::now().to_rfc3339())?;
        store.put_meta("sync_seq", "1")?;
        store.put_meta("file_count", &tally.files.to_string())?;
        store.put_meta("symbol_count", &tally.symbols.to_string())?;
        store.put_meta("ref_count", &tally.refs.to_string())?;
        if !meta.indexer_name.is_empty() {
            store.put_meta("indexer_name", &meta.indexer_name)?;
            store.put_meta("indexer_version", &meta.indexer_version)?;
        }

        Ok(tally.to_result(repo_id, &meta.commit, &meta.languages, tally.files, started))
    })();

    finish(conn, result)
}

/// Apply a delta artifact on top of `base_commit`. The store's current
/// commit is re-verified inside the transaction; a mismatch changes nothing.
pub fn process_delta(
    db_path: &Path,
    repo_id: &str,
    artifact: &[u8],
    delta: &DeltaMeta,
) -> Result<ProcessResult> {
    let started = Instant::now();
    let index = Index::decode_bytes(artifact)?;

    let store = Store::create(db_path)?;
    let conn = store.conn();
    conn.execute_batch("BEGIN")?;

    let result = (|| {
        let current = store.get_meta("commit")?.unwrap_or_default();
        if current != delta.base_commit {
            return Err(Error::BaseCommitMismatch {
                declared: delta.base_commit.clone(),
                current,
            });
        }

        let total_files: i64 =
            conn.query_row("SELECT COUNT(*) FROM indexed_files", [], |row| row.get(0))?;

        // The change manifest is keyed by both new and old paths, so delta
        // documents for renamed files are recognized under either name.
        let mut change_map = HashMap::new();
        for change in &delta.changed_files {
            change_map.insert(change.path.as_str(), change);
            if let Some(old_path) = &change.old_path {
                change_map.insert(old_path.as_str(), change);
            }
        }

        for change in &delta.changed_files {
            if let Some(old_path) = &change.old_path {
                delete_file_rows(conn, old_path)?;
            }
            if matches!(
                change.change_type,
                ChangeType::Added | ChangeType::Modified | ChangeType::Deleted
            ) {
                delete_file_rows(conn, &change.path)?;
            }
        }

        let mut tally = Tally::default();
        for document in &index.documents {
            let Some(change) = change_map.get(document.relative_path.as_str()) else {
                continue;
            };
            if change.change_type == ChangeType::Deleted {
                continue;
            }
            ingest_document(conn, document, &mut tally)?;
        }

        let sync_seq: i64 = store
            .get_meta("sync_seq")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let file_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM indexed_files", [], |row| row.get(0))?;
        let symbol_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM symbol_mappings WHERE state = 'active'",
            [],
            |row| row.get(0),
        )?;
        let edge_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM callgraph", [], |row| row.get(0))?;

        store.put_meta("commit", &delta.target_commit)?;
        store.put_meta("indexed_at", &Utc::now().to_rfc3339())?;
        store.put_meta("sync_seq", &(sync_seq + 1).to_string())?;
        store.put_meta("file_count", &file_count.to_string())?;
        store.put_meta("symbol_count", &symbol_count.to_string())?;
        store.put_meta("ref_count", &edge_count.to_string())?;

        Ok(tally.to_result(
            repo_id,
            &delta.target_commit,
            &delta.ingest.languages,
            total_files,
            started,
        ))
    })();

    finish(conn, result)
}

fn finish<T>(conn: &Connection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(%rollback_err, "rollback failed after ingest error");
            }
            Err(err)
        }
    }
}

#[derive(Default)]
struct Tally {
    files: i64,
    symbols: i64,
    refs: i64,
    edges: i64,
    languages: BTreeSet<String>,
}

impl Tally {
    fn to_result(
        &self,
        repo_id: &str,
        commit: &str,
        declared_languages: &[String],
        total_files: i64,
        started: Instant,
    ) -> ProcessResult {
        let mut languages = self.languages.clone();
        languages.extend(declared_languages.iter().cloned());
        ProcessResult {
            repo_id: repo_id.to_string(),
            commit: commit.to_string(),
            languages: languages.into_iter().collect(),
            file_count: self.files,
            symbol_count: self.symbols,
            ref_count: self.refs,
            call_edges: self.edges,
            total_files,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn delete_file_rows(conn: &Connection, path: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM symbol_mappings WHERE json_extract(location_json, '$.path') = ?",
        [path],
    )?;
    conn.execute("DELETE FROM callgraph WHERE caller_file = ?", [path])?;
    conn.execute("DELETE FROM indexed_files WHERE path = ?", [path])?;
    Ok(())
}

/// Ingest one SCIP document: its definition occurrences become active symbol
/// rows, reference occurrences of callable symbols become call edges, and
/// the document itself becomes an `indexed_files` row.
fn ingest_document(conn: &Connection, document: &Document, tally: &mut Tally) -> Result<()> {
    let path = document.relative_path.as_str();
    if path.is_empty() {
        return Ok(());
    }

    let info_by_symbol: HashMap<&str, &SymbolInformation> = document
        .symbols
        .iter()
        .map(|info| (info.symbol.as_str(), info))
        .collect();

    let language = if !document.language.is_empty() {
        Some(document.language.to_ascii_lowercase())
    } else {
        language_for_path(path).map(str::to_string)
    };

    let mut insert_symbol = conn.prepare_cached(
        "INSERT INTO symbol_mappings
             (stable_id, state, language, fingerprint_json, location_json)
         VALUES (?1, 'active', ?2, ?3, ?4)
         ON CONFLICT (stable_id) DO UPDATE SET
             state = 'active',
             language = excluded.language,
             fingerprint_json = excluded.fingerprint_json,
             location_json = excluded.location_json,
             deleted_at = NULL,
             deleted_in_state_id = NULL",
    )?;
    let mut insert_edge = conn.prepare_cached(
        "INSERT OR IGNORE INTO callgraph
             (caller_id, callee_id, caller_file, call_line, call_col, call_end_col)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    // First pass: definitions. Callable ones are remembered in position
    // order so references can be attributed to the closest preceding one.
    let mut callable_definitions: Vec<(i32, i32, String)> = Vec::new();
    let mut inserted = Vec::new();

    for occurrence in &document.occurrences {
        let symbol = occurrence.symbol.as_str();
        if symbol.starts_with("local ") || !occurrence.has_role(SymbolRole::Definition) {
            continue;
        }
        let Some((line, col, end_line, end_col)) = occurrence.decoded_range() else {
            continue;
        };

        let info = info_by_symbol.get(symbol).copied();
        let kind = info.map(|info| info.kind()).unwrap_or_default();

        let fingerprint = Fingerprint {
            symbol: symbol.to_string(),
            language: language.clone().unwrap_or_default(),
            kind: kind.as_fingerprint_name().map(str::to_string),
            name: symbol_name(info, symbol),
            documentation: info
                .filter(|info| !info.documentation.is_empty())
                .map(|info| info.documentation.join("\n")),
            signature: None,
        };
        // SCIP ranges are 0-indexed; locations are 1-indexed on the wire.
        let location = Location {
            path: path.to_string(),
            line: i64::from(line) + 1,
            col: i64::from(col) + 1,
            end_line: Some(i64::from(end_line) + 1),
            end_col: Some(i64::from(end_col) + 1),
        };

        insert_symbol.execute(rusqlite::params![
            symbol,
            language,
            serde_json::to_string(&fingerprint)?,
            serde_json::to_string(&location)?,
        ])?;
        if kind.is_callable() || symbol.contains("().") {
            callable_definitions.push((line, col, symbol.to_string()));
        }
        inserted.push(symbol.to_string());
    }
    callable_definitions.sort();

    // Second pass: references. Only occurrences of callable symbols become
    // call edges; the caller is the closest preceding callable definition in
    // this same document, or NULL when there is none (cross-document and
    // nested-closure callers stay unresolved).
    for occurrence in &document.occurrences {
        let symbol = occurrence.symbol.as_str();
        if symbol.starts_with("local ") || occurrence.has_role(SymbolRole::Definition) {
            continue;
        }
        tally.refs += 1;

        let kind = info_by_symbol
            .get(symbol)
            .map(|info| info.kind())
            .unwrap_or_default();
        if !kind.is_callable() && !symbol.contains("().") {
            continue;
        }
        let Some((line, col, _, end_col)) = occurrence.decoded_range() else {
            continue;
        };

        let caller = callable_definitions
            .iter()
            .rev()
            .find(|(def_line, def_col, _)| (*def_line, *def_col) <= (line, col))
            .map(|(_, _, symbol)| symbol.as_str());

        let changed = insert_edge.execute(rusqlite::params![
            caller,
            symbol,
            path,
            i64::from(line) + 1,
            i64::from(col) + 1,
            i64::from(end_col) + 1,
        ])?;
        tally.edges += changed as i64;
    }

    // One indexed_files row per document, content-addressed over the path
    // and the definitions it contributed.
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    for symbol in &inserted {
        hasher.update(symbol.as_bytes());
    }
    let hash = &hex::encode(hasher.finalize())[..16];

    conn.prepare_cached(
        "INSERT OR REPLACE INTO indexed_files (path, hash, indexed_at, symbol_count)
         VALUES (?1, ?2, ?3, ?4)",
    )?
    .execute(rusqlite::params![
        path,
        hash,
        Utc::now().to_rfc3339(),
        inserted.len() as i64,
    ])?;

    tally.files += 1;
    tally.symbols += inserted.len() as i64;
    if let Some(language) = language {
        tally.languages.insert(language);
    }
    Ok(())
}

/// Human-readable symbol name: the indexer's display name when present,
/// otherwise the trailing descriptor of the symbol id.
fn symbol_name(info: Option<&SymbolInformation>, symbol: &str) -> Option<String> {
    if let Some(info) = info {
        if !info.display_name.is_empty() {
            return Some(info.display_name.clone());
        }
    }
    let tail = symbol.trim_end_matches('.').trim_end_matches("()");
    let tail = tail.rsplit(['/', '#', ' ']).next()?.trim_matches('`');
    (!tail.is_empty()).then(|| tail.to_string())
}
