//! Read contracts over a per-repo store.
//!
//! Every list query uses keyset pagination over `rowid`: the caller passes
//! the last primary key it saw, we fetch `limit + 1` rows to detect whether
//! more remain, and totals are best-effort counts with only the
//! `state = 'active'` guard applied. Rows whose stored JSON fails to parse
//! are treated as absent rather than failing the query, though pagination
//! still advances past them.

use rusqlite::types::Value;
use rusqlite::params_from_iter;

use crate::rows::{CallEdgeRow, FileRow, RefRow, SymbolRow};
use crate::store::Store;
use crate::Result;

/// Upper bound on ids accepted by [`Store::batch_get_symbols`].
pub const MAX_BATCH_GET_IDS: usize = 1000;

#[derive(Clone, Debug, Default)]
pub struct SymbolFilters {
    pub language: Option<String>,
    pub kind: Option<String>,
    pub file: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct CallgraphFilters {
    pub caller_id: Option<String>,
    pub callee_id: Option<String>,
    pub caller_file: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct RefFilters {
    pub from_file: Option<String>,
    pub to_symbol_id: Option<String>,
}

/// One page of a keyset-paginated query.
#[derive(Clone, Debug)]
pub struct Page<T> {
    pub rows: Vec<T>,
    /// Primary key to resume from, present only when more rows remain.
    pub next_last_pk: Option<i64>,
    /// Advisory total; unfiltered except for the active-state guard.
    pub total: Option<i64>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            next_last_pk: None,
            total: None,
        }
    }
}

impl Store {
    pub fn query_symbols(
        &self,
        last_pk: Option<i64>,
        limit: usize,
        filters: &SymbolFilters,
    ) -> Result<Page<SymbolRow>> {
        let mut sql = String::from(
            "SELECT rowid, stable_id, state, language, fingerprint_json, location_json
             FROM symbol_mappings WHERE state = 'active'",
        );
        let mut params: Vec<Value> = Vec::new();

        if let Some(last_pk) = last_pk {
            sql.push_str(" AND rowid > ?");
            params.push(Value::Integer(last_pk));
        }
        if let Some(language) = &filters.language {
            sql.push_str(" AND language = ?");
            params.push(Value::Text(language.clone()));
        }
        if let Some(kind) = &filters.kind {
            sql.push_str(" AND json_extract(fingerprint_json, '$.kind') = ?");
            params.push(Value::Text(kind.clone()));
        }
        if let Some(file) = &filters.file {
            sql.push_str(" AND json_extract(location_json, '$.path') = ?");
            params.push(Value::Text(file.clone()));
        }
        sql.push_str(" ORDER BY rowid LIMIT ?");
        params.push(Value::Integer(limit as i64 + 1));

        let mut stmt = self.conn().prepare(&sql)?;
        let mut raw = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let next_last_pk = clip_page(&mut raw, limit, |(rowid, ..)| *rowid);
        let rows = raw
            .into_iter()
            .filter_map(|(rowid, stable_id, state, language, fingerprint, location)| {
                parse_symbol(rowid, stable_id, state, language, &fingerprint, &location)
            })
            .collect();

        let total = self
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM symbol_mappings WHERE state = 'active'",
                [],
                |row| row.get(0),
            )
            .ok();

        Ok(Page {
            rows,
            next_last_pk,
            total,
        })
    }

    pub fn get_symbol(&self, stable_id: &str) -> Result<Option<SymbolRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT rowid, stable_id, state, language, fingerprint_json, location_json
             FROM symbol_mappings WHERE stable_id = ? AND state = 'active'",
        )?;
        let mut rows = stmt.query([stable_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(parse_symbol(
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            &row.get::<_, String>(4)?,
            &row.get::<_, String>(5)?,
        ))
    }

    /// Fetch up to [`MAX_BATCH_GET_IDS`] symbols by id, returning found rows
    /// and the ids with no active row.
    pub fn batch_get_symbols(&self, ids: &[String]) -> Result<(Vec<SymbolRow>, Vec<String>)> {
        assert!(ids.len() <= MAX_BATCH_GET_IDS, "caller enforces the id cap");
        if ids.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT rowid, stable_id, state, language, fingerprint_json, location_json
             FROM symbol_mappings WHERE state = 'active' AND stable_id IN ({placeholders})",
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let rows: Vec<SymbolRow> = raw
            .into_iter()
            .filter_map(|(rowid, stable_id, state, language, fingerprint, location)| {
                parse_symbol(rowid, stable_id, state, language, &fingerprint, &location)
            })
            .collect();

        let found: std::collections::HashSet<&str> =
            rows.iter().map(|row| row.stable_id.as_str()).collect();
        let mut not_found = Vec::new();
        for id in ids {
            if !found.contains(id.as_str()) && !not_found.contains(id) {
                not_found.push(id.clone());
            }
        }
        Ok((rows, not_found))
    }

    pub fn query_files(&self, last_pk: Option<i64>, limit: usize) -> Result<Page<FileRow>> {
        let mut sql = String::from(
            "SELECT rowid, path, hash, mtime, indexed_at, symbol_count FROM indexed_files",
        );
        let mut params: Vec<Value> = Vec::new();
        if let Some(last_pk) = last_pk {
            sql.push_str(" WHERE rowid > ?");
            params.push(Value::Integer(last_pk));
        }
        sql.push_str(" ORDER BY rowid LIMIT ?");
        params.push(Value::Integer(limit as i64 + 1));

        let mut stmt = self.conn().prepare(&sql)?;
        let mut rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok(FileRow {
                    rowid: row.get(0)?,
                    path: row.get(1)?,
                    hash: row.get(2)?,
                    mtime: row.get(3)?,
                    indexed_at: row.get(4)?,
                    symbol_count: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let next_last_pk = clip_page(&mut rows, limit, |row| row.rowid);
        let total = self
            .conn()
            .query_row("SELECT COUNT(*) FROM indexed_files", [], |row| row.get(0))
            .ok();

        Ok(Page {
            rows,
            next_last_pk,
            total,
        })
    }

    pub fn query_callgraph(
        &self,
        last_pk: Option<i64>,
        limit: usize,
        filters: &CallgraphFilters,
    ) -> Result<Page<CallEdgeRow>> {
        let mut sql = String::from(
            "SELECT rowid, caller_id, callee_id, caller_file, call_line, call_col, call_end_col
             FROM callgraph WHERE 1=1",
        );
        let mut params: Vec<Value> = Vec::new();

        if let Some(last_pk) = last_pk {
            sql.push_str(" AND rowid > ?");
            params.push(Value::Integer(last_pk));
        }
        if let Some(caller_id) = &filters.caller_id {
            sql.push_str(" AND caller_id = ?");
            params.push(Value::Text(caller_id.clone()));
        }
        if let Some(callee_id) = &filters.callee_id {
            sql.push_str(" AND callee_id = ?");
            params.push(Value::Text(callee_id.clone()));
        }
        if let Some(caller_file) = &filters.caller_file {
            sql.push_str(" AND caller_file = ?");
            params.push(Value::Text(caller_file.clone()));
        }
        sql.push_str(" ORDER BY rowid LIMIT ?");
        params.push(Value::Integer(limit as i64 + 1));

        let mut stmt = self.conn().prepare(&sql)?;
        let mut rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok(CallEdgeRow {
                    rowid: row.get(0)?,
                    caller_id: row.get(1)?,
                    callee_id: row.get(2)?,
                    caller_file: row.get(3)?,
                    call_line: row.get(4)?,
                    call_col: row.get(5)?,
                    call_end_col: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let next_last_pk = clip_page(&mut rows, limit, |row| row.rowid);
        let total = self
            .conn()
            .query_row("SELECT COUNT(*) FROM callgraph", [], |row| row.get(0))
            .ok();

        Ok(Page {
            rows,
            next_last_pk,
            total,
        })
    }

    /// Phase-1 references, projected from `callgraph` with `kind = "call"`.
    pub fn query_refs(
        &self,
        last_pk: Option<i64>,
        limit: usize,
        filters: &RefFilters,
    ) -> Result<Page<RefRow>> {
        let callgraph_filters = CallgraphFilters {
            caller_file: filters.from_file.clone(),
            callee_id: filters.to_symbol_id.clone(),
            caller_id: None,
        };
        let page = self.query_callgraph(last_pk, limit, &callgraph_filters)?;

        let rows = page
            .rows
            .into_iter()
            .map(|edge| RefRow {
                rowid: edge.rowid,
                language: language_for_path(&edge.caller_file),
                from_file: edge.caller_file,
                line: edge.call_line,
                col: edge.call_col,
                to_symbol_id: edge.callee_id,
                kind: "call",
            })
            .collect();

        Ok(Page {
            rows,
            next_last_pk: page.next_last_pk,
            total: page.total,
        })
    }

    /// Case-sensitive substring search over symbol names. Returns matches and
    /// whether the result set was truncated at `limit`.
    pub fn search_symbols(
        &self,
        query: &str,
        limit: usize,
        filters: &SymbolFilters,
    ) -> Result<(Vec<SymbolRow>, bool)> {
        // instr() rather than LIKE: SQLite's LIKE is case-insensitive for
        // ASCII and would also need escaping of % and _.
        let mut sql = String::from(
            "SELECT rowid, stable_id, state, language, fingerprint_json, location_json
             FROM symbol_mappings
             WHERE state = 'active'
               AND instr(json_extract(fingerprint_json, '$.name'), ?) > 0",
        );
        let mut params: Vec<Value> = vec![Value::Text(query.to_string())];

        if let Some(language) = &filters.language {
            sql.push_str(" AND language = ?");
            params.push(Value::Text(language.clone()));
        }
        if let Some(kind) = &filters.kind {
            sql.push_str(" AND json_extract(fingerprint_json, '$.kind') = ?");
            params.push(Value::Text(kind.clone()));
        }
        if let Some(file) = &filters.file {
            sql.push_str(" AND json_extract(location_json, '$.path') = ?");
            params.push(Value::Text(file.clone()));
        }
        sql.push_str(" ORDER BY rowid LIMIT ?");
        params.push(Value::Integer(limit as i64 + 1));

        let mut stmt = self.conn().prepare(&sql)?;
        let mut raw = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let truncated = raw.len() > limit;
        raw.truncate(limit);

        let rows = raw
            .into_iter()
            .filter_map(|(rowid, stable_id, state, language, fingerprint, location)| {
                parse_symbol(rowid, stable_id, state, language, &fingerprint, &location)
            })
            .collect();
        Ok((rows, truncated))
    }

    /// Case-sensitive substring search over indexed file paths.
    pub fn search_files(&self, query: &str, limit: usize) -> Result<(Vec<FileRow>, bool)> {
        let mut stmt = self.conn().prepare(
            "SELECT rowid, path, hash, mtime, indexed_at, symbol_count
             FROM indexed_files WHERE instr(path, ?) > 0
             ORDER BY rowid LIMIT ?",
        )?;
        let mut rows = stmt
            .query_map(
                params_from_iter([
                    Value::Text(query.to_string()),
                    Value::Integer(limit as i64 + 1),
                ]),
                |row| {
                    Ok(FileRow {
                        rowid: row.get(0)?,
                        path: row.get(1)?,
                        hash: row.get(2)?,
                        mtime: row.get(3)?,
                        indexed_at: row.get(4)?,
                        symbol_count: row.get(5)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let truncated = rows.len() > limit;
        rows.truncate(limit);
        Ok((rows, truncated))
    }
}

/// Drop the probe row of a `limit + 1` fetch, returning the key to resume
/// from when more rows remain.
fn clip_page<T>(rows: &mut Vec<T>, limit: usize, key: impl Fn(&T) -> i64) -> Option<i64> {
    if rows.len() > limit {
        rows.truncate(limit);
        rows.last().map(&key)
    } else {
        None
    }
}

fn parse_symbol(
    rowid: i64,
    stable_id: String,
    state: String,
    language: Option<String>,
    fingerprint_json: &str,
    location_json: &str,
) -> Option<SymbolRow> {
    let fingerprint = match serde_json::from_str(fingerprint_json) {
        Ok(fingerprint) => fingerprint,
        Err(err) => {
            tracing::debug!(%stable_id, %err, "skipping symbol with malformed fingerprint");
            return None;
        }
    };
    let location = match serde_json::from_str(location_json) {
        Ok(location) => location,
        Err(err) => {
            tracing::debug!(%stable_id, %err, "skipping symbol with malformed location");
            return None;
        }
    };
    Some(SymbolRow {
        rowid,
        stable_id,
        state,
        language,
        fingerprint,
        location,
    })
}

/// Best-effort language from a file extension, for the refs projection.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let extension = path.rsplit_once('.').map(|(_, ext)| ext)?;
    match extension {
        "rs" => Some("rust"),
        "go" => Some("go"),
        "py" => Some("python"),
        "ts" | "tsx" => Some("typescript"),
        "js" | "jsx" | "mjs" => Some("javascript"),
        "java" => Some("java"),
        "kt" | "kts" => Some("kotlin"),
        "c" | "h" => Some("c"),
        "cc" | "cpp" | "cxx" | "hpp" => Some("cpp"),
        "cs" => Some("csharp"),
        "rb" => Some("ruby"),
        "php" => Some("php"),
        "swift" => Some("swift"),
        "scala" => Some("scala"),
        "sh" | "bash" => Some("shell"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::{Fingerprint, Location};

    fn seeded_store() -> Store {
        let store = Store::in_memory().unwrap();
        for (id, name, kind, language, path) in [
            ("s1", "alpha", "function", "rust", "src/lib.rs"),
            ("s2", "beta", "method", "rust", "src/lib.rs"),
            ("s3", "gamma", "function", "go", "cmd/main.go"),
            ("s4", "delta", "struct", "rust", "src/types.rs"),
            ("s5", "AlphaMajor", "function", "go", "cmd/main.go"),
        ] {
            insert_symbol(&store, id, name, kind, language, path, "active");
        }
        insert_symbol(&store, "s6", "omega", "function", "rust", "src/old.rs", "deleted");
        store
    }

    fn insert_symbol(
        store: &Store,
        id: &str,
        name: &str,
        kind: &str,
        language: &str,
        path: &str,
        state: &str,
    ) {
        let fingerprint = serde_json::to_string(&Fingerprint {
            symbol: id.to_string(),
            language: language.to_string(),
            kind: Some(kind.to_string()),
            name: Some(name.to_string()),
            documentation: None,
            signature: None,
        })
        .unwrap();
        let location = serde_json::to_string(&Location {
            path: path.to_string(),
            line: 1,
            col: 1,
            end_line: None,
            end_col: None,
        })
        .unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO symbol_mappings
                 (stable_id, state, language, fingerprint_json, location_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, state, language, fingerprint, location],
            )
            .unwrap();
    }

    #[test]
    fn pagination_visits_each_active_row_exactly_once() {
        let store = seeded_store();
        let mut seen = Vec::new();
        let mut last_pk = None;

        loop {
            let page = store
                .query_symbols(last_pk, 2, &SymbolFilters::default())
                .unwrap();
            assert!(page.rows.len() <= 2);
            seen.extend(page.rows.iter().map(|row| row.stable_id.clone()));
            match page.next_last_pk {
                Some(pk) => last_pk = Some(pk),
                None => break,
            }
        }

        assert_eq!(seen, vec!["s1", "s2", "s3", "s4", "s5"]);
    }

    #[test]
    fn filters_compose() {
        let store = seeded_store();

        let page = store
            .query_symbols(
                None,
                10,
                &SymbolFilters {
                    language: Some("rust".to_string()),
                    kind: Some("function".to_string()),
                    file: None,
                },
            )
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].stable_id, "s1");

        let page = store
            .query_symbols(
                None,
                10,
                &SymbolFilters {
                    file: Some("cmd/main.go".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page.rows.len(), 2);

        // Totals stay unfiltered and exclude only non-active rows.
        assert_eq!(page.total, Some(5));
    }

    #[test]
    fn malformed_rows_are_absent_but_do_not_stall_pagination() {
        let store = seeded_store();
        store
            .conn()
            .execute(
                "INSERT INTO symbol_mappings (stable_id, state, fingerprint_json, location_json)
                 VALUES ('bad', 'active', 'not json', '{}')",
                [],
            )
            .unwrap();

        let mut names = Vec::new();
        let mut last_pk = None;
        loop {
            let page = store
                .query_symbols(last_pk, 2, &SymbolFilters::default())
                .unwrap();
            names.extend(page.rows.iter().map(|row| row.stable_id.clone()));
            match page.next_last_pk {
                Some(pk) => last_pk = Some(pk),
                None => break,
            }
        }
        assert!(!names.contains(&"bad".to_string()));
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn get_symbol_only_sees_active_rows() {
        let store = seeded_store();
        assert_eq!(store.get_symbol("s1").unwrap().unwrap().stable_id, "s1");
        assert!(store.get_symbol("s6").unwrap().is_none());
        assert!(store.get_symbol("missing").unwrap().is_none());
    }

    #[test]
    fn batch_get_reports_the_complement() {
        let store = seeded_store();
        let ids: Vec<String> = ["s1", "nope", "s3", "s6", "nope"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (rows, not_found) = store.batch_get_symbols(&ids).unwrap();

        let mut found: Vec<_> = rows.iter().map(|row| row.stable_id.as_str()).collect();
        found.sort();
        assert_eq!(found, vec!["s1", "s3"]);
        assert_eq!(not_found, vec!["nope".to_string(), "s6".to_string()]);
    }

    #[test]
    fn search_is_case_sensitive_and_reports_truncation() {
        let store = seeded_store();

        let (rows, truncated) = store
            .search_symbols("alpha", 10, &SymbolFilters::default())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stable_id, "s1");
        assert!(!truncated);

        let (rows, _) = store
            .search_symbols("Alpha", 10, &SymbolFilters::default())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stable_id, "s5");

        let (rows, truncated) = store
            .search_symbols("a", 2, &SymbolFilters::default())
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(truncated);
    }

    #[test]
    fn symbol_rows_read_back_fully_formed() {
        let store = seeded_store();
        let row = store.get_symbol("s1").unwrap().unwrap();

        let rendered = serde_json::json!({
            "stable_id": row.stable_id,
            "state": row.state,
            "language": row.language,
            "fingerprint": row.fingerprint,
            "location": row.location,
        });
        insta::assert_json_snapshot!(rendered, @r###"
        {
          "fingerprint": {
            "kind": "function",
            "language": "rust",
            "name": "alpha",
            "symbol": "s1"
          },
          "language": "rust",
          "location": {
            "col": 1,
            "line": 1,
            "path": "src/lib.rs"
          },
          "stable_id": "s1",
          "state": "active"
        }
        "###);
    }

    #[test]
    fn refs_project_call_edges() {
        let store = seeded_store();
        store
            .conn()
            .execute(
                "INSERT INTO callgraph (caller_id, callee_id, caller_file, call_line, call_col)
                 VALUES ('s1', 's2', 'src/lib.rs', 10, 5)",
                [],
            )
            .unwrap();
        // The composite key makes duplicate edges idempotent.
        store
            .conn()
            .execute(
                "INSERT OR IGNORE INTO callgraph
                 (caller_id, callee_id, caller_file, call_line, call_col)
                 VALUES ('s1', 's2', 'src/lib.rs', 10, 5)",
                [],
            )
            .unwrap();

        let page = store.query_refs(None, 10, &RefFilters::default()).unwrap();
        assert_eq!(page.rows.len(), 1);
        let reference = &page.rows[0];
        assert_eq!(reference.kind, "call");
        assert_eq!(reference.language, Some("rust"));
        assert_eq!(reference.from_file, "src/lib.rs");
        assert_eq!(reference.to_symbol_id, "s2");

        let page = store
            .query_refs(
                None,
                10,
                &RefFilters {
                    from_file: Some("other.go".to_string()),
                    to_symbol_id: None,
                },
            )
            .unwrap();
        assert!(page.rows.is_empty());
    }
}
