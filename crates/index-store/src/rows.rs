use serde::{Deserialize, Serialize};

/// Indexer-assigned identity and shape of a symbol, stored as JSON in
/// `symbol_mappings.fingerprint_json`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Fingerprint {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Source position of a symbol definition, 1-indexed, stored as JSON in
/// `symbol_mappings.location_json`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Location {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub line: i64,
    #[serde(default)]
    pub col: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_col: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SymbolRow {
    pub rowid: i64,
    pub stable_id: String,
    pub state: String,
    pub language: Option<String>,
    pub fingerprint: Fingerprint,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileRow {
    pub rowid: i64,
    pub path: String,
    pub hash: String,
    pub mtime: Option<String>,
    pub indexed_at: String,
    pub symbol_count: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CallEdgeRow {
    pub rowid: i64,
    pub caller_id: Option<String>,
    pub callee_id: String,
    pub caller_file: String,
    pub call_line: i64,
    pub call_col: i64,
    pub call_end_col: Option<i64>,
}

/// Phase-1 reference: a `callgraph` row projected as a `kind="call"`
/// reference, with the language derived from the caller file extension.
#[derive(Clone, Debug, PartialEq)]
pub struct RefRow {
    pub rowid: i64,
    pub from_file: String,
    pub line: i64,
    pub col: i64,
    pub to_symbol_id: String,
    pub kind: &'static str,
    pub language: Option<&'static str>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RepoStats {
    pub files: i64,
    pub symbols: i64,
    pub refs: i64,
    pub call_edges: i64,
}

/// Denormalized per-repo metadata, cached on the repo handle and refreshed
/// on open and reload.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RepoMetadata {
    pub commit: String,
    pub index_version: String,
    pub sync_seq: i64,
    pub schema_version: i32,
    pub indexed_at: Option<String>,
    pub languages: Vec<String>,
    pub stats: RepoStats,
}
