//! Wire types for the HTTP surface: the `{data, meta}` envelope and the
//! outgoing row shapes the redactor operates on.

use chrono::{DateTime, Utc};
use index_store::{
    CallEdgeRow, FileRow, RefRow, RepoMeta, RepoMetadata, RepoSource, RepoStats, SymbolRow,
};
use scip_ingest::ProcessResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub sync_seq: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

impl ResponseMeta {
    pub fn bare(sync_seq: i64) -> Self {
        Self {
            sync_seq,
            timestamp: Utc::now(),
            cursor: None,
            has_more: None,
            total: None,
        }
    }

    pub fn paged(sync_seq: i64, cursor: Option<String>, total: Option<i64>) -> Self {
        Self {
            sync_seq,
            timestamp: Utc::now(),
            has_more: Some(cursor.is_some()),
            cursor,
            total,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ApiSymbol {
    pub stable_id: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_basename: Option<String>,
    pub line: i64,
    pub column: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl From<SymbolRow> for ApiSymbol {
    fn from(row: SymbolRow) -> Self {
        Self {
            stable_id: row.stable_id,
            state: row.state,
            name: row.fingerprint.name,
            kind: row.fingerprint.kind,
            language: row.language,
            file_path: row.location.path,
            file_basename: None,
            line: row.location.line,
            column: row.location.col,
            end_line: row.location.end_line,
            end_column: row.location.end_col,
            documentation: row.fingerprint.documentation,
            signature: row.fingerprint.signature,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ApiFile {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basename: Option<String>,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<String>,
    pub indexed_at: String,
    pub symbol_count: i64,
}

impl From<FileRow> for ApiFile {
    fn from(row: FileRow) -> Self {
        Self {
            path: row.path,
            basename: None,
            hash: row.hash,
            mtime: row.mtime,
            indexed_at: row.indexed_at,
            symbol_count: row.symbol_count,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ApiRef {
    pub from_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_basename: Option<String>,
    pub line: i64,
    pub column: i64,
    pub to_symbol_id: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl From<RefRow> for ApiRef {
    fn from(row: RefRow) -> Self {
        Self {
            from_file: row.from_file,
            from_basename: None,
            line: row.line,
            column: row.col,
            to_symbol_id: row.to_symbol_id,
            kind: row.kind.to_string(),
            language: row.language.map(str::to_string),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ApiCallEdge {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    pub callee_id: String,
    pub caller_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_basename: Option<String>,
    pub call_line: i64,
    pub call_col: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_end_col: Option<i64>,
}

impl From<CallEdgeRow> for ApiCallEdge {
    fn from(row: CallEdgeRow) -> Self {
        Self {
            caller_id: row.caller_id,
            callee_id: row.callee_id,
            caller_file: row.caller_file,
            caller_basename: None,
            call_line: row.call_line,
            call_col: row.call_col,
            call_end_col: row.call_end_col,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SymbolList {
    pub symbols: Vec<ApiSymbol>,
}

#[derive(Debug, Serialize)]
pub struct FileList {
    pub files: Vec<ApiFile>,
}

#[derive(Debug, Serialize)]
pub struct RefList {
    pub refs: Vec<ApiRef>,
}

#[derive(Debug, Serialize)]
pub struct CallgraphList {
    pub edges: Vec<ApiCallEdge>,
}

#[derive(Debug, Serialize)]
pub struct SymbolSearch {
    pub symbols: Vec<ApiSymbol>,
    pub truncated: bool,
}

#[derive(Debug, Serialize)]
pub struct FileSearch {
    pub files: Vec<ApiFile>,
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchGetRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchGetData {
    pub symbols: Vec<ApiSymbol>,
    pub not_found: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRepoRequest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct RepoSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub source: RepoSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_upload_at: Option<DateTime<Utc>>,
    pub commit: String,
}

impl RepoSummary {
    pub fn new(meta: &RepoMeta, metadata: &RepoMetadata) -> Self {
        Self {
            id: meta.id.clone(),
            name: meta.name.clone(),
            description: meta.description.clone(),
            source: meta.source,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            last_upload_at: meta.last_upload_at,
            commit: metadata.commit.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RepoList {
    pub repos: Vec<RepoSummary>,
}

/// Full repo metadata, as served by `GET /index/repos/{id}/meta`.
#[derive(Debug, Serialize)]
pub struct RepoDetail {
    #[serde(flatten)]
    pub summary: RepoSummary,
    pub index_version: String,
    pub sync_seq: i64,
    pub schema_version: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<String>,
    pub languages: Vec<String>,
    pub stats: RepoStats,
}

impl RepoDetail {
    pub fn new(meta: &RepoMeta, metadata: &RepoMetadata) -> Self {
        Self {
            summary: RepoSummary::new(meta, metadata),
            index_version: metadata.index_version.clone(),
            sync_seq: metadata.sync_seq,
            schema_version: metadata.schema_version,
            indexed_at: metadata.indexed_at.clone(),
            languages: metadata.languages.clone(),
            stats: metadata.stats.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadData {
    pub status: String,
    pub stats: ProcessResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggest_full_upload: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggest_reason: Option<String>,
}
