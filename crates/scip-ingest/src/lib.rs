//! Materialization of SCIP indexer output into a per-repo store.
//!
//! Both entry points run a single writer transaction: any decode, schema or
//! statement error rolls the store back to its pre-ingest state.

mod processor;

use serde::{Deserialize, Serialize};

pub use processor::{process_delta, process_full};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to decode SCIP index")]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Store(#[from] index_store::Error),

    #[error("sqlite error")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json serialization error")]
    Json(#[from] serde_json::Error),

    #[error("delta base commit {declared:?} does not match current commit {current:?}")]
    BaseCommitMismatch { declared: String, current: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Upload metadata accompanying a full artifact, parsed from `X-CKB-*`
/// headers by the pipeline.
#[derive(Clone, Debug, Default)]
pub struct IngestMeta {
    pub commit: String,
    pub indexer_name: String,
    pub indexer_version: String,
    /// Languages declared by the uploader; unioned with what the documents
    /// themselves carry.
    pub languages: Vec<String>,
}

/// Delta-only metadata: the declared base, the commit being applied, and the
/// client's change manifest.
#[derive(Clone, Debug, Default)]
pub struct DeltaMeta {
    pub base_commit: String,
    pub target_commit: String,
    pub changed_files: Vec<ChangedFile>,
    pub ingest: IngestMeta,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChangedFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// Outcome of a successful ingest, echoed in the upload response.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ProcessResult {
    pub repo_id: String,
    pub commit: String,
    pub languages: Vec<String>,
    pub file_count: i64,
    pub symbol_count: i64,
    pub ref_count: i64,
    pub call_edges: i64,
    /// For deltas, the pre-change file count; the caller uses it to compute
    /// the change-set percentage.
    pub total_files: i64,
    pub duration_ms: u64,
}
