//! Per-repository storage for code-knowledge indexes.
//!
//! Two layers live here: the on-disk layout of the server's data directory
//! (repo directories, `meta.json`, scratch upload files) and the embedded
//! SQLite store holding each repo's symbol, file and call-graph tables.

mod error;
mod layout;
mod queries;
mod rows;
mod schema;
mod store;

pub use error::Error;
pub use layout::{sanitize_id, validate_repo_id, Layout, RepoMeta, RepoSource};
pub use queries::{
    language_for_path, CallgraphFilters, Page, RefFilters, SymbolFilters, MAX_BATCH_GET_IDS,
};
pub use rows::{
    CallEdgeRow, FileRow, Fingerprint, Location, RefRow, RepoMetadata, RepoStats, SymbolRow,
};
pub use schema::SCHEMA_VERSION;
pub use store::Store;

pub type Result<T> = std::result::Result<T, Error>;
