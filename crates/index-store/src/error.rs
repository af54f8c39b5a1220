use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("sqlite error")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("json serialization error")]
    Json(#[from] serde_json::Error),

    #[error("repo {0:?} already exists")]
    RepoExists(String),

    #[error("repo {0:?} not found")]
    RepoNotFound(String),

    #[error("invalid repo id {id:?}: {reason}")]
    InvalidRepoId { id: String, reason: &'static str },

    #[error("refusing to remove {0:?}: not within the uploads directory")]
    UploadPathOutsideRoot(PathBuf),
}
