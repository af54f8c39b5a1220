//! The API error taxonomy: every failure maps to a stable code and HTTP
//! status, rendered as `{"error": {"code", "message"}}`.

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::cursor::CursorError;
use crate::manager::ManagerError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    /// The commit clients reconcile against on a delta conflict. Its
    /// presence also selects the flat 409 body shape.
    pub current_commit: Option<String>,
    pub retry_after_seconds: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            current_commit: None,
            retry_after_seconds: None,
        }
    }

    pub fn repo_not_found(id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "repo_not_found",
            format!("repo {id:?} is not registered"),
        )
    }

    pub fn symbol_not_found(id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "symbol_not_found",
            format!("no active symbol {id:?}"),
        )
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn too_large(limit: u64) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "upload_too_large",
            format!("upload exceeds the limit of {limit} bytes"),
        )
    }

    pub fn unsupported_encoding(encoding: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "unsupported_encoding",
            format!("unsupported Content-Encoding {encoding:?}"),
        )
    }

    pub fn base_commit_mismatch(current_commit: String) -> Self {
        let mut err = Self::new(
            StatusCode::CONFLICT,
            "base_commit_mismatch",
            "delta base commit does not match the repo's current commit",
        );
        err.current_commit = Some(current_commit);
        err
    }

    pub fn process_failed(err: &scip_ingest::Error) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "process_failed",
            format!("{err:#}"),
        )
    }

    pub fn disabled() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "index_server_disabled",
            "the index server is disabled by configuration",
        )
    }

    pub fn breaker_open() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "ingest_unavailable",
            "ingest is temporarily unavailable after repeated failures",
        )
    }

    pub fn shed(retry_after_seconds: u64) -> Self {
        let mut err = Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "overloaded",
            "server is over capacity, retry later",
        );
        err.retry_after_seconds = Some(retry_after_seconds);
        err
    }

    pub fn query_error(err: impl std::fmt::Display) -> Self {
        tracing::error!(%err, "query failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query_error",
            "query failed",
        )
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(%err, "internal error");
        // The underlying message stays in the log, not the response.
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "internal error",
        )
    }
}

impl From<CursorError> for ApiError {
    fn from(err: CursorError) -> Self {
        let code = match &err {
            CursorError::EntityMismatch { .. } => "cursor_entity_mismatch",
            _ => "invalid_cursor",
        };
        Self::new(StatusCode::BAD_REQUEST, code, err.to_string())
    }
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::NotFound(id) => Self::repo_not_found(&id),
            ManagerError::AlreadyExists(id) => {
                Self::bad_request("repo_exists", format!("repo {id:?} already exists"))
            }
            ManagerError::ConfigRepoImmutable(id) => Self::forbidden(format!(
                "repo {id:?} is registered from configuration and cannot be deleted",
            )),
            ManagerError::Store(err) => Self::internal(err),
        }
    }
}

impl From<index_store::Error> for ApiError {
    fn from(err: index_store::Error) -> Self {
        match err {
            index_store::Error::RepoNotFound(id) => Self::repo_not_found(&id),
            index_store::Error::InvalidRepoId { id, reason } => Self::bad_request(
                "invalid_repo_id",
                format!("invalid repo id {id:?}: {reason}"),
            ),
            other => Self::query_error(other),
        }
    }
}

impl From<scip_ingest::Error> for ApiError {
    fn from(err: scip_ingest::Error) -> Self {
        match err {
            scip_ingest::Error::BaseCommitMismatch { current, .. } => {
                Self::base_commit_mismatch(current)
            }
            other => Self::process_failed(&other),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{err:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        // The delta conflict body is flat so clients can reconcile without
        // unwrapping the error envelope.
        let body = if let Some(current_commit) = &self.current_commit {
            serde_json::json!({
                "error": self.message,
                "code": self.code,
                "current_commit": current_commit,
            })
        } else {
            serde_json::json!({
                "error": { "code": self.code, "message": self.message },
            })
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after_seconds {
            if let Ok(value) = seconds.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
