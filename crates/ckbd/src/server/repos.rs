//! Repo lifecycle handlers: list, create, delete, metadata.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::{ensure_enabled, ApiError};
use crate::api::{CreateRepoRequest, Envelope, RepoDetail, RepoList, RepoSummary, ResponseMeta};
use crate::App;

pub async fn list(State(app): State<Arc<App>>) -> Response {
    match list_inner(&app) {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

fn list_inner(app: &App) -> Result<Response, ApiError> {
    ensure_enabled(app)?;
    let repos = app
        .manager
        .list_repos()
        .iter()
        .map(|handle| RepoSummary::new(&handle.meta(), &handle.metadata()))
        .collect();
    Ok(Json(Envelope {
        data: RepoList { repos },
        meta: ResponseMeta::bare(0),
    })
    .into_response())
}

pub async fn create(
    State(app): State<Arc<App>>,
    Json(request): Json<CreateRepoRequest>,
) -> Response {
    match create_inner(&app, &request) {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

fn create_inner(app: &App, request: &CreateRepoRequest) -> Result<Response, ApiError> {
    ensure_enabled(app)?;
    index_store::validate_repo_id(&request.id)?;
    let handle =
        app.manager
            .create_uploaded_repo(&request.id, &request.name, &request.description)?;

    tracing::info!(repo = request.id, "created uploaded repo");
    Ok((
        StatusCode::CREATED,
        Json(Envelope {
            data: RepoSummary::new(&handle.meta(), &handle.metadata()),
            meta: ResponseMeta::bare(0),
        }),
    )
        .into_response())
}

pub async fn delete(State(app): State<Arc<App>>, Path(tail): Path<String>) -> Response {
    let result = (|| {
        ensure_enabled(&app)?;
        app.manager.remove_repo(&tail)?;
        tracing::info!(repo = tail, "deleted uploaded repo");
        Ok::<_, ApiError>(
            Json(Envelope {
                data: serde_json::json!({ "deleted": tail }),
                meta: ResponseMeta::bare(0),
            })
            .into_response(),
        )
    })();
    result.unwrap_or_else(IntoResponse::into_response)
}

pub async fn meta(app: &App, repo_id: &str) -> Result<Response, ApiError> {
    ensure_enabled(app)?;
    let handle = app
        .manager
        .get_repo(repo_id)
        .ok_or_else(|| ApiError::repo_not_found(repo_id))?;
    let metadata = handle.metadata();

    Ok(Json(Envelope {
        data: RepoDetail::new(&handle.meta(), &metadata),
        meta: ResponseMeta::bare(metadata.sync_seq),
    })
    .into_response())
}
