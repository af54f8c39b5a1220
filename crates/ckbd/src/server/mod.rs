use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use crate::admission::Admission;
use crate::App;

mod error;
mod path;
pub mod queries;
pub mod repos;
pub mod upload;

pub use error::ApiError;
pub use queries::ListParams;

/// Build the server's API router. Every request passes through admission
/// before handler dispatch; priority endpoints bypass inside the shedder.
/// The `/metrics` route lives in [`crate::metrics_server`] and is merged in
/// by the binary, since the Prometheus recorder is process-global; it
/// carries its own trace layer so scrapes are logged like any other
/// request.
pub fn build_router(app: Arc<App>) -> axum::Router<()> {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health))
        .route("/index/repos", get(repos::list).post(repos::create))
        .route(
            "/index/repos/*tail",
            get(dispatch_get).post(dispatch_post).delete(repos::delete),
        )
        .layer(axum::middleware::from_fn_with_state(
            app.clone(),
            admission_middleware,
        ))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .on_failure(tower_http::trace::DefaultOnFailure::new().level(tracing::Level::INFO)),
        )
        .with_state(app)
}

async fn health() -> String {
    format!("{}", Utc::now())
}

async fn admission_middleware(
    State(app): State<Arc<App>>,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    match app.shedder.admit(&path).await {
        Admission::Shed => ApiError::shed(app.shedder.retry_after_seconds()).into_response(),
        Admission::Bypass => next.run(req).await,
        Admission::Admitted(permit) => {
            metrics::gauge!("ckbd_requests_in_flight").increment(1.0);
            let started = Instant::now();

            let response = next.run(req).await;

            let elapsed = started.elapsed();
            app.shedder.record_latency(elapsed);
            metrics::histogram!("ckbd_request_duration_seconds").record(elapsed.as_secs_f64());
            metrics::gauge!("ckbd_requests_in_flight").decrement(1.0);
            drop(permit);
            response
        }
    }
}

async fn dispatch_get(
    State(app): State<Arc<App>>,
    Path(tail): Path<String>,
    Query(params): Query<ListParams>,
) -> Response {
    let result = match path::parse_get(&tail) {
        Some(path::GetRoute::Meta(repo)) => repos::meta(&app, repo).await,
        Some(path::GetRoute::Symbols(repo)) => queries::list_symbols(&app, repo, &params).await,
        Some(path::GetRoute::Symbol { repo, symbol }) => {
            queries::get_symbol(&app, repo, symbol).await
        }
        Some(path::GetRoute::Files(repo)) => queries::list_files(&app, repo, &params).await,
        Some(path::GetRoute::Refs(repo)) => queries::list_refs(&app, repo, &params).await,
        Some(path::GetRoute::Callgraph(repo)) => {
            queries::list_callgraph(&app, repo, &params).await
        }
        Some(path::GetRoute::SearchSymbols(repo)) => {
            queries::search_symbols(&app, repo, &params).await
        }
        Some(path::GetRoute::SearchFiles(repo)) => {
            queries::search_files(&app, repo, &params).await
        }
        None => Err(ApiError::repo_not_found(&tail)),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

async fn dispatch_post(
    State(app): State<Arc<App>>,
    Path(tail): Path<String>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Response {
    let result = match path::parse_post(&tail) {
        Some(path::PostRoute::Upload(repo)) => upload::full(&app, repo, &headers, body).await,
        Some(path::PostRoute::UploadDelta(repo)) => {
            upload::delta(&app, repo, &headers, body).await
        }
        Some(path::PostRoute::BatchGet(repo)) => queries::batch_get(&app, repo, body).await,
        None => Err(ApiError::repo_not_found(&tail)),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

pub(crate) fn ensure_enabled(app: &App) -> Result<(), ApiError> {
    if app.config.index_enabled {
        Ok(())
    } else {
        Err(ApiError::disabled())
    }
}
