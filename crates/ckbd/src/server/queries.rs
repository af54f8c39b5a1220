//! Query-layer handlers: cursor-paginated, filter-aware reads with
//! redaction applied after filtering.

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::Json;
use index_store::{CallgraphFilters, RefFilters, Store, SymbolFilters, MAX_BATCH_GET_IDS};
use serde::Deserialize;

use super::{ensure_enabled, ApiError};
use crate::api::{
    ApiCallEdge, ApiFile, ApiRef, ApiSymbol, BatchGetData, BatchGetRequest, CallgraphList,
    Envelope, FileList, FileSearch, RefList, ResponseMeta, SymbolList, SymbolSearch,
};
use crate::cursor::{CursorData, CursorEntity};
use crate::manager::RepoHandle;
use crate::App;

/// Query parameters shared by the list, search and graph endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub language: Option<String>,
    pub kind: Option<String>,
    pub file: Option<String>,
    pub from_file: Option<String>,
    pub to_symbol_id: Option<String>,
    pub caller_id: Option<String>,
    pub callee_id: Option<String>,
    pub caller_file: Option<String>,
    pub q: Option<String>,
}

fn repo(app: &App, repo_id: &str) -> Result<Arc<RepoHandle>, ApiError> {
    ensure_enabled(app)?;
    app.manager
        .get_repo(repo_id)
        .ok_or_else(|| ApiError::repo_not_found(repo_id))
}

/// Clamp `limit` and resolve the keyset position from the cursor, enforcing
/// that the cursor was issued for this entity.
fn page_params(
    app: &App,
    params: &ListParams,
    entity: CursorEntity,
) -> Result<(Option<i64>, usize), ApiError> {
    let limit = params
        .limit
        .unwrap_or(app.config.default_page_size)
        .clamp(1, app.config.max_page_size);

    let last_pk = match app
        .cursors
        .decode(params.cursor.as_deref().unwrap_or_default())?
    {
        Some(cursor) => {
            cursor.validate_entity(entity)?;
            cursor.last_pk
        }
        None => None,
    };
    Ok((last_pk, limit))
}

fn next_cursor(
    app: &App,
    entity: CursorEntity,
    next_last_pk: Option<i64>,
    schema_version: i32,
) -> Option<String> {
    next_last_pk
        .map(|pk| app.cursors.encode(&CursorData::keyset(entity, pk, schema_version)))
}

/// Run a read against the repo's store on the blocking pool. A repo that
/// has never ingested anything reads as empty rather than erroring.
async fn run_query<T, F>(handle: Arc<RepoHandle>, query: F) -> Result<T, ApiError>
where
    T: Default + Send + 'static,
    F: FnOnce(&Store) -> index_store::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        if !handle.db_path().is_file() {
            return Ok(T::default());
        }
        let store = handle.open_read()?;
        query(&store)
    })
    .await
    .map_err(ApiError::internal)?
    .map_err(ApiError::query_error)
}

pub async fn list_symbols(
    app: &App,
    repo_id: &str,
    params: &ListParams,
) -> Result<Response, ApiError> {
    let handle = repo(app, repo_id)?;
    let metadata = handle.metadata();
    let (last_pk, limit) = page_params(app, params, CursorEntity::Symbol)?;
    let filters = SymbolFilters {
        language: params.language.clone(),
        kind: params.kind.clone(),
        file: params.file.clone(),
    };

    let page = run_query(handle, move |store| {
        store.query_symbols(last_pk, limit, &filters)
    })
    .await?;

    let mut symbols: Vec<ApiSymbol> = page.rows.into_iter().map(Into::into).collect();
    for symbol in &mut symbols {
        app.redactor.symbol(symbol);
    }

    let cursor = next_cursor(
        app,
        CursorEntity::Symbol,
        page.next_last_pk,
        metadata.schema_version,
    );
    Ok(Json(Envelope {
        data: SymbolList { symbols },
        meta: ResponseMeta::paged(metadata.sync_seq, cursor, page.total),
    })
    .into_response())
}

pub async fn get_symbol(app: &App, repo_id: &str, symbol_id: &str) -> Result<Response, ApiError> {
    let handle = repo(app, repo_id)?;
    let metadata = handle.metadata();

    let id = symbol_id.to_string();
    let row = run_query(handle, move |store| store.get_symbol(&id))
        .await?
        .ok_or_else(|| ApiError::symbol_not_found(symbol_id))?;

    let mut symbol: ApiSymbol = row.into();
    app.redactor.symbol(&mut symbol);

    Ok(Json(Envelope {
        data: symbol,
        meta: ResponseMeta::bare(metadata.sync_seq),
    })
    .into_response())
}

pub async fn batch_get(
    app: &App,
    repo_id: &str,
    body: axum::body::Body,
) -> Result<Response, ApiError> {
    let handle = repo(app, repo_id)?;
    let metadata = handle.metadata();

    let bytes = axum::body::to_bytes(body, 4 * 1024 * 1024)
        .await
        .map_err(|err| ApiError::bad_request("invalid_body", err.to_string()))?;
    let request: BatchGetRequest = serde_json::from_slice(&bytes)
        .map_err(|err| ApiError::bad_request("invalid_body", err.to_string()))?;

    if request.ids.len() > MAX_BATCH_GET_IDS {
        return Err(ApiError::bad_request(
            "too_many_ids",
            format!(
                "batch get accepts at most {MAX_BATCH_GET_IDS} ids, got {}",
                request.ids.len(),
            ),
        ));
    }

    let ids = request.ids;
    let mut all_missing = Vec::new();
    for id in &ids {
        if !all_missing.contains(id) {
            all_missing.push(id.clone());
        }
    }
    let (rows, not_found) = run_query(handle, move |store| {
        store.batch_get_symbols(&ids).map(Some)
    })
    .await?
    .unwrap_or((Vec::new(), all_missing));

    let mut symbols: Vec<ApiSymbol> = rows.into_iter().map(Into::into).collect();
    for symbol in &mut symbols {
        app.redactor.symbol(symbol);
    }

    Ok(Json(Envelope {
        data: BatchGetData { symbols, not_found },
        meta: ResponseMeta::bare(metadata.sync_seq),
    })
    .into_response())
}

pub async fn list_files(
    app: &App,
    repo_id: &str,
    params: &ListParams,
) -> Result<Response, ApiError> {
    let handle = repo(app, repo_id)?;
    let metadata = handle.metadata();
    let (last_pk, limit) = page_params(app, params, CursorEntity::File)?;

    let page = run_query(handle, move |store| store.query_files(last_pk, limit)).await?;

    let mut files: Vec<ApiFile> = page.rows.into_iter().map(Into::into).collect();
    for file in &mut files {
        app.redactor.file(file);
    }

    let cursor = next_cursor(
        app,
        CursorEntity::File,
        page.next_last_pk,
        metadata.schema_version,
    );
    Ok(Json(Envelope {
        data: FileList { files },
        meta: ResponseMeta::paged(metadata.sync_seq, cursor, page.total),
    })
    .into_response())
}

pub async fn list_refs(
    app: &App,
    repo_id: &str,
    params: &ListParams,
) -> Result<Response, ApiError> {
    let handle = repo(app, repo_id)?;
    let metadata = handle.metadata();
    let (last_pk, limit) = page_params(app, params, CursorEntity::Ref)?;
    let filters = RefFilters {
        from_file: params.from_file.clone(),
        to_symbol_id: params.to_symbol_id.clone(),
    };

    let page = run_query(handle, move |store| {
        store.query_refs(last_pk, limit, &filters)
    })
    .await?;

    let mut refs: Vec<ApiRef> = page.rows.into_iter().map(Into::into).collect();
    for reference in &mut refs {
        app.redactor.reference(reference);
    }

    let cursor = next_cursor(
        app,
        CursorEntity::Ref,
        page.next_last_pk,
        metadata.schema_version,
    );
    Ok(Json(Envelope {
        data: RefList { refs },
        meta: ResponseMeta::paged(metadata.sync_seq, cursor, page.total),
    })
    .into_response())
}

pub async fn list_callgraph(
    app: &App,
    repo_id: &str,
    params: &ListParams,
) -> Result<Response, ApiError> {
    let handle = repo(app, repo_id)?;
    let metadata = handle.metadata();
    let (last_pk, limit) = page_params(app, params, CursorEntity::Callgraph)?;
    let filters = CallgraphFilters {
        caller_id: params.caller_id.clone(),
        callee_id: params.callee_id.clone(),
        caller_file: params.caller_file.clone(),
    };

    let page = run_query(handle, move |store| {
        store.query_callgraph(last_pk, limit, &filters)
    })
    .await?;

    let mut edges: Vec<ApiCallEdge> = page.rows.into_iter().map(Into::into).collect();
    for edge in &mut edges {
        app.redactor.call_edge(edge);
    }

    let cursor = next_cursor(
        app,
        CursorEntity::Callgraph,
        page.next_last_pk,
        metadata.schema_version,
    );
    Ok(Json(Envelope {
        data: CallgraphList { edges },
        meta: ResponseMeta::paged(metadata.sync_seq, cursor, page.total),
    })
    .into_response())
}

pub async fn search_symbols(
    app: &App,
    repo_id: &str,
    params: &ListParams,
) -> Result<Response, ApiError> {
    let handle = repo(app, repo_id)?;
    let metadata = handle.metadata();
    let query = require_query(params)?;
    let limit = params
        .limit
        .unwrap_or(app.config.default_page_size)
        .clamp(1, app.config.max_page_size);
    let filters = SymbolFilters {
        language: params.language.clone(),
        kind: params.kind.clone(),
        file: params.file.clone(),
    };

    let (rows, truncated) = run_query(handle, move |store| {
        store
            .search_symbols(&query, limit, &filters)
            .map(|(rows, truncated)| Some((rows, truncated)))
    })
    .await?
    .unwrap_or((Vec::new(), false));

    let mut symbols: Vec<ApiSymbol> = rows.into_iter().map(Into::into).collect();
    for symbol in &mut symbols {
        app.redactor.symbol(symbol);
    }

    Ok(Json(Envelope {
        data: SymbolSearch { symbols, truncated },
        meta: ResponseMeta::bare(metadata.sync_seq),
    })
    .into_response())
}

pub async fn search_files(
    app: &App,
    repo_id: &str,
    params: &ListParams,
) -> Result<Response, ApiError> {
    let handle = repo(app, repo_id)?;
    let metadata = handle.metadata();
    let query = require_query(params)?;
    let limit = params
        .limit
        .unwrap_or(app.config.default_page_size)
        .clamp(1, app.config.max_page_size);

    let (rows, truncated) = run_query(handle, move |store| {
        store
            .search_files(&query, limit)
            .map(|(rows, truncated)| Some((rows, truncated)))
    })
    .await?
    .unwrap_or((Vec::new(), false));

    let mut files: Vec<ApiFile> = rows.into_iter().map(Into::into).collect();
    for file in &mut files {
        app.redactor.file(file);
    }

    Ok(Json(Envelope {
        data: FileSearch { files, truncated },
        meta: ResponseMeta::bare(metadata.sync_seq),
    })
    .into_response())
}

fn require_query(params: &ListParams) -> Result<String, ApiError> {
    params
        .q
        .clone()
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing_parameter", "query parameter q is required"))
}
