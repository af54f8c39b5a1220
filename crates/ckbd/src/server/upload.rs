//! The upload pipeline: stream the artifact to a scratch file through the
//! negotiated decompressor, verify size bounds, hand it to the SCIP
//! processor, then reload the repo so readers observe the new data. The
//! scratch file is removed on every exit path, including request
//! cancellation, via a drop guard.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::TryStreamExt;
use index_store::{Layout, RepoSource};
use scip_ingest::{ChangedFile, DeltaMeta, IngestMeta, ProcessResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_util::io::StreamReader;

use super::{ensure_enabled, ApiError};
use crate::api::{Envelope, ResponseMeta, UploadData};
use crate::manager::RepoHandle;
use crate::App;

const MIN_UPLOAD_BYTES: u64 = 10;
const PROGRESS_LOG_BYTES: u64 = 10 * 1024 * 1024;
const COPY_BUFFER_BYTES: usize = 64 * 1024;

pub async fn full(
    app: &App,
    repo_id: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    ensure_enabled(app)?;
    index_store::validate_repo_id(repo_id)?;
    check_content_length(app, headers)?;

    // Auto-create on first upload, when allowed.
    let handle = match app.manager.get_repo(repo_id) {
        Some(handle) => handle,
        None if app.config.allow_create_repo => {
            tracing::info!(repo = repo_id, "auto-creating repo on first upload");
            app.manager.create_uploaded_repo(repo_id, repo_id, "")?
        }
        None => return Err(ApiError::repo_not_found(repo_id)),
    };
    refuse_config_repo(&handle)?;
    if !app.breaker.allow() {
        return Err(ApiError::breaker_open());
    }

    let meta = parse_ingest_meta(headers);
    let (raw_bytes, written, scratch) = stream_to_scratch(app, headers, body).await?;

    let db_path = handle.db_path().clone();
    let repo = repo_id.to_string();
    let artifact = tokio::fs::read(scratch.path())
        .await
        .map_err(ApiError::internal)?;
    let outcome = tokio::task::spawn_blocking(move || {
        scip_ingest::process_full(&db_path, &repo, &artifact, &meta)
    })
    .await
    .map_err(ApiError::internal)?;

    let stats = record_outcome(app, repo_id, outcome)?;
    finish_upload(app, repo_id, written);

    Ok(upload_response(
        app,
        repo_id,
        stats,
        compression_ratio(raw_bytes, written),
        None,
    ))
}

pub async fn delta(
    app: &App,
    repo_id: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    ensure_enabled(app)?;
    check_content_length(app, headers)?;

    let handle = app
        .manager
        .get_repo(repo_id)
        .ok_or_else(|| ApiError::repo_not_found(repo_id))?;
    refuse_config_repo(&handle)?;
    if !app.breaker.allow() {
        return Err(ApiError::breaker_open());
    }

    let base_commit = header_value(headers, "x-ckb-base-commit");
    if base_commit.is_empty() {
        return Err(ApiError::bad_request(
            "missing_base_commit",
            "delta uploads require the X-CKB-Base-Commit header",
        ));
    }
    let current_commit = handle.metadata().commit;
    if current_commit != base_commit {
        return Err(ApiError::base_commit_mismatch(current_commit));
    }

    let ingest = parse_ingest_meta(headers);
    let target_commit = match header_value(headers, "x-ckb-target-commit") {
        commit if !commit.is_empty() => commit,
        _ if !ingest.commit.is_empty() => ingest.commit.clone(),
        _ => {
            return Err(ApiError::bad_request(
                "missing_target_commit",
                "delta uploads require X-CKB-Target-Commit or X-CKB-Commit",
            ))
        }
    };
    let changed_files = parse_changed_files(headers)?;

    let delta_meta = DeltaMeta {
        base_commit,
        target_commit,
        changed_files,
        ingest,
    };
    let change_count = delta_meta.changed_files.len() as i64;

    let (raw_bytes, written, scratch) = stream_to_scratch(app, headers, body).await?;

    let db_path = handle.db_path().clone();
    let repo = repo_id.to_string();
    let artifact = tokio::fs::read(scratch.path())
        .await
        .map_err(ApiError::internal)?;
    let outcome = tokio::task::spawn_blocking(move || {
        scip_ingest::process_delta(&db_path, &repo, &artifact, &delta_meta)
    })
    .await
    .map_err(ApiError::internal)?;

    let stats = record_outcome(app, repo_id, outcome)?;
    finish_upload(app, repo_id, written);

    // Past the threshold, a delta churns enough of the repo that a full
    // upload would be cheaper to apply.
    let suggestion = (stats.total_files > 0
        && change_count * 100 > i64::from(app.config.delta_threshold_percent) * stats.total_files)
        .then(|| {
            format!(
                "{change_count} of {} indexed files changed; a full upload is likely cheaper",
                stats.total_files,
            )
        });

    Ok(upload_response(
        app,
        repo_id,
        stats,
        compression_ratio(raw_bytes, written),
        suggestion,
    ))
}

fn refuse_config_repo(handle: &RepoHandle) -> Result<(), ApiError> {
    if handle.source() == RepoSource::Config {
        Err(ApiError::forbidden(
            "config-registered repos are read-only via the API",
        ))
    } else {
        Ok(())
    }
}

fn record_outcome(
    app: &App,
    repo_id: &str,
    outcome: scip_ingest::Result<ProcessResult>,
) -> Result<ProcessResult, ApiError> {
    match outcome {
        Ok(stats) => {
            app.breaker.record_success();
            tracing::info!(
                repo = repo_id,
                files = stats.file_count,
                symbols = stats.symbol_count,
                call_edges = stats.call_edges,
                duration_ms = stats.duration_ms,
                "ingest complete",
            );
            Ok(stats)
        }
        Err(err) => {
            app.breaker.record_failure();
            tracing::warn!(repo = repo_id, %err, "ingest failed");
            Err(err.into())
        }
    }
}

/// Post-commit bookkeeping. Neither step can fail the upload: the data is
/// already durable.
fn finish_upload(app: &App, repo_id: &str, written: u64) {
    metrics::counter!("ckbd_uploads_total").increment(1);
    metrics::counter!("ckbd_upload_bytes_total").increment(written);

    if let Err(err) = app.manager.note_upload(repo_id) {
        tracing::warn!(repo = repo_id, %err, "failed to stamp repo meta after upload");
    }
    if let Err(err) = app.manager.reload_repo(repo_id) {
        tracing::warn!(repo = repo_id, %err, "failed to reload repo after upload");
    }
}

fn upload_response(
    app: &App,
    repo_id: &str,
    stats: ProcessResult,
    compression_ratio: Option<f64>,
    suggestion: Option<String>,
) -> Response {
    let sync_seq = app
        .manager
        .get_repo(repo_id)
        .map(|handle| handle.metadata().sync_seq)
        .unwrap_or_default();

    Json(Envelope {
        data: UploadData {
            status: "ok".to_string(),
            stats,
            compression_ratio,
            suggest_full_upload: suggestion.as_ref().map(|_| true),
            suggest_reason: suggestion,
        },
        meta: ResponseMeta::bare(sync_seq),
    })
    .into_response()
}

fn compression_ratio(raw_bytes: u64, written: u64) -> Option<f64> {
    (raw_bytes > 0 && raw_bytes != written).then(|| written as f64 / raw_bytes as f64)
}

fn check_content_length(app: &App, headers: &HeaderMap) -> Result<(), ApiError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    match declared {
        Some(length) if length > app.config.max_upload_size => {
            Err(ApiError::too_large(app.config.max_upload_size))
        }
        _ => Ok(()),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn parse_ingest_meta(headers: &HeaderMap) -> IngestMeta {
    IngestMeta {
        commit: header_value(headers, "x-ckb-commit"),
        indexer_name: header_value(headers, "x-ckb-indexer-name"),
        indexer_version: header_value(headers, "x-ckb-indexer-version"),
        languages: header_value(headers, "x-ckb-language")
            .split(',')
            .map(str::trim)
            .filter(|language| !language.is_empty())
            .map(str::to_ascii_lowercase)
            .collect(),
    }
}

fn parse_changed_files(headers: &HeaderMap) -> Result<Vec<ChangedFile>, ApiError> {
    let raw = header_value(headers, "x-ckb-changed-files");
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).map_err(|err| {
        ApiError::bad_request(
            "invalid_changed_files",
            format!("failed to parse X-CKB-Changed-Files: {err}"),
        )
    })
}

enum Encoding {
    Identity,
    Gzip,
    Zstd,
}

/// Copy the request body into a scratch file, decompressing per
/// Content-Encoding, bounded at `max_upload_size` and floored at
/// [`MIN_UPLOAD_BYTES`]. Returns raw (wire) bytes read, decompressed bytes
/// written, and the guard owning the scratch file.
async fn stream_to_scratch(
    app: &App,
    headers: &HeaderMap,
    body: Body,
) -> Result<(u64, u64, ScratchGuard), ApiError> {
    let declared = header_value(headers, header::CONTENT_ENCODING.as_str()).to_ascii_lowercase();
    let encoding = match declared.as_str() {
        "" | "identity" => Encoding::Identity,
        "gzip" => Encoding::Gzip,
        "zstd" => Encoding::Zstd,
        other => return Err(ApiError::unsupported_encoding(other)),
    };
    if !app.config.compression_enabled && !matches!(encoding, Encoding::Identity) {
        return Err(ApiError::bad_request(
            "compression_disabled",
            format!("Content-Encoding {declared:?} rejected: compression support is disabled"),
        ));
    }

    let (file, path) = app
        .manager
        .layout()
        .create_upload_file()
        .map_err(ApiError::internal)?;
    let scratch = ScratchGuard {
        layout: app.manager.layout().clone(),
        path,
    };
    let mut file = tokio::fs::File::from_std(file);

    // Count wire bytes as they stream past, before decompression.
    let raw_bytes = Arc::new(AtomicU64::new(0));
    let raw_counter = raw_bytes.clone();
    let stream = body
        .into_data_stream()
        .inspect_ok(move |chunk| {
            raw_counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        })
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
    let reader = StreamReader::new(stream);

    let mut decoder: Box<dyn AsyncRead + Unpin + Send> = match encoding {
        Encoding::Identity => Box::new(reader),
        Encoding::Gzip => Box::new(async_compression::tokio::bufread::GzipDecoder::new(
            BufReader::new(reader),
        )),
        Encoding::Zstd => Box::new(async_compression::tokio::bufread::ZstdDecoder::new(
            BufReader::new(reader),
        )),
    };

    let max = app.config.max_upload_size;
    let mut written: u64 = 0;
    let mut next_progress = PROGRESS_LOG_BYTES;
    let mut buffer = vec![0u8; COPY_BUFFER_BYTES];
    loop {
        let n = decoder.read(&mut buffer).await.map_err(|err| {
            ApiError::bad_request("invalid_body", format!("failed to read upload body: {err}"))
        })?;
        if n == 0 {
            break;
        }
        written += n as u64;
        if written > max {
            return Err(ApiError::too_large(max));
        }
        file.write_all(&buffer[..n])
            .await
            .map_err(ApiError::internal)?;
        if written >= next_progress {
            tracing::info!(written, "upload progress");
            next_progress += PROGRESS_LOG_BYTES;
        }
    }
    file.flush().await.map_err(ApiError::internal)?;

    if written < MIN_UPLOAD_BYTES {
        return Err(ApiError::bad_request(
            "upload_too_small",
            format!("decompressed body is {written} bytes, below the {MIN_UPLOAD_BYTES} byte minimum"),
        ));
    }

    Ok((raw_bytes.load(Ordering::Relaxed), written, scratch))
}

/// Owns the scratch file for the span of one upload, deleting it when
/// dropped — on success, on error, and on request cancellation alike.
struct ScratchGuard {
    layout: Layout,
    path: PathBuf,
}

impl ScratchGuard {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if let Err(err) = self.layout.cleanup_upload(&self.path) {
            tracing::debug!(path = %self.path.display(), %err, "scratch cleanup failed");
        }
    }
}
