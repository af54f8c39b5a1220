//! End-to-end scenarios driven through the router: create → upload → query,
//! delta preconditions, privacy redaction, batch bounds, content-encoding
//! negotiation, and admission behavior.

use std::io::Write as _;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use ckbd::config::Config;
use ckbd::cursor::CursorCodec;
use ckbd::manager::RepoManager;
use ckbd::{server, App};
use index_store::Layout;
use proto_scip::{Document, Index, Metadata, Occurrence, SymbolInformation, SymbolRole, ToolInfo};
use tower::ServiceExt;

struct TestServer {
    app: Arc<App>,
    router: axum::Router,
    _dir: tempfile::TempDir,
}

fn server() -> TestServer {
    server_with(|_| {})
}

fn server_with(customize: impl FnOnce(&mut Config)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    customize(&mut config);

    let layout = Layout::new(dir.path());
    layout.ensure().unwrap();
    let manager = RepoManager::new(layout, &[]).unwrap();
    let app = Arc::new(App::new(config, manager, CursorCodec::new(b"test-secret")));

    TestServer {
        router: server::build_router(app.clone()),
        app,
        _dir: dir,
    }
}

async fn send(server: &TestServer, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = server.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get(server: &TestServer, uri: &str) -> (StatusCode, serde_json::Value) {
    send(
        server,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

async fn post_json(
    server: &TestServer,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(
        server,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

fn definition(symbol: &str, line: i32) -> Occurrence {
    Occurrence {
        range: vec![line, 0, 8],
        symbol: symbol.to_string(),
        symbol_roles: SymbolRole::Definition as i32,
        override_documentation: vec![],
    }
}

fn reference(symbol: &str, line: i32) -> Occurrence {
    Occurrence {
        range: vec![line, 4, 12],
        symbol: symbol.to_string(),
        symbol_roles: 0,
        override_documentation: vec![],
    }
}

fn info(symbol: &str, display_name: &str) -> SymbolInformation {
    SymbolInformation {
        symbol: symbol.to_string(),
        documentation: vec![format!("Docs for {display_name}.")],
        kind: proto_scip::Kind::Function as i32,
        display_name: display_name.to_string(),
        enclosing_symbol: String::new(),
    }
}

/// Two documents, four function symbols, two resolved call edges.
fn fixture_index() -> Index {
    Index {
        metadata: Some(Metadata {
            version: 1,
            tool_info: Some(ToolInfo {
                name: "scip-test".to_string(),
                version: "0.1".to_string(),
                arguments: vec![],
            }),
            project_root: "file:///work/acme".to_string(),
            text_document_encoding: 0,
        }),
        documents: vec![
            Document {
                relative_path: "src/lib.rs".to_string(),
                language: "rust".to_string(),
                occurrences: vec![
                    definition("fix/alpha().", 1),
                    definition("fix/beta().", 5),
                    reference("fix/alpha().", 7),
                ],
                symbols: vec![info("fix/alpha().", "alpha"), info("fix/beta().", "beta")],
            },
            Document {
                relative_path: "src/util.rs".to_string(),
                language: "rust".to_string(),
                occurrences: vec![
                    definition("fix/gamma().", 1),
                    definition("fix/delta().", 4),
                    reference("fix/beta().", 6),
                ],
                symbols: vec![info("fix/gamma().", "gamma"), info("fix/delta().", "delta")],
            },
        ],
        external_symbols: vec![],
    }
}

async fn upload_fixture(server: &TestServer, repo: &str, commit: &str) -> (StatusCode, serde_json::Value) {
    send(
        server,
        Request::builder()
            .method("POST")
            .uri(format!("/index/repos/{repo}/upload"))
            .header("x-ckb-commit", commit)
            .header("x-ckb-indexer-name", "scip-test")
            .body(Body::from(fixture_index().encode_bytes()))
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn create_upload_query_round_trip() {
    let server = server();

    let (status, body) = post_json(&server, "/index/repos", serde_json::json!({"id": "acme/core"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], "acme/core");
    assert_eq!(body["data"]["source"], "uploaded");

    let (status, body) = upload_fixture(&server, "acme/core", "c0ffee").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert!(body["data"]["stats"]["file_count"].as_i64().unwrap() > 0);
    assert_eq!(body["data"]["stats"]["symbol_count"], 4);
    assert_eq!(body["meta"]["sync_seq"], 1);

    // Page through symbols two at a time, following the cursor.
    let (status, body) = get(&server, "/index/repos/acme/core/symbols?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let symbols = body["data"]["symbols"].as_array().unwrap();
    assert_eq!(symbols.len(), 2);
    assert_eq!(body["meta"]["has_more"], true);
    assert_eq!(body["meta"]["total"], 4);

    let cursor = body["meta"]["cursor"].as_str().unwrap().to_string();
    let (status, body) = get(
        &server,
        &format!("/index/repos/acme/core/symbols?limit=2&cursor={cursor}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["symbols"].as_array().unwrap().len(), 2);
    assert_eq!(body["meta"]["has_more"], false);

    // Single symbol, files, refs and callgraph all read back.
    let (status, body) = get(&server, "/index/repos/acme/core/symbols/fix/alpha().").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "alpha");
    assert_eq!(body["data"]["file_path"], "src/lib.rs");
    assert_eq!(body["data"]["line"], 2);

    let (status, body) = get(&server, "/index/repos/acme/core/files").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["files"].as_array().unwrap().len(), 2);

    let (status, body) = get(&server, "/index/repos/acme/core/refs").await;
    assert_eq!(status, StatusCode::OK);
    let refs = body["data"]["refs"].as_array().unwrap();
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0]["kind"], "call");

    let (status, body) = get(
        &server,
        "/index/repos/acme/core/callgraph?callee_id=fix/beta().",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let edges = body["data"]["edges"].as_array().unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["caller_id"], "fix/delta().");

    let (status, body) = get(&server, "/index/repos/acme/core/search/symbols?q=alph").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["symbols"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["truncated"], false);

    let (status, body) = get(&server, "/index/repos/acme/core/meta").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["commit"], "c0ffee");
    assert_eq!(body["data"]["languages"], serde_json::json!(["rust"]));
    assert_eq!(body["data"]["stats"]["symbols"], 4);
}

#[tokio::test]
async fn delta_base_commit_mismatch_is_a_conflict() {
    let server = server();
    upload_fixture(&server, "acme/core", "c0ffee").await;

    let (status, body) = send(
        &server,
        Request::builder()
            .method("POST")
            .uri("/index/repos/acme/core/upload/delta")
            .header("x-ckb-base-commit", "deadbeef")
            .header("x-ckb-target-commit", "f00d")
            .header("x-ckb-changed-files", r#"[{"path":"src/lib.rs","change_type":"modified"}]"#)
            .body(Body::from(fixture_index().encode_bytes()))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "base_commit_mismatch");
    assert_eq!(body["current_commit"], "c0ffee");
    assert!(body["error"].is_string());

    // Stats are untouched by the refused delta.
    let (_, body) = get(&server, "/index/repos/acme/core/meta").await;
    assert_eq!(body["data"]["commit"], "c0ffee");
    assert_eq!(body["data"]["stats"]["symbols"], 4);
}

#[tokio::test]
async fn delta_applies_and_can_suggest_a_full_upload() {
    let server = server_with(|config| config.delta_threshold_percent = 10);
    upload_fixture(&server, "acme/core", "c0ffee").await;

    let mut delta = fixture_index();
    delta.documents.truncate(1);
    delta.documents[0]
        .occurrences
        .push(definition("fix/omega().", 9));
    delta.documents[0].symbols.push(info("fix/omega().", "omega"));

    let (status, body) = send(
        &server,
        Request::builder()
            .method("POST")
            .uri("/index/repos/acme/core/upload/delta")
            .header("x-ckb-base-commit", "c0ffee")
            .header("x-ckb-target-commit", "f00d")
            .header("x-ckb-changed-files", r#"[{"path":"src/lib.rs","change_type":"modified"}]"#)
            .body(Body::from(delta.encode_bytes()))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stats"]["commit"], "f00d");
    // One of two indexed files changed: 50% > the 10% threshold.
    assert_eq!(body["data"]["suggest_full_upload"], true);
    assert!(body["data"]["suggest_reason"].is_string());
    assert_eq!(body["meta"]["sync_seq"], 2);

    let (_, body) = get(&server, "/index/repos/acme/core/meta").await;
    assert_eq!(body["data"]["commit"], "f00d");
    assert_eq!(body["data"]["stats"]["symbols"], 5);
}

#[tokio::test]
async fn privacy_redaction_still_filters_on_real_paths() {
    let server = server_with(|config| config.redact.expose_paths = false);
    upload_fixture(&server, "acme/core", "c0ffee").await;

    let (status, body) = get(&server, "/index/repos/acme/core/symbols").await;
    assert_eq!(status, StatusCode::OK);
    for symbol in body["data"]["symbols"].as_array().unwrap() {
        assert_eq!(symbol["file_path"], "");
        assert!(symbol["file_basename"].is_string());
    }

    // Filtering happens before redaction, against the stored path.
    let (status, body) = get(&server, "/index/repos/acme/core/symbols?file=src/lib.rs").await;
    assert_eq!(status, StatusCode::OK);
    let symbols = body["data"]["symbols"].as_array().unwrap();
    assert_eq!(symbols.len(), 2);
    for symbol in symbols {
        assert_eq!(symbol["file_path"], "");
        assert_eq!(symbol["file_basename"], "lib.rs");
    }
}

#[tokio::test]
async fn batch_get_enforces_the_id_cap() {
    let server = server();
    upload_fixture(&server, "acme/core", "c0ffee").await;

    let ids: Vec<String> = (0..1001).map(|i| format!("id-{i}")).collect();
    let (status, body) = post_json(
        &server,
        "/index/repos/acme/core/symbols:batchGet",
        serde_json::json!({ "ids": ids }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "too_many_ids");

    let (status, body) = post_json(
        &server,
        "/index/repos/acme/core/symbols:batchGet",
        serde_json::json!({ "ids": ["fix/alpha().", "missing"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["symbols"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["not_found"], serde_json::json!(["missing"]));
}

#[tokio::test]
async fn content_encoding_negotiation() {
    let server = server();
    let raw = fixture_index().encode_bytes();

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&raw).unwrap();
    let gzipped = encoder.finish().unwrap();

    let (status, body) = send(
        &server,
        Request::builder()
            .method("POST")
            .uri("/index/repos/acme/gz/upload")
            .header("content-encoding", "gzip")
            .header("x-ckb-commit", "c1")
            .body(Body::from(gzipped))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["compression_ratio"].as_f64().unwrap() > 0.0);

    let zstded = zstd::encode_all(raw.as_slice(), 3).unwrap();
    let (status, _) = send(
        &server,
        Request::builder()
            .method("POST")
            .uri("/index/repos/acme/zst/upload")
            .header("content-encoding", "zstd")
            .header("x-ckb-commit", "c1")
            .body(Body::from(zstded))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &server,
        Request::builder()
            .method("POST")
            .uri("/index/repos/acme/br/upload")
            .header("content-encoding", "br")
            .body(Body::from(raw.clone()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unsupported_encoding");
    assert!(body["error"]["message"].as_str().unwrap().contains("br"));

    // With compression disabled, gzip is refused outright.
    let server = server_with(|config| config.compression_enabled = false);
    let (status, body) = send(
        &server,
        Request::builder()
            .method("POST")
            .uri("/index/repos/acme/gz/upload")
            .header("content-encoding", "gzip")
            .body(Body::from(raw))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "compression_disabled");
}

#[tokio::test]
async fn upload_size_bounds() {
    let small_limit_server = server_with(|config| config.max_upload_size = 64);

    let (status, body) = send(
        &small_limit_server,
        Request::builder()
            .method("POST")
            .uri("/index/repos/acme/core/upload")
            .header("content-length", "100000")
            .body(Body::from(vec![0u8; 100_000]))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"]["code"], "upload_too_large");

    let server = server();
    let (status, body) = send(
        &server,
        Request::builder()
            .method("POST")
            .uri("/index/repos/acme/core/upload")
            .body(Body::from("tiny"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "upload_too_small");

    // No scratch files linger after refused uploads.
    let uploads = std::fs::read_dir(server._dir.path().join("uploads")).unwrap();
    assert_eq!(uploads.count(), 0);
}

#[tokio::test]
async fn cursor_integrity_and_entity_guard() {
    let server = server();
    upload_fixture(&server, "acme/core", "c0ffee").await;

    let (status, body) = get(&server, "/index/repos/acme/core/symbols?cursor=garbage").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_cursor");

    let (_, body) = get(&server, "/index/repos/acme/core/symbols?limit=1").await;
    let cursor = body["meta"]["cursor"].as_str().unwrap().to_string();

    let (status, body) = get(
        &server,
        &format!("/index/repos/acme/core/files?cursor={cursor}"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "cursor_entity_mismatch");
}

#[tokio::test]
async fn repo_lifecycle_and_errors() {
    let server = server();

    let (status, body) = get(&server, "/index/repos/acme/none/symbols").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "repo_not_found");

    let (status, _) = post_json(&server, "/index/repos", serde_json::json!({"id": "//bad//"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    post_json(&server, "/index/repos", serde_json::json!({"id": "acme/core"})).await;
    let (status, body) = get(&server, "/index/repos").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["repos"].as_array().unwrap().len(), 1);

    // An empty repo queries as empty rather than erroring.
    let (status, body) = get(&server, "/index/repos/acme/core/symbols").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["symbols"].as_array().unwrap().len(), 0);

    let (status, _) = send(
        &server,
        Request::builder()
            .method("DELETE")
            .uri("/index/repos/acme/core")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get(&server, "/index/repos/acme/core/meta").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn disabled_index_serves_503() {
    let server = server_with(|config| config.index_enabled = false);

    let (status, body) = get(&server, "/index/repos").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "index_server_disabled");

    // Liveness stays up.
    let (status, _) = get(&server, "/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn saturation_sheds_with_retry_after_but_health_stays_up() {
    let server = server_with(|config| {
        config.shedder.max_concurrent = 1;
        config.shedder.queue_size = 0;
        config.shedder.queue_timeout = std::time::Duration::from_millis(50);
    });

    // Hold the only slot, as a long-running request would.
    let held = match server.app.shedder.admit("/index/repos").await {
        ckbd::admission::Admission::Admitted(permit) => permit,
        _ => panic!("expected admission"),
    };

    let response = server
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/index/repos")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()["retry-after"], "5");

    let (status, _) = get(&server, "/health").await;
    assert_eq!(status, StatusCode::OK);

    drop(held);
    let (status, _) = get(&server, "/index/repos").await;
    assert_eq!(status, StatusCode::OK);
}
