use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tokio_test::assert_ok;
use tower::ServiceExt;

use doc_search::library::DocumentLibrary;
use doc_search::rag::lifecycle::IndexController;
use doc_search::rag::RagComponents;
use doc_search::server::{router, AppState};
use doc_search::Settings;

const BOUNDARY: &str = "doc-search-test-boundary";

struct TestApp {
    router: Router,
    uploads: TempDir,
    _index: TempDir,
}

fn test_app() -> TestApp {
    test_app_with(&["pdf", "txt"])
}

fn test_app_with(extensions: &[&str]) -> TestApp {
    let uploads = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();

    let mut settings = Settings::default();
    settings.storage.upload_dir = uploads.path().to_path_buf();
    settings.storage.index_dir = index.path().to_path_buf();
    settings.storage.allowed_extensions = extensions.iter().map(|e| e.to_string()).collect();
    settings.embedding.dimensions = 64;
    let settings = Arc::new(settings);

    let library = Arc::new(DocumentLibrary::new(
        settings.storage.upload_dir.clone(),
        settings.storage.allowed_extensions.clone(),
    ));
    let components = RagComponents::from_settings(&settings).unwrap();
    let controller = Arc::new(IndexController::new(
        library,
        components,
        settings.index.rebuild_timeout(),
    ));

    TestApp {
        router: router(AppState::new(controller, settings)),
        uploads,
        _index: index,
    }
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

fn multipart(files: &[(&str, &str)]) -> Request<Body> {
    let parts: Vec<(&str, &[u8])> = files.iter().map(|(n, c)| (*n, c.as_bytes())).collect();
    multipart_parts(&parts, true)
}

/// Without `closed` the body stops after the last part's data, with no
/// closing boundary.
fn multipart_parts(files: &[(&str, &[u8])], closed: bool) -> Request<Body> {
    let mut body = Vec::new();
    for (i, (name, content)) in files.iter().enumerate() {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, name
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        if closed || i + 1 < files.len() {
            body.extend_from_slice(b"\r\n");
        }
    }
    if closed {
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    }

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    let value = assert_ok!(serde_json::from_slice::<Value>(&bytes));
    (status, value)
}

#[tokio::test]
async fn disallowed_upload_writes_nothing() {
    let app = test_app();
    let (status, body) = send_json(&app, multipart(&[("payload.exe", "MZ")])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["uploaded"].as_array().unwrap().len(), 0);
    assert_eq!(body["failed"][0]["original"], "payload.exe");
    assert_eq!(files_in(app.uploads.path()), 0);
}

#[tokio::test]
async fn upload_adds_one_document_and_initializes_index() {
    let app = test_app();
    let (_, before) = send_json(&app, get("/api/search-system/status")).await;
    assert_eq!(before["status"], "not_initialized");
    assert_eq!(before["document_count"], 0);

    let (status, body) =
        send_json(&app, multipart(&[("Rust Notes.txt", "ownership and borrowing")])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let saved_as = body["uploaded"][0]["saved_as"].as_str().unwrap().to_string();
    assert!(saved_as.starts_with("Rust_Notes_"));
    assert!(saved_as.ends_with(".txt"));

    let (_, after) = send_json(&app, get("/api/search-system/status")).await;
    assert_eq!(after["document_count"], 1);
    assert_eq!(after["status"], "initialized");
    assert_eq!(after["vector_store_loaded"], true);
    assert_eq!(after["indexed_chunks"], 1);

    let (status, listing) = send_json(&app, get("/api/documents")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["documents"][0]["name"], saved_as.as_str());

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/documents/{}", saved_as)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("inline"));
}

#[tokio::test]
async fn empty_text_upload_is_discarded() {
    let app = test_app();
    let (_, body) = send_json(&app, multipart(&[("blank.txt", "   ")])).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["failed"].as_array().unwrap().len(), 1);
    assert_eq!(files_in(app.uploads.path()), 0);
}

#[tokio::test]
async fn upload_without_files_is_rejected() {
    let app = test_app();
    let (status, body) = send_json(&app, multipart(&[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "input");
}

#[tokio::test]
async fn deleting_missing_document_leaves_index_alone() {
    let app = test_app();
    std::fs::write(app.uploads.path().join("kept.txt"), "kept document").unwrap();
    let (status, _) = send_json(&app, json_post("/api/reindex", Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, before) = send_json(&app, get("/api/search-system/status")).await;

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/documents/ghost.txt")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    let (_, after) = send_json(&app, get("/api/search-system/status")).await;
    assert_eq!(after["status"], "initialized");
    assert_eq!(after["indexed_chunks"], before["indexed_chunks"]);
    assert_eq!(after["last_indexed_at"], before["last_indexed_at"]);
}

#[tokio::test]
async fn deleting_missing_name_with_other_extension_is_not_found() {
    let app = test_app();
    let request = Request::builder()
        .method("DELETE")
        .uri("/api/documents/ghost.docx")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    let (status, _) = send_json(&app, get("/api/documents/ghost.docx")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_cut_off_midway_still_indexes_stored_files() {
    let app = test_app();
    let request = multipart_parts(
        &[
            ("a.txt", b"complete first file".as_slice()),
            ("b.txt", b"partial da".as_slice()),
        ],
        false,
    );
    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["uploaded"].as_array().unwrap().len(), 1);
    assert_eq!(body["failed"].as_array().unwrap().len(), 1);
    assert!(body["uploaded"][0]["saved_as"].as_str().unwrap().starts_with("a_"));

    let (_, after) = send_json(&app, get("/api/search-system/status")).await;
    assert_eq!(after["document_count"], 1);
    assert_eq!(after["status"], "initialized");
    assert_eq!(after["indexed_chunks"], 1);
}

#[tokio::test]
async fn pdf_upload_with_default_extensions() {
    let app = test_app_with(&["pdf"]);
    let (_, before) = send_json(&app, get("/api/search-system/status")).await;
    assert_eq!(before["document_count"], 0);

    let pdf: &[u8] = include_bytes!("fixtures/hello.pdf");
    let (status, body) = send_json(&app, multipart_parts(&[("hello.pdf", pdf)], true)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["failed"].as_array().unwrap().len(), 0);

    let (_, after) = send_json(&app, get("/api/search-system/status")).await;
    assert_eq!(after["document_count"], 1);
    assert_eq!(after["status"], "initialized");

    let (status, body) =
        send_json(&app, json_post("/api/search", serde_json::json!({"query": "hello"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["summary"].as_str().unwrap().contains("hello_"));
}

#[tokio::test]
async fn delete_removes_file_and_rebuilds() {
    let app = test_app();
    std::fs::write(app.uploads.path().join("a.txt"), "first document").unwrap();
    std::fs::write(app.uploads.path().join("b.txt"), "second document").unwrap();

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/documents/a.txt")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, after) = send_json(&app, get("/api/search-system/status")).await;
    assert_eq!(after["document_count"], 1);
    assert_eq!(after["indexed_chunks"], 1);
}

#[tokio::test]
async fn traversal_names_are_rejected() {
    let app = test_app();
    let (status, body) = send_json(&app, get("/api/documents/..%2Fsecret.txt")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "input");
}

#[tokio::test]
async fn api_search_clamps_top_k() {
    let app = test_app();
    std::fs::write(app.uploads.path().join("notes.txt"), "tokio runtime notes").unwrap();

    let (status, body) =
        send_json(&app, json_post("/api/search", serde_json::json!({"query": "tokio", "top_k": 999}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["top_k"], 20);
    assert!(body["summary"].as_str().unwrap().contains("notes.txt"));

    let (_, body) =
        send_json(&app, json_post("/api/search", serde_json::json!({"query": "tokio", "top_k": "0"}))).await;
    assert_eq!(body["top_k"], 1);

    let (_, body) =
        send_json(&app, json_post("/api/search", serde_json::json!({"query": "tokio", "top_k": "abc"}))).await;
    assert_eq!(body["top_k"], 5);
}

#[tokio::test]
async fn empty_query_returns_prompt_without_touching_index() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/search")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("query=++&top_k=5"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8(body).unwrap().contains("Please enter a valid query."));

    let (_, status) = send_json(&app, get("/api/search-system/status")).await;
    assert_eq!(status["status"], "not_initialized");
    assert!(status["last_indexed_at"].is_null());
}

#[tokio::test]
async fn search_page_renders_summary() {
    let app = test_app();
    std::fs::write(app.uploads.path().join("guide.txt"), "axum router guide").unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/search")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("query=router&top_k=abc"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let page = String::from_utf8(body).unwrap();
    assert!(page.contains("guide.txt"));
    assert!(page.contains("Top 1 passages for &#39;router&#39;"));
}

#[tokio::test]
async fn health_reports_document_count() {
    let app = test_app();
    std::fs::write(app.uploads.path().join("one.pdf"), b"%PDF-1.4").unwrap();
    std::fs::write(app.uploads.path().join("ignored.md"), "not allowed").unwrap();
    let (status, body) = send_json(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["document_count"], 1);
    assert_eq!(body["search_system"], false);
}
