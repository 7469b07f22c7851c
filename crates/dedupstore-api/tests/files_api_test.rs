//! HTTP round trips through the router with in-memory repositories and a
//! temporary local disk.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH,
};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use dedupstore_api::{router, AppState};
use dedupstore_core::memory::InMemoryStore;
use dedupstore_engine::{DiskRegistry, EngineOptions, FilesystemBackend, StorageEngine};

const BOUNDARY: &str = "dedupstore-test-boundary";
const HELLO_SHA1: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

struct Fixture {
    _dir: TempDir,
    store: Arc<InMemoryStore>,
    engine: Arc<StorageEngine>,
    app: Router,
}

fn fixture_with_limit(max_upload_bytes: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(StorageEngine::new(
        store.clone(),
        store.clone(),
        DiskRegistry::single(
            "public",
            FilesystemBackend::new(dir.path()).with_public_url("http://cdn.test/storage"),
        ),
        EngineOptions::default(),
    ));
    let app = router(AppState {
        engine: engine.clone(),
        cache_control: "public, max-age=600".to_string(),
        max_upload_bytes,
    });
    Fixture {
        _dir: dir,
        store,
        engine,
        app,
    }
}

fn fixture() -> Fixture {
    fixture_with_limit(1024 * 1024)
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, filename, content) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: text/plain\r\n\r\n");
                body.extend_from_slice(content);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn upload_hello(app: &Router, owner_id: &str) -> Value {
    let response = send(
        app,
        upload_request(
            "/files",
            &[
                Part::Text("owner_type", "post"),
                Part::Text("owner_id", owner_id),
                Part::File("file", "hello.txt", b"hello world"),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn test_health() {
    let f = fixture();
    let response = send(&f.app, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_upload_stores_and_links() {
    let f = fixture();
    let json = upload_hello(&f.app, "1").await;

    assert_eq!(json["success"], true);
    let data = &json["data"];
    assert_eq!(data["hash"], HELLO_SHA1);
    assert_eq!(data["md5_hash"], "5eb63bbbe01eeed093cb22bb8f5acdc3");
    assert_eq!(data["filename"], format!("{}.txt", HELLO_SHA1));
    assert_eq!(data["original_name"], "hello.txt");
    assert_eq!(data["mime_type"], "text/plain");
    assert_eq!(data["size"], 11);
    assert_eq!(data["size_human"], "11 B");
    assert_eq!(data["disk"], "public");
    assert_eq!(data["status"], "completed");
    assert_eq!(data["relation_status"], "completed");
    assert!(data["relation_id"].is_i64());
    assert_eq!(
        data["url"],
        format!("http://cdn.test/storage/2a/ae/{}.txt", HELLO_SHA1)
    );
    assert_eq!(data["download_url"], format!("/files/{}/download", HELLO_SHA1));
    assert_eq!(data["stream_url"], format!("/files/{}/stream", HELLO_SHA1));
}

#[tokio::test]
async fn test_duplicate_upload_reuses_object() {
    let f = fixture();
    let first = upload_hello(&f.app, "1").await;
    let second = upload_hello(&f.app, "2").await;

    assert_eq!(first["data"]["hash"], second["data"]["hash"]);
    assert_ne!(first["data"]["relation_id"], second["data"]["relation_id"]);
    assert_eq!(f.store.object_count().await, 1);
    assert_eq!(f.store.link_total().await, 2);
}

#[tokio::test]
async fn test_upload_without_owner_uses_temporary_owner() {
    let f = fixture();
    let response = send(
        &f.app,
        upload_request("/files", &[Part::File("file", "hello.txt", b"hello world")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let links = f.engine.links().list_for_hash(HELLO_SHA1).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].owner_type, "upload");
    assert!(links[0].owner_id.starts_with("temp_"));
}

#[tokio::test]
async fn test_upload_rejects_missing_file_and_partial_owner() {
    let f = fixture();

    let response = send(
        &f.app,
        upload_request("/files", &[Part::Text("owner_type", "post")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());

    let response = send(
        &f.app,
        upload_request(
            "/files",
            &[
                Part::Text("owner_type", "post"),
                Part::File("file", "hello.txt", b"hello world"),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(f.store.object_count().await, 0);
}

#[tokio::test]
async fn test_upload_to_unknown_disk_is_rejected() {
    let f = fixture();
    let response = send(
        &f.app,
        upload_request(
            "/files",
            &[
                Part::Text("disk", "archive"),
                Part::File("file", "hello.txt", b"hello world"),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(f.store.object_count().await, 0);
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let f = fixture_with_limit(64);
    let body = multipart_body(&[Part::File("file", "big.txt", &[b'x'; 256])]);
    let request = Request::builder()
        .method("POST")
        .uri("/files")
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();

    let response = send(&f.app, request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(f.store.object_count().await, 0);
}

#[tokio::test]
async fn test_batch_upload() {
    let f = fixture();
    let response = send(
        &f.app,
        upload_request(
            "/files/batch",
            &[
                Part::Text("owner_type", "gallery"),
                Part::Text("owner_id", "7"),
                Part::File("files[]", "a.txt", b"hello world"),
                Part::File("files[]", "b.txt", b"second file"),
                Part::File("files[]", "copy.txt", b"hello world"),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    let items = json["data"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["hash"], HELLO_SHA1);
    assert_eq!(items[2]["hash"], HELLO_SHA1);
    assert_ne!(items[1]["hash"], HELLO_SHA1);
    assert_eq!(f.store.object_count().await, 2);
    // Same owner and hash twice: one link, name updated by the last upload.
    assert_eq!(f.store.link_total().await, 2);
    assert_eq!(items[2]["original_name"], "copy.txt");
}

#[tokio::test]
async fn test_batch_reports_failures_per_item() {
    let f = fixture();
    let response = send(
        &f.app,
        upload_request(
            "/files/batch",
            &[
                Part::Text("disk", "archive"),
                Part::File("files", "a.txt", b"hello world"),
                Part::File("files", "b.txt", b"second file"),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    let items = json["data"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    for (item, name) in items.iter().zip(["a.txt", "b.txt"]) {
        assert_eq!(item["error"], true);
        assert_eq!(item["original_name"], name);
        assert!(item["message"].as_str().unwrap().contains("archive"));
    }
}

#[tokio::test]
async fn test_batch_without_files_is_rejected() {
    let f = fixture();
    let response = send(
        &f.app,
        upload_request("/files/batch", &[Part::Text("owner_type", "post")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_show_file() {
    let f = fixture();
    upload_hello(&f.app, "1").await;
    upload_hello(&f.app, "2").await;

    let response = send(&f.app, get(&format!("/files/{}", HELLO_SHA1))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let data = body_json(response).await["data"].clone();
    assert_eq!(data["hash"], HELLO_SHA1);
    assert_eq!(data["exists"], true);
    assert_eq!(data["path"], format!("2a/ae/{}.txt", HELLO_SHA1));
    assert_eq!(data["relations_count"], 2);
    assert_eq!(data["relations_by_type"]["post"], 2);
    assert_eq!(data["relations"].as_array().unwrap().len(), 2);
    assert!(data.get("relation_id").is_none());
}

#[tokio::test]
async fn test_show_unknown_and_malformed_hash() {
    let f = fixture();

    let response = send(&f.app, get(&format!("/files/{}", "0".repeat(40)))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "File not found");

    let response = send(&f.app, get("/files/not-a-hash")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_is_an_attachment() {
    let f = fixture();
    upload_hello(&f.app, "1").await;

    let response = send(&f.app, get(&format!("/files/{}/download", HELLO_SHA1))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[CONTENT_TYPE], "text/plain");
    assert_eq!(headers[CONTENT_LENGTH], "11");
    assert_eq!(
        headers[CONTENT_DISPOSITION],
        "attachment; filename=\"hello.txt\""
    );
    assert_eq!(body_bytes(response).await, b"hello world");
}

#[tokio::test]
async fn test_download_of_missing_blob_is_not_found() {
    let f = fixture();
    let json = upload_hello(&f.app, "1").await;
    let object = f.engine.find(HELLO_SHA1).await.unwrap().unwrap();
    f.engine
        .disks()
        .get("public")
        .unwrap()
        .delete(&object.path)
        .await
        .unwrap();
    assert_eq!(json["data"]["hash"], HELLO_SHA1);

    let response = send(&f.app, get(&format!("/files/{}/download", HELLO_SHA1))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stream_is_inline_and_cacheable() {
    let f = fixture();
    upload_hello(&f.app, "1").await;

    let response = send(&f.app, get(&format!("/files/{}/stream", HELLO_SHA1))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[CACHE_CONTROL], "public, max-age=600");
    assert_eq!(headers[ETAG], format!("\"{}\"", HELLO_SHA1));
    assert_eq!(headers[CONTENT_DISPOSITION], "inline; filename=\"hello.txt\"");
    assert_eq!(body_bytes(response).await, b"hello world");

    let conditional = Request::builder()
        .uri(format!("/files/{}/stream", HELLO_SHA1))
        .header(IF_NONE_MATCH, format!("\"{}\"", HELLO_SHA1))
        .body(Body::empty())
        .unwrap();
    let response = send(&f.app, conditional).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let f = fixture();
    let response = send(&f.app, get("/health")).await;
    assert!(response.headers().contains_key("x-request-id"));
}
