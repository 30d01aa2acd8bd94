//! HTTP API tests (feature `server`).
//!
//! Run with:
//!   cargo test --features server --test server

#![cfg(feature = "server")]

mod common;

use common::{page_count, sample_pdf, Route, StubServer};
use docstamp::server::{router, ServerConfig};
use docstamp::PipelineConfig;
use std::collections::HashMap;
use std::net::SocketAddr;

const BOUNDARY: &str = "docstamp-test-boundary";

enum Part<'a> {
    File(&'a str, &'a [u8]),
    Text(&'a str),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File(name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text(value) => {
                body.extend_from_slice(b"Content-Disposition: form-data; name=\"files\"\r\n\r\n");
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn start_api() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(&ServerConfig::default(), PipelineConfig::default());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn post(addr: SocketAddr, path: &str, parts: &[Part<'_>]) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}{path}"))
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart_body(parts))
        .send()
        .await
        .unwrap()
}

async fn json(response: reqwest::Response) -> serde_json::Value {
    serde_json::from_slice(&response.bytes().await.unwrap()).unwrap()
}

#[tokio::test]
async fn health_and_version() {
    let addr = start_api().await;
    let health = json(reqwest::get(format!("http://{addr}/health")).await.unwrap()).await;
    assert_eq!(health["status"], "ok");

    let index = json(reqwest::get(format!("http://{addr}/")).await.unwrap()).await;
    assert_eq!(index["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn merge_uploads_and_urls() {
    let mut routes = HashMap::new();
    routes.insert("/remote.pdf".to_string(), Route::ok(sample_pdf(2, 200.0, 200.0, "r")));
    let stub = StubServer::start(routes).await;
    let addr = start_api().await;

    let upload = sample_pdf(1, 200.0, 200.0, "u");
    let url = stub.url("/remote.pdf");
    let response = post(
        addr,
        "/api/v1/pdf/merge?name=bundle.pdf",
        &[Part::File("upload.pdf", &upload), Part::Text(&url)],
    )
    .await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/pdf");
    let disposition = response.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.contains("bundle.pdf"), "{disposition}");
    let bytes = response.bytes().await.unwrap();
    assert_eq!(page_count(&bytes), 3);
}

#[tokio::test]
async fn merge_rejects_local_paths_by_default() {
    let addr = start_api().await;
    let response = post(addr, "/api/v1/pdf/merge", &[Part::Text("/etc/hostname")]).await;
    assert_eq!(response.status(), 400);
    let body = json(response).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn merge_of_nothing_is_unprocessable() {
    let addr = start_api().await;
    let response = post(addr, "/api/v1/pdf/merge", &[]).await;
    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn remote_404_is_bad_request() {
    let stub = StubServer::start(HashMap::new()).await;
    let addr = start_api().await;
    let url = stub.url("/gone.pdf");
    let response = post(addr, "/api/v1/pdf/merge", &[Part::Text(&url)]).await;
    assert_eq!(response.status(), 400);
    let body = json(response).await;
    assert_eq!(body["error"]["code"], "HTTP_STATUS");
}

#[tokio::test]
async fn stamp_text_returns_stamped_pdf() {
    let addr = start_api().await;
    let upload = sample_pdf(3, 300.0, 300.0, "s");
    let response = post(
        addr,
        "/api/v1/pdf/stamp/text?text=PAID&position=br&pages=1-2&over=true",
        &[Part::File("invoice.pdf", &upload)],
    )
    .await;
    assert_eq!(response.status(), 200);
    let bytes = response.bytes().await.unwrap();
    assert_eq!(page_count(&bytes), 3);
}

#[tokio::test]
async fn stamp_text_rejects_bad_page_range() {
    let addr = start_api().await;
    let upload = sample_pdf(1, 300.0, 300.0, "s");
    let response = post(
        addr,
        "/api/v1/pdf/stamp/text?text=X&pages=4-3",
        &[Part::File("a.pdf", &upload)],
    )
    .await;
    assert_eq!(response.status(), 422);
}
