//! Integration tests for the reqwest-backed [`BackendApi`] against a
//! local axum server standing in for a render backend.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgba, RgbaImage};
use renderpool_backend::api::{BackendApi, BackendApiError, RenderBackend};
use renderpool_backend::engine::RenderEngine;
use renderpool_backend::error::RenderError;
use renderpool_backend::shared_pool;
use renderpool_core::{JobDescription, RenderRequest, RendererType, SlotInfo, SlotPool};
use serde_json::{json, Value};
use tokio::sync::oneshot;

fn png_base64() -> String {
    let img = RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    BASE64.encode(buf.into_inner())
}

/// Echoes the prompt back in `info` so tests can see what was posted.
async fn txt2img(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "images": [png_base64()],
        "parameters": body,
        "info": body["prompt"].clone(),
    }))
}

async fn out_of_memory() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "CUDA out of memory")
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!({ "images": [] }))
}

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route("/sdapi/v1/txt2img", post(txt2img))
        .route("/oom", post(out_of_memory))
        .route("/slow", post(slow));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn render_returns_raw_body_on_success() {
    let addr = spawn_server().await;
    let api = BackendApi::new().unwrap();

    let body = api
        .render(
            &format!("http://{addr}/sdapi/v1/txt2img"),
            &json!({ "prompt": "harbour at dusk" }),
        )
        .await
        .unwrap();

    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["info"], "harbour at dusk");
    assert_eq!(parsed["images"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn non_success_status_is_api_error_with_body() {
    let addr = spawn_server().await;
    let api = BackendApi::new().unwrap();

    let err = api
        .render(&format!("http://{addr}/oom"), &json!({}))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        BackendApiError::ApiError { status: 500, ref body } if body == "CUDA out of memory"
    );
}

#[tokio::test]
async fn timeout_is_request_error() {
    let addr = spawn_server().await;
    let api = BackendApi::with_timeout(Duration::from_millis(100)).unwrap();

    let err = api
        .render(&format!("http://{addr}/slow"), &json!({}))
        .await
        .unwrap_err();

    assert_matches!(err, BackendApiError::Request(ref e) if e.is_timeout());
}

#[tokio::test]
async fn engine_end_to_end_over_http() {
    let addr = spawn_server().await;
    let mut pool = SlotPool::new();
    pool.add_slot(SlotInfo::new(
        format!("http://{addr}"),
        RendererType::Automatic1111,
        true,
    ))
    .unwrap();
    let pool = shared_pool(pool);
    let engine = RenderEngine::new(Arc::clone(&pool), Arc::new(BackendApi::new().unwrap()));

    pool.lock().acquire(0).unwrap();
    let (tx, rx) = oneshot::channel();
    engine
        .submit(0, JobDescription::new(RenderRequest::new("moon")).unwrap(), move |r| {
            let _ = tx.send(r);
        })
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .expect("completion timed out")
        .unwrap();
    let image = result.outcome.unwrap();
    assert_eq!((image.width(), image.height()), (8, 8));
    assert!(!pool.lock().is_busy(0).unwrap());
}

#[tokio::test]
async fn engine_reports_connection_refused_as_transport_error() {
    // Bind then drop a listener to get a port nobody is serving.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let mut pool = SlotPool::new();
    pool.add_slot(SlotInfo::new(
        format!("http://{addr}"),
        RendererType::Remote,
        false,
    ))
    .unwrap();
    let pool = shared_pool(pool);
    let engine = RenderEngine::new(Arc::clone(&pool), Arc::new(BackendApi::new().unwrap()));

    pool.lock().acquire(0).unwrap();
    let (tx, rx) = oneshot::channel();
    engine
        .submit(0, JobDescription::new(RenderRequest::new("x")).unwrap(), move |r| {
            let _ = tx.send(r);
        })
        .unwrap();

    let result = rx.await.unwrap();
    assert_matches!(result.outcome, Err(RenderError::Transport(_)));
    assert!(!pool.lock().is_busy(0).unwrap());
}
