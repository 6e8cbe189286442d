//! Integration tests for the HTTP surface

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use utm_tracker::api::create_api_router;
use utm_tracker::config::{Config, TrustedProxyMode};
use utm_tracker::Tracker;

const DESKTOP_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

fn test_config(dir: &TempDir) -> Config {
    Config {
        file: dir.path().join("utm.sqlite"),
        ..Config::default()
    }
}

fn create_test_router(config: Config) -> (Router, Arc<Tracker>) {
    let tracker = Arc::new(Tracker::from_config(config).unwrap());
    (create_api_router(Arc::clone(&tracker)), tracker)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::USER_AGENT, DESKTOP_UA)
        .extension(ConnectInfo(SocketAddr::from(([198, 51, 100, 23], 40000))))
        .body(Body::empty())
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_check() {
    let dir = TempDir::new().unwrap();
    let (router, _) = create_test_router(test_config(&dir));

    let (status, body) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
}

#[tokio::test]
async fn test_track_then_count() {
    let dir = TempDir::new().unwrap();
    let (router, _) = create_test_router(test_config(&dir));

    let (status, body) = send(&router, get("/count")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    let (status, body) = send(
        &router,
        get("/track/blog/first-post?utm_source=newsletter&utm_campaign=launch"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tracked"], true);

    let (_, body) = send(&router, get("/count")).await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_track_post_is_accepted() {
    let dir = TempDir::new().unwrap();
    let (router, tracker) = create_test_router(test_config(&dir));

    let request = Request::builder()
        .method("POST")
        .uri("/track/home?utm_medium=social")
        .header(header::USER_AGENT, DESKTOP_UA)
        .extension(ConnectInfo(SocketAddr::from(([198, 51, 100, 23], 40000))))
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tracked"], true);
    assert_eq!(tracker.count_all().await.unwrap(), 1);
}

#[tokio::test]
async fn test_track_without_utm_is_not_recorded() {
    let dir = TempDir::new().unwrap();
    let (router, tracker) = create_test_router(test_config(&dir));

    // Generated fields cannot be supplied over HTTP
    let (status, body) = send(&router, get("/track/home?city=Bern&iphash=forged")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tracked"], false);
    assert_eq!(tracker.count_all().await.unwrap(), 0);
}

#[tokio::test]
async fn test_track_rejects_bots() {
    let dir = TempDir::new().unwrap();
    let (router, _) = create_test_router(test_config(&dir));

    let request = Request::builder()
        .uri("/track/home?utm_source=x")
        .header(header::USER_AGENT, "curl/8.4.0")
        .extension(ConnectInfo(SocketAddr::from(([198, 51, 100, 23], 40000))))
        .body(Body::empty())
        .unwrap();

    let (_, body) = send(&router, request).await;
    assert_eq!(body["tracked"], false);
}

#[tokio::test]
async fn test_rate_limit_uses_forwarded_client() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.ratelimit.trials = 1;
    config.proxy.mode = TrustedProxyMode::Cloudflare;
    let (router, tracker) = create_test_router(config);

    let from = |client: &str| {
        Request::builder()
            .uri("/track/home?utm_source=x")
            .header(header::USER_AGENT, DESKTOP_UA)
            .header("cf-connecting-ip", client)
            .extension(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 443))))
            .body(Body::empty())
            .unwrap()
    };

    let (_, body) = send(&router, from("192.0.2.10")).await;
    assert_eq!(body["tracked"], true);
    let (_, body) = send(&router, from("192.0.2.10")).await;
    assert_eq!(body["tracked"], false);
    // Same proxy hop, different client
    let (_, body) = send(&router, from("192.0.2.11")).await;
    assert_eq!(body["tracked"], true);

    assert_eq!(tracker.count_all().await.unwrap(), 2);
}

#[tokio::test]
async fn test_stats_endpoint() {
    let dir = TempDir::new().unwrap();
    let (router, _) = create_test_router(test_config(&dir));

    send(&router, get("/track/home?utm_source=a")).await;
    send(&router, get("/track/home?utm_source=b")).await;
    send(&router, get("/track/pricing?utm_source=c")).await;

    let (status, body) = send(&router, get("/stats?days=7")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["days"], 7);
    assert_eq!(body["recent"], 3);
    assert_eq!(body["previous"], 0);

    let (_, body) = send(&router, get("/stats?days=7&page_id=pricing")).await;
    assert_eq!(body["recent"], 1);

    // Falls back to the configured range
    let (_, body) = send(&router, get("/stats")).await;
    assert_eq!(body["days"], 30);
}

#[tokio::test]
async fn test_disabled_tracker_over_http() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.enabled = false;
    let (router, _) = create_test_router(config);

    let (_, body) = send(&router, get("/track/home?utm_source=x")).await;
    assert_eq!(body["tracked"], false);

    let (_, body) = send(&router, get("/count")).await;
    assert_eq!(body["count"], 0);
}
