use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{Query, State},
    http::{Method, Request, StatusCode},
    routing::get,
};
use bytes::Bytes;
use meshx_proxy::application::render::RenderService;
use meshx_proxy::application::upstream::{HttpUpstream, UpstreamError, UpstreamFetcher};
use meshx_proxy::cache::{CacheKey, DiskBlobStore};
use meshx_proxy::infra::http::{HttpState, build_router};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;
use url::Url;

type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

/// Fake renderer: `/` echoes `text|font` back as the body, `/broken` fails and
/// `/slow` stalls for two seconds.
async fn spawn_backend() -> (SocketAddr, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new()
        .route(
            "/",
            get(
                |State(seen): State<Seen>, Query(params): Query<HashMap<String, String>>| async move {
                    let body = format!(
                        "{}|{}",
                        params.get("text").cloned().unwrap_or_default(),
                        params.get("font").cloned().unwrap_or_default()
                    );
                    seen.lock().expect("seen lock").push(params);
                    body
                },
            ),
        )
        .route(
            "/broken/",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route(
            "/slow/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        )
        .with_state(seen.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("backend should bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("backend serve");
    });

    (addr, seen)
}

fn upstream(addr: SocketAddr, path: &str, timeout: Duration) -> HttpUpstream {
    let base = Url::parse(&format!("http://{addr}{path}")).expect("valid url");
    HttpUpstream::new(base, timeout).expect("client should build")
}

#[tokio::test]
async fn fetch_sends_both_parameters_and_returns_body_bytes() {
    let (addr, seen) = spawn_backend().await;
    let client = upstream(addr, "", Duration::from_secs(5));

    let bytes = client
        .fetch("a&b=c d", "漢.ttf")
        .await
        .expect("fetch should succeed");

    assert_eq!(bytes, Bytes::from("a&b=c d|漢.ttf"));
    let seen = seen.lock().expect("seen lock");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("text").map(String::as_str), Some("a&b=c d"));
    assert_eq!(seen[0].get("font").map(String::as_str), Some("漢.ttf"));
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let (addr, _) = spawn_backend().await;
    let client = upstream(addr, "/broken", Duration::from_secs(5));

    let err = client
        .fetch("Hello", "ackaisyo.ttf")
        .await
        .expect_err("500 should fail");
    assert!(
        matches!(err, UpstreamError::Status(status) if status == StatusCode::INTERNAL_SERVER_ERROR),
        "{err:?}"
    );
}

#[tokio::test]
async fn slow_backend_times_out() {
    let (addr, _) = spawn_backend().await;
    let client = upstream(addr, "/slow", Duration::from_millis(200));

    let err = client
        .fetch("Hello", "ackaisyo.ttf")
        .await
        .expect_err("should time out");
    assert!(matches!(err, UpstreamError::Timeout(_)), "{err:?}");
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("probe should bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let client = upstream(addr, "", Duration::from_secs(5));
    let err = client
        .fetch("Hello", "ackaisyo.ttf")
        .await
        .expect_err("nothing is listening");
    assert!(matches!(err, UpstreamError::Transport(_)), "{err:?}");
}

#[tokio::test]
async fn proxy_round_trip_against_real_backend() {
    let (addr, seen) = spawn_backend().await;
    let dir = TempDir::new().expect("tempdir");
    let store = Arc::new(DiskBlobStore::new(dir.path().to_path_buf(), "meshx").expect("store"));
    let renderer = RenderService::new(
        store.clone(),
        Arc::new(upstream(addr, "", Duration::from_secs(5))),
    )
    .with_coalescing(true);
    let router = build_router(HttpState {
        renderer: Arc::new(renderer),
    });

    for expected in ["MISS", "HIT"] {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/?text=Hello")
            .body(Body::empty())
            .expect("request should build");
        let response = router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["x-cache"].to_str().expect("ascii"),
            expected
        );
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should collect");
        assert_eq!(&body[..], b"Hello|ackaisyo.ttf");
    }

    assert_eq!(seen.lock().expect("seen lock").len(), 1);
    let blob = std::fs::read(store.path_for(&CacheKey::derive("Hello", "ackaisyo.ttf")))
        .expect("blob should be on disk");
    assert_eq!(blob, b"Hello|ackaisyo.ttf");
}
