//! Bearer credentials obtained from a refresh endpoint.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use service_link::{ErrorKind, ServiceRequest};

mod common;

async fn start_token_issuer(refreshes: Arc<AtomicU32>) -> std::net::SocketAddr {
    common::start_programmable_backend(move |request| {
        let refreshes = refreshes.clone();
        async move {
            assert_eq!(request.method, "POST");
            assert!(request.body.contains("\"refreshToken\":\"rt-1\""));
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let n = refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            (200, format!(r#"{{"accessToken":"tok-{}","expiresIn":3600}}"#, n))
        }
    })
    .await
}

fn config(backend: std::net::SocketAddr, issuer: std::net::SocketAddr) -> String {
    format!(
        r#"
[health_check]
enabled = false

[defaults]
retries = 0

[[services]]
name = "ai"
base_url = "http://{backend}"

[services.authentication]
type = "jwt"
refresh_url = "http://{issuer}/auth/refresh"
refresh_token = "rt-1"
"#
    )
}

#[tokio::test]
async fn test_concurrent_calls_share_one_refresh() {
    let refreshes = Arc::new(AtomicU32::new(0));
    let issuer = start_token_issuer(refreshes.clone()).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let backend = common::start_programmable_backend(move |request| {
        sink.lock()
            .unwrap()
            .push(request.header("authorization").map(str::to_string));
        async { (200, "{}".to_string()) }
    })
    .await;

    let link = Arc::new(common::build_link(&config(backend, issuer)));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let link = link.clone();
        handles.push(tokio::spawn(async move {
            link.client().call("ai", ServiceRequest::get("/prep")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 8);
    assert!(seen.iter().all(|h| h.as_deref() == Some("Bearer tok-1")));
}

#[tokio::test]
async fn test_unauthorized_response_invalidates_credential() {
    let refreshes = Arc::new(AtomicU32::new(0));
    let issuer = start_token_issuer(refreshes.clone()).await;

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let backend = common::start_programmable_backend(move |_| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                (401, r#"{"error":"expired"}"#.into())
            } else {
                (200, "{}".into())
            }
        }
    })
    .await;

    let link = common::build_link(&config(backend, issuer));
    let err = link
        .client()
        .call("ai", ServiceRequest::get("/prep"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailure);
    assert!(err.fallback().is_none());

    link.client().call("ai", ServiceRequest::get("/prep")).await.unwrap();
    assert_eq!(refreshes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_issuer_is_auth_failure() {
    let issuer = common::closed_port().await;
    let backend = common::start_mock_backend(200, "{}").await;

    let link = common::build_link(&config(backend, issuer));
    let err = link
        .client()
        .call("ai", ServiceRequest::get("/prep"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailure);
}
