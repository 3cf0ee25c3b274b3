//! Admin API over a real listener.

use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;

use service_link::admin::{setup_admin_router, AdminState};
use service_link::ServiceRequest;

mod common;

async fn serve_admin(link: Arc<service_link::ServiceLink>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = setup_admin_router(AdminState::new(link));
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}

fn http() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn test_admin_requires_bearer_key() {
    let backend = common::start_mock_backend(200, "{}").await;
    let link = Arc::new(common::build_link(&format!(
        r#"
[admin]
api_key = "admin-secret"

[[services]]
name = "ai"
base_url = "http://{backend}"
"#
    )));
    let base = serve_admin(link).await;

    let res = http().get(format!("{}/admin/status", base)).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = http()
        .get(format!("{}/admin/status", base))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = http()
        .get(format!("{}/admin/status", base))
        .bearer_auth("admin-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "operational");
    assert_eq!(body["services"], 1);
}

#[tokio::test]
async fn test_breaker_listing_and_reset() {
    let backend = common::start_mock_backend(503, "{}").await;
    let link = Arc::new(common::build_link(&format!(
        r#"
[admin]
api_key = "admin-secret"

[defaults]
retries = 0

[defaults.circuit_breaker]
volume_threshold = 1
reset_timeout_ms = 60000

[[services]]
name = "ai"
base_url = "http://{backend}"
"#
    )));
    let _ = link.client().call("ai", ServiceRequest::get("/x")).await;
    let base = serve_admin(link.clone()).await;

    let breakers: Value = http()
        .get(format!("{}/admin/breakers", base))
        .bearer_auth("admin-secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(breakers[0]["service"], "ai");
    assert_eq!(breakers[0]["group"], "default");
    assert_eq!(breakers[0]["state"], "open");

    let res = http()
        .post(format!("{}/admin/breakers/ai/default/reset", base))
        .bearer_auth("admin-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(
        link.breakers().state("ai", "default"),
        Some(service_link::resilience::CircuitState::Closed)
    );

    let res = http()
        .post(format!("{}/admin/breakers/nope/default/reset", base))
        .bearer_auth("admin-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    let services: Value = http()
        .get(format!("{}/admin/services", base))
        .bearer_auth("admin-secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(services[0]["name"], "ai");
    assert_eq!(services[0]["endpoints"][0]["healthy"], true);
}
