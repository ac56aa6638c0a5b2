//! HTTP routing, bearer auth and error mapping

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use dockyard::models::project::{Project, ProjectStatus, SourceKind};
use dockyard::server::serve::router;
use dockyard::store::JsonStore;
use dockyard::terminal::TerminalConfig;

use crate::common::{server_state, token};

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<JsonStore>,
    app: Router,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStore::in_memory());
    let state = server_state(store.clone(), dir.path(), TerminalConfig::default());
    Fixture {
        _dir: dir,
        store,
        app: router(state),
    }
}

fn request(method: Method, uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn project(id: &str) -> Project {
    Project {
        id: id.to_string(),
        name: "demo".to_string(),
        source: SourceKind::Upload,
        git_url: None,
        git_branch: None,
        kind: Default::default(),
        status: ProjectStatus::Pending,
        domain: None,
    }
}

#[tokio::test]
async fn test_health_is_public() {
    let fx = fixture();
    let response = fx.app.oneshot(request(Method::GET, "/api/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["service"], "dockyard");
}

#[tokio::test]
async fn test_protected_routes_require_bearer() {
    let fx = fixture();

    let response = fx
        .app
        .clone()
        .oneshot(request(Method::GET, "/api/ports", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = fx
        .app
        .oneshot(request(Method::GET, "/api/ports", Some("not-a-jwt")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn test_port_listing_covers_range() {
    let fx = fixture();
    let response = fx
        .app
        .oneshot(request(Method::GET, "/api/ports", Some(&token())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["first"], 3001);
    assert_eq!(body["last"], 3003);
    let ports = body["ports"].as_array().unwrap();
    assert_eq!(ports.len(), 3);
    assert!(ports.iter().all(|p| p["locked"] == false));
}

#[tokio::test]
async fn test_release_outside_range_is_bad_request() {
    let fx = fixture();
    let response = fx
        .app
        .oneshot(request(Method::DELETE, "/api/ports/8080", Some(&token())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let fx = fixture();
    let response = fx
        .app
        .oneshot(request(Method::POST, "/api/projects/nope/stop", Some(&token())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deploy_without_files_is_rejected() {
    let fx = fixture();
    fx.store.insert_project(project("p1")).await.unwrap();

    let response = fx
        .app
        .oneshot(request(Method::POST, "/api/projects/p1/deploy", Some(&token())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"]
        .as_str()
        .unwrap()
        .contains("Project files not found"));
}

#[tokio::test]
async fn test_deployment_history_starts_empty() {
    let fx = fixture();
    fx.store.insert_project(project("p1")).await.unwrap();

    let response = fx
        .app
        .oneshot(request(Method::GET, "/api/projects/p1/deployments?limit=500", Some(&token())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn test_stream_of_foreign_container_is_not_found() {
    let fx = fixture();
    fx.store.insert_project(project("p1")).await.unwrap();

    let response = fx
        .app
        .oneshot(request(
            Method::GET,
            "/api/projects/p1/stream/dl_other_app",
            Some(&token()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
