use super::*;
use crate::db::Database;
use crate::engine::ContentSource;
use crate::registry::TaskRegistry;
use crate::tasks::test_support::MemoryContent;
use crate::types::{ExecutionId, TaskConfig, UrlMapping};
use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use std::time::Duration;
use tower::ServiceExt;


const PAGES: &[(&str, &str)] = &[
    ("welcome", r#"<p><a href="http://old.edu/syllabus">Syllabus</a></p>"#),
    ("week-1", r#"<img src="http://old.edu/img/banner.png">"#),
    ("week-2", "<p>No links here</p>"),
];

/// Engine over in-memory course content, with an optional result store
fn create_test_engine(db: Option<Arc<Database>>) -> (ExecutionEngine, Arc<MemoryContent>) {
    let content = Arc::new(MemoryContent::with_pages(PAGES));
    let registry = Arc::new(TaskRegistry::with_builtin_tasks().unwrap());
    let engine = ExecutionEngine::with_parts(
        Config::default(),
        registry,
        ContentSource::Custom(content.clone()),
        db,
    );
    (engine, content)
}

fn create_test_app(engine: &ExecutionEngine) -> Router {
    create_router(engine.clone(), Arc::new(Config::default()))
}

fn find_replace_config() -> TaskConfig {
    TaskConfig::new("find_replace", "42")
        .with_mappings(vec![UrlMapping::new("http://old.edu", "https://new.edu")])
}

/// Send a request and decode the JSON response body (Null for an empty body)
async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

/// Submit through the API and wait for the execution to finish
async fn run_to_completion(app: &Router, engine: &ExecutionEngine, config: &TaskConfig) -> ExecutionId {
    let (status, json) = send(app, post_json("/api/v1/executions", config)).await;
    assert_eq!(status, StatusCode::ACCEPTED, "unexpected body: {json}");

    let id: ExecutionId = json["execution_id"].as_str().unwrap().parse().unwrap();
    tokio::time::timeout(Duration::from_secs(5), engine.wait(id))
        .await
        .expect("execution should finish")
        .unwrap();
    id
}

#[tokio::test]
async fn test_api_server_spawns() {
    let (engine, _content) = create_test_engine(None);

    let mut config = Config::default();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let config = Arc::new(config);

    let api_handle = tokio::spawn({
        let engine = engine.clone();
        let config = config.clone();
        async move { start_api_server(engine, config).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server should still be serving");

    api_handle.abort();
}

#[tokio::test]
async fn test_cors_allows_any_origin_by_default() {
    let (engine, _content) = create_test_engine(None);
    let app = create_test_app(&engine);

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("origin", "https://lms.example.edu")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn test_cors_disabled_sends_no_cors_headers() {
    let (engine, _content) = create_test_engine(None);
    let mut config = Config::default();
    config.api.cors_enabled = false;
    let app = create_router(engine, Arc::new(config));

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("origin", "https://lms.example.edu")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(response.headers().get("access-control-allow-origin").is_none());
}

#[test]
fn test_build_cors_layer_accepts_explicit_origins() {
    // Unparseable origins are dropped rather than rejected
    let _layer = build_cors_layer(&[
        "https://lms.example.edu".to_string(),
        "not a header\n".to_string(),
    ]);
}
