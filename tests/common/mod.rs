//! Common test utilities for lms-qa integration tests
//!
//! [`MockLms`] serves a small course over a Canvas-compatible REST API using
//! wiremock; [`engine_for`] builds an engine wired to it with a temporary
//! result store.

#![allow(dead_code)]

use lms_qa::{Config, ContentKind, ExecutionEngine, ExecutionId, QAResult, TaskConfig, UrlMapping};
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Course id used by every mock
pub const COURSE_ID: &str = "42";

/// Old and new hosts used by the standard mapping
pub const OLD_HOST: &str = "http://old.example.edu";
pub const NEW_HOST: &str = "https://new.example.edu";

/// A page served by the mock LMS
pub struct MockPage {
    pub url: String,
    pub title: String,
    pub body: String,
}

impl MockPage {
    pub fn new(url: &str, body: &str) -> Self {
        Self {
            url: url.to_string(),
            title: format!("Page {url}"),
            body: body.to_string(),
        }
    }
}

/// Five pages, each linking to the old host
pub fn five_linked_pages() -> Vec<MockPage> {
    (1..=5)
        .map(|i| {
            MockPage::new(
                &format!("page-{i}"),
                &format!(r#"<p>Week {i}: <a href="{OLD_HOST}/week/{i}">notes</a></p>"#),
            )
        })
        .collect()
}

/// Mock Canvas-compatible LMS
pub struct MockLms {
    pub server: MockServer,
}

impl MockLms {
    /// Start a mock LMS serving `pages`, accepting every update
    pub async fn start(pages: &[MockPage]) -> Self {
        Self::start_with_delay(pages, Duration::ZERO).await
    }

    /// Like [`start`](Self::start), with every page fetch delayed by `delay`
    pub async fn start_with_delay(pages: &[MockPage], delay: Duration) -> Self {
        let server = MockServer::start().await;

        let listing: Vec<Value> = pages
            .iter()
            .map(|p| json!({ "url": p.url, "title": p.title }))
            .collect();
        Mock::given(method("GET"))
            .and(path(pages_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing))
            .mount(&server)
            .await;

        for page in pages {
            Mock::given(method("GET"))
                .and(path(page_path(&page.url)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({
                            "url": page.url,
                            "title": page.title,
                            "body": page.body,
                            "html_url": format!("{}/courses/{COURSE_ID}/pages/{}", server.uri(), page.url),
                        }))
                        .set_delay(delay),
                )
                .mount(&server)
                .await;

            Mock::given(method("PUT"))
                .and(path(page_path(&page.url)))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "url": page.url })))
                .mount(&server)
                .await;
        }

        Self { server }
    }

    /// Answer every request for one page with `status`, ahead of the normal mocks
    pub async fn fail_page(&self, url: &str, status: u16) {
        Mock::given(path(page_path(url)))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "errors": [{ "message": "mocked failure" }]
            })))
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Answer the next request for one page with 429 and a `Retry-After` header
    pub async fn throttle_page_once(&self, url: &str, retry_after_secs: u64) {
        Mock::given(method("GET"))
            .and(path(page_path(url)))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", retry_after_secs.to_string().as_str()),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Every request the mock has seen
    pub async fn requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Update requests, as (page url, new body)
    pub async fn updates(&self) -> Vec<(String, String)> {
        self.requests()
            .await
            .into_iter()
            .filter(|r| r.method.as_str() == "PUT")
            .map(|r| {
                let url = r
                    .url
                    .path_segments()
                    .and_then(|mut s| s.next_back().map(String::from))
                    .unwrap_or_default();
                let body: Value = r.body_json().unwrap_or(Value::Null);
                let html = body["wiki_page"]["body"].as_str().unwrap_or_default().to_string();
                (url, html)
            })
            .collect()
    }

    /// Engine configuration pointing at this mock, with a fast retry policy
    pub fn config(&self, temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.canvas.base_url = self.server.uri();
        config.canvas.access_token = "test-token".to_string();
        config.canvas.request_timeout = Duration::from_secs(5);
        config.retry.initial_delay = Duration::from_millis(10);
        config.retry.max_delay = Duration::from_millis(50);
        config.retry.jitter = false;
        config.progress.min_interval_ms = 50;
        config.persistence.database_path = temp_dir.path().join("lms-qa.db");
        config
    }
}

pub fn pages_path() -> String {
    format!("/api/v1/courses/{COURSE_ID}/pages")
}

pub fn page_path(url: &str) -> String {
    format!("/api/v1/courses/{COURSE_ID}/pages/{url}")
}

/// Engine talking to `lms`, storing results under `temp_dir`
pub async fn engine_for(lms: &MockLms, temp_dir: &TempDir) -> ExecutionEngine {
    ExecutionEngine::new(lms.config(temp_dir))
        .await
        .expect("engine should start")
}

/// find_replace over the course pages with the standard host mapping
pub fn host_migration() -> TaskConfig {
    TaskConfig::new("find_replace", COURSE_ID)
        .with_content_types(vec![ContentKind::Pages])
        .with_mappings(vec![UrlMapping::new(OLD_HOST, NEW_HOST)])
}

/// Wait for the terminal result, failing the test after 10 seconds
pub async fn wait_for_result(engine: &ExecutionEngine, id: ExecutionId) -> QAResult {
    tokio::time::timeout(Duration::from_secs(10), engine.wait(id))
        .await
        .expect("execution should finish within 10 seconds")
        .expect("execution should produce a result")
}
