//! Rate-limited client for the remote content API
//!
//! [`ContentClient`] talks to a Canvas-compatible REST API. Every request goes
//! through [`with_retry`], which takes a token from the shared [`RateLimiter`]
//! first and classifies failures with [`crate::classify`].

use crate::classify::{classify_parse, classify_status, classify_transport};
use crate::config::{CanvasConfig, RateLimitConfig, RetryConfig};
use crate::error::{ContentError, Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::retry::{CallCounters, with_retry};
use crate::types::{ContentItem, ContentKind, ContentRef};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use reqwest::Method;
use reqwest::header::{HeaderMap, LINK};
use serde_json::{Value, json};
use std::sync::Arc;
use url::Url;

/// Access to course content, abstracted for testability
///
/// Implemented by [`ContentClient`] for the real LMS; tests can provide an
/// in-memory implementation.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Lazily list every item of `kind` in the course, following pagination
    fn list(&self, kind: ContentKind, course_id: &str) -> BoxStream<'static, std::result::Result<ContentRef, ContentError>>;

    /// Fetch one item with its HTML body
    async fn fetch(
        &self,
        kind: ContentKind,
        course_id: &str,
        id: &str,
    ) -> std::result::Result<ContentItem, ContentError>;

    /// Replace the HTML body of one item
    async fn update(
        &self,
        kind: ContentKind,
        course_id: &str,
        id: &str,
        body: &str,
    ) -> std::result::Result<(), ContentError>;
}

/// Per-kind API layout
struct KindSpec {
    /// Collection path segment under `courses/{id}`
    segment: &'static str,
    /// Field carrying the item identifier in list responses
    id_field: &'static str,
    /// Field carrying the display title
    title_field: &'static str,
    /// Field carrying the HTML body
    body_field: &'static str,
}

fn kind_spec(kind: ContentKind) -> KindSpec {
    match kind {
        ContentKind::Syllabus => KindSpec {
            segment: "",
            id_field: "id",
            title_field: "name",
            body_field: "syllabus_body",
        },
        ContentKind::Pages => KindSpec {
            segment: "pages",
            id_field: "url",
            title_field: "title",
            body_field: "body",
        },
        ContentKind::Assignments => KindSpec {
            segment: "assignments",
            id_field: "id",
            title_field: "name",
            body_field: "description",
        },
        ContentKind::Quizzes => KindSpec {
            segment: "quizzes",
            id_field: "id",
            title_field: "title",
            body_field: "description",
        },
        ContentKind::Discussions | ContentKind::Announcements => KindSpec {
            segment: "discussion_topics",
            id_field: "id",
            title_field: "title",
            body_field: "message",
        },
    }
}

/// JSON body for updating the HTML of one item
fn update_envelope(kind: ContentKind, body: &str) -> Value {
    match kind {
        ContentKind::Syllabus => json!({ "course": { "syllabus_body": body } }),
        ContentKind::Pages => json!({ "wiki_page": { "body": body } }),
        ContentKind::Assignments => json!({ "assignment": { "description": body } }),
        ContentKind::Quizzes => json!({ "quiz": { "description": body } }),
        ContentKind::Discussions | ContentKind::Announcements => json!({ "message": body }),
    }
}

/// Client for the remote content API
///
/// Clones share the HTTP connection pool, the rate limiter and the call
/// counters. Use [`ContentClient::scoped`] to get a handle with fresh counters
/// for one execution.
#[derive(Clone)]
pub struct ContentClient {
    http: reqwest::Client,
    api_base: Url,
    access_token: Arc<str>,
    per_page: u32,
    limiter: RateLimiter,
    retry: RetryConfig,
    max_rate_limit_waits: u32,
    counters: Arc<CallCounters>,
}

impl std::fmt::Debug for ContentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentClient")
            .field("api_base", &self.api_base.as_str())
            .field("per_page", &self.per_page)
            .finish_non_exhaustive()
    }
}

impl ContentClient {
    /// Create a client
    pub fn new(
        canvas: &CanvasConfig,
        retry: RetryConfig,
        rate_limit: &RateLimitConfig,
        limiter: RateLimiter,
    ) -> Result<Self> {
        let mut api_base = Url::parse(&canvas.base_url).map_err(|e| Error::Config {
            message: format!("invalid base_url: {e}"),
            key: Some("canvas.base_url".to_string()),
        })?;
        api_base
            .path_segments_mut()
            .map_err(|_| Error::Config {
                message: "base_url cannot carry a path".to_string(),
                key: Some("canvas.base_url".to_string()),
            })?
            .pop_if_empty()
            .extend(["api", "v1"]);

        let http = reqwest::Client::builder()
            .timeout(canvas.request_timeout)
            .user_agent(concat!("lms-qa/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base,
            access_token: Arc::from(canvas.access_token.as_str()),
            per_page: canvas.per_page.max(1),
            limiter,
            retry,
            max_rate_limit_waits: rate_limit.max_rate_limit_waits,
            counters: Arc::new(CallCounters::default()),
        })
    }

    /// Handle sharing everything except the call counters
    pub fn scoped(&self) -> Self {
        Self {
            counters: Arc::new(CallCounters::default()),
            ..self.clone()
        }
    }

    /// Counters for requests issued through this handle
    pub fn counters(&self) -> Arc<CallCounters> {
        self.counters.clone()
    }

    /// The shared rate limiter
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn endpoint(&self, segments: &[&str]) -> std::result::Result<Url, ContentError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| ContentError::Fatal {
                status: None,
                message: "API base URL cannot carry a path".to_string(),
            })?
            .extend(segments.iter().filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn collection_url(&self, kind: ContentKind, course_id: &str) -> std::result::Result<Url, ContentError> {
        let spec = kind_spec(kind);
        let mut url = self.endpoint(&["courses", course_id, spec.segment])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("per_page", &self.per_page.to_string());
            if kind == ContentKind::Announcements {
                query.append_pair("only_announcements", "true");
            }
        }
        Ok(url)
    }

    fn item_url(&self, kind: ContentKind, course_id: &str, id: &str) -> std::result::Result<Url, ContentError> {
        match kind {
            ContentKind::Syllabus => {
                let mut url = self.endpoint(&["courses", course_id])?;
                url.query_pairs_mut().append_pair("include[]", "syllabus_body");
                Ok(url)
            }
            _ => self.endpoint(&["courses", course_id, kind_spec(kind).segment, id]),
        }
    }

    /// Send one request through the limiter and retry loop
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
        resource: &str,
    ) -> std::result::Result<(Value, HeaderMap), ContentError> {
        let http = &self.http;
        let token: &str = &self.access_token;
        let method = &method;
        let url = &url;
        let body = body.as_ref();

        with_retry(
            &self.retry,
            &self.limiter,
            self.max_rate_limit_waits,
            &self.counters,
            move || async move {
                let mut request = http.request(method.clone(), url.clone()).bearer_auth(token);
                if let Some(body) = body {
                    request = request.json(body);
                }

                let response = request.send().await.map_err(|e| classify_transport(&e))?;
                let status = response.status();
                let headers = response.headers().clone();
                let text = response.text().await.map_err(|e| classify_transport(&e))?;

                if !status.is_success() {
                    return Err(classify_status(status, &headers, resource, &text));
                }

                let value = if text.trim().is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(&text).map_err(|e| classify_parse(&e))?
                };
                Ok((value, headers))
            },
        )
        .await
    }

    /// Fetch one page of a listing, returning its items and the next page URL
    async fn list_page(
        &self,
        kind: ContentKind,
        url: Url,
        resource: &str,
    ) -> std::result::Result<(Vec<ContentRef>, Option<Url>), ContentError> {
        let (value, headers) = self.send(Method::GET, url, None, resource).await?;
        let Value::Array(items) = value else {
            return Err(ContentError::Data {
                message: format!("expected a list of {kind}"),
            });
        };

        let spec = kind_spec(kind);
        let refs = items
            .iter()
            .map(|item| {
                let id = field_as_id(item, spec.id_field).ok_or_else(|| ContentError::Data {
                    message: format!("{kind} entry without '{}'", spec.id_field),
                })?;
                let title = item
                    .get(spec.title_field)
                    .and_then(Value::as_str)
                    .unwrap_or("Untitled")
                    .to_string();
                Ok(ContentRef { kind, id, title })
            })
            .collect::<std::result::Result<Vec<_>, ContentError>>()?;

        Ok((refs, next_link(&headers)))
    }
}

#[async_trait]
impl ContentApi for ContentClient {
    fn list(&self, kind: ContentKind, course_id: &str) -> BoxStream<'static, std::result::Result<ContentRef, ContentError>> {
        if kind == ContentKind::Syllabus {
            // One syllabus per course; nothing to list
            let syllabus = ContentRef {
                kind,
                id: course_id.to_string(),
                title: "Syllabus".to_string(),
            };
            return stream::iter([Ok(syllabus)]).boxed();
        }

        let first = match self.collection_url(kind, course_id) {
            Ok(url) => url,
            Err(e) => return stream::iter([Err(e)]).boxed(),
        };
        let client = self.clone();
        let resource = format!("courses/{course_id}/{kind}");

        stream::unfold(Some(first), move |next| {
            let client = client.clone();
            let resource = resource.clone();
            async move {
                let url = next?;
                match client.list_page(kind, url, &resource).await {
                    Ok((items, next)) => {
                        let mut batch: Vec<_> = items.into_iter().map(Ok).collect();
                        // The bearer token must never follow a link off the LMS
                        let next = match next {
                            Some(next) if next.origin() != client.api_base.origin() => {
                                tracing::warn!(%next, "Refusing pagination link to another origin");
                                batch.push(Err(ContentError::Data {
                                    message: format!("pagination link leaves the LMS origin: {next}"),
                                }));
                                None
                            }
                            next => next,
                        };
                        Some((batch, next))
                    }
                    Err(e) => Some((vec![Err(e)], None)),
                }
            }
        })
        .map(stream::iter)
        .flatten()
        .boxed()
    }

    async fn fetch(
        &self,
        kind: ContentKind,
        course_id: &str,
        id: &str,
    ) -> std::result::Result<ContentItem, ContentError> {
        let url = self.item_url(kind, course_id, id)?;
        let resource = format!("{kind}/{id}");
        let (value, _) = self.send(Method::GET, url, None, &resource).await?;

        if !value.is_object() {
            return Err(ContentError::Data {
                message: format!("expected an object for {resource}"),
            });
        }

        let spec = kind_spec(kind);
        let body = match value.get(spec.body_field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(ContentError::Data {
                    message: format!("'{}' of {resource} is not a string: {other}", spec.body_field),
                });
            }
        };
        let title = match kind {
            ContentKind::Syllabus => "Syllabus".to_string(),
            _ => value
                .get(spec.title_field)
                .and_then(Value::as_str)
                .unwrap_or("Untitled")
                .to_string(),
        };

        Ok(ContentItem {
            kind,
            id: id.to_string(),
            title,
            body,
            html_url: value.get("html_url").and_then(Value::as_str).map(String::from),
        })
    }

    async fn update(
        &self,
        kind: ContentKind,
        course_id: &str,
        id: &str,
        body: &str,
    ) -> std::result::Result<(), ContentError> {
        let url = match kind {
            ContentKind::Syllabus => self.endpoint(&["courses", course_id])?,
            _ => self.item_url(kind, course_id, id)?,
        };
        let resource = format!("{kind}/{id}");
        self.send(Method::PUT, url, Some(update_envelope(kind, body)), &resource)
            .await?;

        tracing::debug!(kind = %kind, id, "Updated content item");
        Ok(())
    }
}

/// Identifier field as a string; numeric ids are rendered in decimal
fn field_as_id(item: &Value, field: &str) -> Option<String> {
    match item.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract the `rel="next"` target of an RFC 8288 `Link` header
pub fn next_link(headers: &HeaderMap) -> Option<Url> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|link| {
            let mut parts = link.split(';');
            let target = parts.next()?.trim();
            let is_next = parts.any(|param| {
                let param = param.trim();
                param == "rel=\"next\"" || param == "rel=next"
            });
            if !is_next {
                return None;
            }
            let target = target.strip_prefix('<')?.strip_suffix('>')?;
            Url::parse(target).ok()
        })
}
