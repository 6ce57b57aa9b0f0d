//! Bulk find & replace across course content

use super::TaskContext;
use crate::error::{Error, Result};
use crate::registry::{Task, TaskDescriptor};
use crate::rewriter::{Change, Rewriter};
use crate::types::{ContentItem, Finding, FindingKind, TaskConfig, ValidationResult};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;

/// Registry key
pub const NAME: &str = "find_replace";

/// Replaces URLs (or any literal text) in links, sources and body text
///
/// Items are fetched one at a time, rewritten with [`Rewriter`], and written
/// back only when something changed. In preview mode nothing is written and
/// every match is reported as `found`.
#[derive(Debug, Default)]
pub struct FindReplaceTask;

/// Registry descriptor for [`FindReplaceTask`]
pub fn descriptor() -> TaskDescriptor {
    TaskDescriptor::new(NAME, "1.0.0", || Arc::new(FindReplaceTask) as Arc<dyn Task>)
        .with_display_name("Find & Replace URLs")
        .with_description(
            "Find and replace URLs in course content while preserving the surrounding markup.",
        )
        .with_permissions(&["read_course_content", "manage_course_content_edit"])
        .with_help_text(
            "Each mapping replaces every occurrence of `find` with `replace` in link targets, \
             media sources, embedded API endpoints and visible text. Scripts and styles are \
             never touched. Enable preview_mode first to see what would change.",
        )
        .with_example(json!({
            "task_name": NAME,
            "course_id": "12345",
            "mappings": [
                {
                    "find": "http://old-domain.edu",
                    "replace": "https://new-domain.edu",
                    "description": "Domain migration"
                }
            ],
            "options": { "case_sensitive": false, "whole_word": false, "preview_mode": true }
        }))
        .with_example(json!({
            "task_name": NAME,
            "course_id": "12345",
            "content_types": ["pages", "assignments"],
            "mappings": [
                { "find": "http://", "replace": "https://", "description": "Force HTTPS" }
            ]
        }))
}

/// Absolute http(s) URL check used for warnings
pub(crate) fn looks_like_url(value: &str) -> bool {
    url::Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
        .unwrap_or(false)
}

pub(crate) fn validate_common(config: &TaskConfig, result: &mut ValidationResult) {
    if config.course_id.trim().is_empty() {
        result.add_error("course_id is required");
    }
    if config.content_types.is_empty() {
        result.add_error("at least one content type must be selected");
    }
    if config.timeout_seconds == Some(0) {
        result.add_error("timeout_seconds must be greater than zero");
    }
}

#[async_trait]
impl Task for FindReplaceTask {
    fn validate_config(&self, config: &TaskConfig) -> ValidationResult {
        let mut result = ValidationResult::default();
        validate_common(config, &mut result);

        let mut seen = HashSet::new();
        for (i, mapping) in config.mappings.iter().enumerate() {
            let n = i + 1;
            if mapping.find.is_empty() {
                result.add_error(format!("mapping {n}: find value is required"));
                continue;
            }
            if mapping.replace.is_empty() {
                result.add_error(format!("mapping {n}: replace value is required"));
            }

            let key = if config.options.case_sensitive {
                mapping.find.clone()
            } else {
                mapping.find.to_lowercase()
            };
            if !seen.insert(key) {
                result.add_error(format!("mapping {n}: duplicate find value '{}'", mapping.find));
            }

            if mapping.find == mapping.replace {
                result.add_warning(format!("mapping {n}: find and replace are identical"));
            }
            if !looks_like_url(&mapping.find) {
                result.add_warning(format!(
                    "mapping {n}: find value '{}' does not look like a URL",
                    mapping.find
                ));
            }
            if !mapping.replace.is_empty() && !looks_like_url(&mapping.replace) {
                result.add_warning(format!(
                    "mapping {n}: replace value '{}' does not look like a URL",
                    mapping.replace
                ));
            }
        }

        result
    }

    fn config_schema(&self) -> Value {
        super::task_config_schema()
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<()> {
        let config = &ctx.config;
        let rewriter = Rewriter::new(&config.mappings, config.options)
            .map_err(|e| Error::Other(format!("failed to compile mappings: {e}")))?;

        if rewriter.is_empty() {
            tracing::info!(execution_id = %ctx.execution_id, "No mappings configured, nothing to do");
            return Ok(());
        }

        let items = ctx.list_items().await?;
        let total = items.len();
        tracing::info!(
            execution_id = %ctx.execution_id,
            items = total,
            preview = config.options.preview_mode,
            "Scanning content"
        );

        for (index, item_ref) in items.iter().enumerate() {
            ctx.check_cancelled()?;

            let item = match ctx.content.fetch(item_ref.kind, &config.course_id, &item_ref.id).await {
                Ok(item) => item,
                Err(error) => {
                    ctx.handle_item_error(item_ref, error)?;
                    ctx.report_item(index, total, item_ref).await;
                    continue;
                }
            };

            let rewrite = rewriter.rewrite(&item.body);
            if rewrite.changes.is_empty() {
                ctx.item_completed(item.kind);
                ctx.report_item(index, total, item_ref).await;
                continue;
            }

            ctx.tracker.update_stats(|s| s.items_found += 1);

            if config.options.preview_mode {
                for change in &rewrite.changes {
                    ctx.record(change_finding(FindingKind::Found, &item, change, config));
                }
                ctx.item_completed(item.kind);
            } else if rewrite.is_modified() {
                match ctx
                    .content
                    .update(item.kind, &config.course_id, &item.id, &rewrite.html)
                    .await
                {
                    Ok(()) => {
                        for change in &rewrite.changes {
                            ctx.record(change_finding(FindingKind::Replaced, &item, change, config));
                        }
                        ctx.tracker.update_stats(|s| s.items_replaced += 1);
                        ctx.item_completed(item.kind);
                        tracing::debug!(
                            execution_id = %ctx.execution_id,
                            kind = %item.kind,
                            content_id = %item.id,
                            changes = rewrite.changes.len(),
                            "Updated content item"
                        );
                    }
                    Err(error) => ctx.handle_item_error(item_ref, error)?,
                }
            } else {
                // Every match maps to itself; report without writing
                for change in &rewrite.changes {
                    ctx.record(change_finding(FindingKind::Found, &item, change, config));
                }
                ctx.item_completed(item.kind);
            }

            ctx.report_item(index, total, item_ref).await;
        }

        Ok(())
    }
}

fn change_finding(kind: FindingKind, item: &ContentItem, change: &Change, config: &TaskConfig) -> Finding {
    let verb = if kind == FindingKind::Replaced { "Replaced" } else { "Would replace" };
    let mut description = format!("{verb} in {}", change.location);
    if let Some(note) = config
        .mappings
        .get(change.mapping_index)
        .and_then(|m| m.description.as_deref())
    {
        description.push_str(&format!(" ({note})"));
    }

    Finding::for_item(kind, &item.as_ref())
        .with_values(change.original.clone(), Some(change.replacement.clone()))
        .with_description(description)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContentError;
    use crate::tasks::test_support::{MemoryContent, context};
    use crate::types::{ContentKind, RewriteOptions, UrlMapping};

    fn config(mappings: Vec<UrlMapping>) -> TaskConfig {
        TaskConfig::new(NAME, "42")
            .with_mappings(mappings)
            .with_content_types(vec![ContentKind::Pages])
    }

    fn old_to_new() -> Vec<UrlMapping> {
        vec![UrlMapping::new("http://old.edu", "https://new.edu")]
    }

    #[test]
    fn config_schema_follows_task_config_shape() {
        let schema = FindReplaceTask.config_schema();

        assert_eq!(schema["type"], "object");
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(required.contains(&"task_name"));
        assert!(required.contains(&"course_id"));
        assert!(!required.contains(&"mappings"), "an empty mapping list is valid");

        for field in ["mappings", "options", "content_types", "timeout_seconds"] {
            assert!(schema["properties"].get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn validation_reports_errors_and_warnings() {
        let task = FindReplaceTask;
        let config = config(vec![
            UrlMapping::new("", "https://x.edu"),
            UrlMapping::new("http://a.edu", ""),
            UrlMapping::new("http://A.edu", "https://b.edu"),
            UrlMapping::new("old-name", "new-name"),
        ]);

        let result = task.validate_config(&config);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("mapping 1: find")));
        assert!(result.errors.iter().any(|e| e.contains("mapping 2: replace")));
        assert!(result.errors.iter().any(|e| e.contains("mapping 3: duplicate")));
        assert!(result.warnings.iter().any(|w| w.contains("'old-name'")));
    }

    #[test]
    fn duplicates_respect_case_sensitivity() {
        let task = FindReplaceTask;
        let config = config(vec![
            UrlMapping::new("http://a.edu", "https://b.edu"),
            UrlMapping::new("http://A.edu", "https://c.edu"),
        ])
        .with_options(RewriteOptions {
            case_sensitive: true,
            ..Default::default()
        });
        assert!(task.validate_config(&config).is_valid());
    }

    #[test]
    fn empty_mapping_list_is_valid() {
        assert!(FindReplaceTask.validate_config(&config(vec![])).is_valid());
    }

    #[test]
    fn missing_course_is_rejected() {
        let config = TaskConfig::new(NAME, " ").with_mappings(old_to_new());
        assert!(!FindReplaceTask.validate_config(&config).is_valid());
    }

    #[tokio::test]
    async fn empty_mappings_make_no_calls() {
        let content = Arc::new(MemoryContent::with_pages(&[("a", "<a href=\"http://old.edu\">x</a>")]));
        let ctx = context(config(vec![]), content.clone());

        FindReplaceTask.execute(&ctx).await.unwrap();

        assert_eq!(content.calls(), 0);
        assert_eq!(ctx.tracker.stats().items_processed, 0);
        assert!(ctx.tracker.findings().is_empty());
    }

    #[tokio::test]
    async fn replaces_and_writes_changed_items_only() {
        let content = Arc::new(MemoryContent::with_pages(&[
            ("a", "<a href=\"http://old.edu/x\">link</a>"),
            ("b", "<p>nothing here</p>"),
        ]));
        let ctx = context(config(old_to_new()), content.clone());

        FindReplaceTask.execute(&ctx).await.unwrap();

        let updates = content.updates.lock().unwrap().clone();
        assert_eq!(updates, [("a".to_string(), "<a href=\"https://new.edu/x\">link</a>".to_string())]);

        let stats = ctx.tracker.stats();
        assert_eq!(stats.items_processed, 2);
        assert_eq!(stats.items_found, 1);
        assert_eq!(stats.items_replaced, 1);
        assert_eq!(stats.items_by_kind["pages"], 2);

        let findings = ctx.tracker.findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::Replaced);
        assert_eq!(findings[0].content_id.as_deref(), Some("a"));
        assert_eq!(findings[0].original_value.as_deref(), Some("http://old.edu"));
        assert_eq!(findings[0].new_value.as_deref(), Some("https://new.edu"));
    }

    #[tokio::test]
    async fn preview_mode_never_writes() {
        let content = Arc::new(MemoryContent::with_pages(&[(
            "a",
            "<a href=\"http://old.edu\">http://old.edu</a>",
        )]));
        let ctx = context(
            config(old_to_new()).with_options(RewriteOptions {
                preview_mode: true,
                ..Default::default()
            }),
            content.clone(),
        );

        FindReplaceTask.execute(&ctx).await.unwrap();

        assert!(content.updates.lock().unwrap().is_empty());
        let findings = ctx.tracker.findings();
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.kind == FindingKind::Found));
        assert_eq!(ctx.tracker.stats().items_replaced, 0);
    }

    #[tokio::test]
    async fn forbidden_item_is_skipped() {
        let pages: Vec<(String, String)> = (1..=5)
            .map(|i| (i.to_string(), "<a href=\"http://old.edu\">x</a>".to_string()))
            .collect();
        let pages: Vec<(&str, &str)> = pages.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let content = Arc::new(MemoryContent::with_pages(&pages));
        content.fail(
            "3",
            ContentError::Forbidden {
                resource: "pages/3".into(),
            },
        );
        let ctx = context(config(old_to_new()), content.clone());

        FindReplaceTask.execute(&ctx).await.unwrap();

        let stats = ctx.tracker.stats();
        assert_eq!(stats.items_replaced, 4);
        assert_eq!(stats.errors, 1);

        let errors: Vec<_> = ctx
            .tracker
            .findings()
            .into_iter()
            .filter(|f| f.kind == FindingKind::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].content_id.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn not_found_item_is_info() {
        let content = Arc::new(MemoryContent::with_pages(&[("a", "x"), ("b", "y")]));
        content.fail("a", ContentError::NotFound { resource: "pages/a".into() });
        let ctx = context(config(old_to_new()), content);

        FindReplaceTask.execute(&ctx).await.unwrap();

        let findings = ctx.tracker.findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::Info);
        assert_eq!(ctx.tracker.stats().errors, 0);
    }

    #[tokio::test]
    async fn auth_failure_aborts_and_keeps_partial_findings() {
        let content = Arc::new(MemoryContent::with_pages(&[
            ("a", "<a href=\"http://old.edu\">x</a>"),
            ("b", "<a href=\"http://old.edu\">x</a>"),
            ("c", "<a href=\"http://old.edu\">x</a>"),
        ]));
        content.fail_update("b", ContentError::AuthExpired);
        let ctx = context(config(old_to_new()), content.clone());

        let err = FindReplaceTask.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Content(ContentError::AuthExpired)));

        // Item "a" stays written
        assert_eq!(content.updates.lock().unwrap().len(), 1);
        assert_eq!(ctx.tracker.findings().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_item() {
        let content = Arc::new(MemoryContent::with_pages(&[
            ("a", "<a href=\"http://old.edu\">x</a>"),
            ("b", "<a href=\"http://old.edu\">x</a>"),
            ("c", "<a href=\"http://old.edu\">x</a>"),
        ]));
        let ctx = context(config(old_to_new()), content.clone());
        *content.cancel_on_fetch.lock().unwrap() = Some(("b".into(), ctx.cancel_token.clone()));

        let err = FindReplaceTask.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        // "b" was in flight when cancellation fired and completes; "c" is never fetched
        let ids: Vec<String> = ctx
            .tracker
            .findings()
            .into_iter()
            .filter_map(|f| f.content_id)
            .collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(content.calls(), 4);
    }
}
