//! Read-only inventory of the URLs a course references

use super::TaskContext;
use super::find_replace::validate_common;
use crate::error::Result;
use crate::registry::{Task, TaskDescriptor};
use crate::rewriter::extract_urls;
use crate::types::{Finding, FindingKind, TaskConfig, ValidationResult};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;

/// Registry key
pub const NAME: &str = "url_inventory";

/// Records one `info` finding per distinct URL; never writes
#[derive(Debug, Default)]
pub struct UrlInventoryTask;

/// Registry descriptor for [`UrlInventoryTask`]
pub fn descriptor() -> TaskDescriptor {
    TaskDescriptor::new(NAME, "1.0.0", || Arc::new(UrlInventoryTask) as Arc<dyn Task>)
        .with_display_name("URL Inventory")
        .with_description("List every distinct URL referenced by course content.")
        .with_permissions(&["read_course_content"])
        .with_help_text(
            "Scans the same attributes and text as Find & Replace and reports each URL once, \
             with the first item it appeared in. Use it to build mappings for a migration.",
        )
        .with_example(json!({ "task_name": NAME, "course_id": "12345" }))
}

#[async_trait]
impl Task for UrlInventoryTask {
    fn validate_config(&self, config: &TaskConfig) -> ValidationResult {
        let mut result = ValidationResult::default();
        validate_common(config, &mut result);
        if !config.mappings.is_empty() {
            result.add_warning("mappings are ignored by the URL inventory");
        }
        result
    }

    fn config_schema(&self) -> Value {
        super::task_config_schema()
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<()> {
        let items = ctx.list_items().await?;
        let total = items.len();
        let mut seen = HashSet::new();

        for (index, item_ref) in items.iter().enumerate() {
            ctx.check_cancelled()?;

            let item = match ctx
                .content
                .fetch(item_ref.kind, &ctx.config.course_id, &item_ref.id)
                .await
            {
                Ok(item) => item,
                Err(error) => {
                    ctx.handle_item_error(item_ref, error)?;
                    ctx.report_item(index, total, item_ref).await;
                    continue;
                }
            };

            let urls = extract_urls(&item.body);
            if !urls.is_empty() {
                ctx.tracker.update_stats(|s| s.items_found += 1);
            }
            for url in urls {
                if seen.insert(url.clone()) {
                    ctx.record(
                        Finding::for_item(FindingKind::Info, item_ref)
                            .with_values(url, None)
                            .with_description(format!("First seen in {} '{}'", item.kind, item.title)),
                    );
                }
            }

            ctx.item_completed(item.kind);
            ctx.report_item(index, total, item_ref).await;
        }

        tracing::info!(
            execution_id = %ctx.execution_id,
            urls = seen.len(),
            "URL inventory complete"
        );
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::test_support::{MemoryContent, context};
    use crate::types::{ContentKind, UrlMapping};

    #[tokio::test]
    async fn each_url_is_reported_once() {
        let content = Arc::new(MemoryContent::with_pages(&[
            ("a", "<a href=\"https://x.edu/1\">see https://x.edu/2</a>"),
            ("b", "<img src=\"https://x.edu/1\"><script src=\"https://cdn.edu/a.js\"></script>"),
            ("c", "<p>no links</p>"),
        ]));
        let config = TaskConfig::new(NAME, "7").with_content_types(vec![ContentKind::Pages]);
        let ctx = context(config, content.clone());

        UrlInventoryTask.execute(&ctx).await.unwrap();

        let urls: Vec<String> = ctx
            .tracker
            .findings()
            .into_iter()
            .filter_map(|f| f.original_value)
            .collect();
        assert_eq!(urls, ["https://x.edu/1", "https://x.edu/2", "https://cdn.edu/a.js"]);
        assert!(content.updates.lock().unwrap().is_empty());

        let stats = ctx.tracker.stats();
        assert_eq!(stats.items_processed, 3);
        assert_eq!(stats.items_found, 2);
    }

    #[test]
    fn mappings_only_warn() {
        let config = TaskConfig::new(NAME, "7")
            .with_mappings(vec![UrlMapping::new("http://a.edu", "https://b.edu")]);
        let result = UrlInventoryTask.validate_config(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }
}
