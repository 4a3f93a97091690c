//! Reply composition and publishing
//!
//! Publishing is at-most-once: a failed publish is logged, never retried, and
//! the item stays marked as seen.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::WatchConfig;
use crate::feed::FeedClient;
use crate::types::{Item, ItemId};

/// Fixed reply layout for the watched account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTemplate {
    pub handle: String,
    pub mention: String,
    pub display_name: String,
}

impl ReplyTemplate {
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            handle: config.handle.clone(),
            mention: config.mention.clone(),
            display_name: config.display_name.clone(),
        }
    }

    pub fn permalink(&self, id: ItemId) -> String {
        format!("https://x.com/{}/status/{}", self.handle, id)
    }

    pub fn compose(&self, item: &Item) -> String {
        format!(
            "🚀 Attention @{mention} 🚀\n\n\
             {name} (@{handle}) is actively sharing updates:\n\n\
             {text}\n\n\
             Check it out here: {link}",
            mention = self.mention,
            name = self.display_name,
            handle = self.handle,
            text = item.text,
            link = self.permalink(item.id),
        )
    }
}

/// What happened to a single publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The remote accepted the post
    Published(Vec<String>),
    /// The remote answered but reported errors
    Rejected(Vec<String>),
    /// The request itself failed
    Failed(String),
    /// Not attempted (outside business hours)
    Skipped,
}

pub struct ResponsePublisher {
    feed: Arc<dyn FeedClient>,
    template: ReplyTemplate,
}

impl ResponsePublisher {
    pub fn new(feed: Arc<dyn FeedClient>, template: ReplyTemplate) -> Self {
        Self { feed, template }
    }

    /// Compose and publish the reply for `item`; errors are logged, not returned
    pub async fn publish(&self, item: &Item) -> PublishOutcome {
        let content = self.template.compose(item);
        info!(item_id = %item.id, "Publishing reply");

        match self.feed.publish_item(&content).await {
            Ok(result) if result.is_success() => {
                info!(item_id = %item.id, ids = ?result.ids, "Reply published");
                PublishOutcome::Published(result.ids)
            }
            Ok(result) => {
                warn!(
                    item_id = %item.id,
                    errors = ?result.errors,
                    "Reply rejected by {}",
                    self.feed.name()
                );
                PublishOutcome::Rejected(result.errors)
            }
            Err(e) => {
                error!(item_id = %item.id, "Failed to publish reply: {}", e);
                PublishOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use crate::feed::mock::MockFeed;

    fn template() -> ReplyTemplate {
        ReplyTemplate {
            handle: "snafudefi".to_string(),
            mention: "elonmusk".to_string(),
            display_name: "Snafu".to_string(),
        }
    }

    #[test]
    fn test_compose_embeds_everything() {
        let message = template().compose(&Item::new(101u64, "hello"));

        assert!(message.starts_with("🚀 Attention @elonmusk 🚀"));
        assert!(message.contains("Snafu (@snafudefi) is actively sharing updates:"));
        assert!(message.contains("\n\nhello\n\n"));
        assert!(message.ends_with("Check it out here: https://x.com/snafudefi/status/101"));
    }

    #[test]
    fn test_from_config() {
        let template = ReplyTemplate::from_config(&WatchConfig::default());
        assert_eq!(template, self::template());
    }

    #[tokio::test]
    async fn test_publish_success() {
        let feed = MockFeed::new();
        let publisher = ResponsePublisher::new(Arc::new(feed.clone()), template());

        let outcome = publisher.publish(&Item::new(1u64, "first")).await;
        assert!(matches!(outcome, PublishOutcome::Published(_)));
        assert_eq!(feed.published().len(), 1);
        assert!(feed.published()[0].contains("first"));
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported_not_raised() {
        let feed = MockFeed::new()
            .fail_publish_when("/status/7", FeedError::Network("reset".to_string()));
        let publisher = ResponsePublisher::new(Arc::new(feed.clone()), template());

        let outcome = publisher.publish(&Item::new(7u64, "seven")).await;
        assert!(matches!(outcome, PublishOutcome::Failed(ref msg) if msg.contains("reset")));
        assert_eq!(feed.publish_attempts().len(), 1);
        assert!(feed.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_rejection() {
        let feed = MockFeed::new().reject_publish_when("dup", "duplicate content");
        let publisher = ResponsePublisher::new(Arc::new(feed), template());

        let outcome = publisher.publish(&Item::new(2u64, "dup")).await;
        assert_eq!(outcome, PublishOutcome::Rejected(vec!["duplicate content".to_string()]));
    }
}
