//! Poll-fetch-retry engine
//!
//! One call to [`PollEngine::fetch_new_items`] is one fetch cycle: resolve the
//! watched handle, read the newest page of its timeline, and keep only the
//! items the [`DedupTracker`] has not seen. Rate limiting is absorbed here by
//! sleeping until the reset time and retrying; every other failure is
//! reported to the [`Notifier`] and turned into an empty result.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::dedup::DedupTracker;
use crate::error::Result;
use crate::feed::FeedClient;
use crate::notifier::Notifier;
use crate::types::{AccountId, Item, ItemId, RateLimitSignal};

/// Subject of the alert sent when a fetch cycle is abandoned
pub const FETCH_FAILURE_SUBJECT: &str = "Script Error: Tweet Fetching Failed";

/// Items requested per fetch unless configured otherwise
pub const DEFAULT_PAGE_SIZE: usize = 5;

/// Source of wall-clock time and suspension
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current unix time in seconds
    fn now(&self) -> i64;

    async fn sleep(&self, duration: Duration);
}

/// Real time backed by chrono and the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock for tests: sleeping returns immediately, advances `now` and is recorded
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<i64>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn at(now: i64) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::default(),
        }
    }

    /// Every duration passed to `sleep`, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> i64 {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        *self.now.lock().unwrap() += duration.as_secs() as i64;
    }
}

pub struct PollEngine {
    feed: Arc<dyn FeedClient>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    dedup: DedupTracker,
    page_size: usize,
}

impl PollEngine {
    pub fn new(feed: Arc<dyn FeedClient>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            feed,
            notifier,
            clock: Arc::new(SystemClock),
            dedup: DedupTracker::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Start from an existing tracker instead of an empty one
    pub fn with_dedup(mut self, dedup: DedupTracker) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn dedup(&self) -> &DedupTracker {
        &self.dedup
    }

    /// Highest id handled so far
    pub fn watermark(&self) -> Option<ItemId> {
        self.dedup.watermark()
    }

    /// Run one fetch cycle and return the items not seen before, newest first
    ///
    /// Returned items are already marked seen. Non rate-limit failures send
    /// one alert and yield an empty list; the tracker is left untouched.
    pub async fn fetch_new_items(&mut self, handle: &str, watermark: Option<ItemId>) -> Vec<Item> {
        match self.try_fetch(handle, watermark).await {
            Ok(items) => items,
            Err(e) => {
                error!(handle = handle, "Failed to fetch items: {}", e);
                let body = e.to_string();
                if let Err(notify_err) = self.notifier.notify(FETCH_FAILURE_SUBJECT, &body).await {
                    error!("Failed to send alert: {}", notify_err);
                }
                Vec::new()
            }
        }
    }

    async fn try_fetch(&mut self, handle: &str, watermark: Option<ItemId>) -> Result<Vec<Item>> {
        let account = self.resolve(handle).await?;
        debug!(handle = handle, account = %account, "Resolved account");

        let page = self.list_page(&account, watermark).await?;
        if page.is_empty() {
            info!(handle = handle, "No new items to fetch");
            return Ok(Vec::new());
        }
        debug!(count = page.len(), "Fetched items");

        let mut fresh = Vec::with_capacity(page.len());
        for item in page {
            if self.dedup.is_new(item.id) {
                self.dedup.mark_seen(item.id);
                info!(item_id = %item.id, "New item: {}", item.text);
                fresh.push(item);
            }
        }
        Ok(fresh)
    }

    async fn resolve(&self, handle: &str) -> Result<AccountId> {
        loop {
            match self.feed.resolve_account(handle).await {
                Ok(account) => return Ok(account),
                Err(e) => match e.rate_limit() {
                    Some(signal) => self.backoff(signal).await,
                    None => return Err(e),
                },
            }
        }
    }

    /// Retries with the same watermark until the remote stops throttling
    async fn list_page(&self, account: &AccountId, watermark: Option<ItemId>) -> Result<Vec<Item>> {
        loop {
            match self
                .feed
                .list_recent_items(account, self.page_size, watermark)
                .await
            {
                Ok(items) => return Ok(items),
                Err(e) => match e.rate_limit() {
                    Some(signal) => self.backoff(signal).await,
                    None => return Err(e),
                },
            }
        }
    }

    async fn backoff(&self, signal: RateLimitSignal) {
        let wait_secs = signal.wait_secs(self.clock.now());
        warn!(
            wait_secs = wait_secs,
            reset_at = signal.reset_at,
            "Rate limit hit. Retrying after {} seconds",
            wait_secs
        );
        self.clock.sleep(Duration::from_secs(wait_secs)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use crate::feed::mock::MockFeed;
    use crate::notifier::RecordingNotifier;

    fn engine(feed: &MockFeed, notifier: &RecordingNotifier, clock: &ManualClock) -> PollEngine {
        PollEngine::new(Arc::new(feed.clone()), Arc::new(notifier.clone()))
            .with_clock(Arc::new(clock.clone()))
    }

    fn page(ids: &[u64]) -> Vec<Item> {
        ids.iter().map(|id| Item::new(*id, format!("post {}", id))).collect()
    }

    #[tokio::test]
    async fn test_returns_all_new_items_in_remote_order() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .with_timeline(page(&[5, 4, 3]));
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut engine = engine(&feed, &notifier, &clock);

        let items = engine.fetch_new_items("snafudefi", None).await;
        let ids: Vec<u64> = items.iter().map(|i| i.id.0).collect();
        assert_eq!(ids, vec![5, 4, 3]);
        assert_eq!(engine.dedup().len(), 3);
        assert_eq!(engine.watermark(), Some(ItemId(5)));

        // Same raw page again: nothing is new
        let again = engine.fetch_new_items("snafudefi", None).await;
        assert!(again.is_empty());
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_seen_ids_are_never_returned() {
        let mut seen = DedupTracker::new();
        seen.mark_seen(ItemId(4));

        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .with_timeline(page(&[5, 4, 3]));
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut engine = engine(&feed, &notifier, &clock).with_dedup(seen);

        let ids: Vec<u64> = engine
            .fetch_new_items("snafudefi", None)
            .await
            .iter()
            .map(|i| i.id.0)
            .collect();
        assert_eq!(ids, vec![5, 3]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_within_page_returned_once() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .with_timeline(page(&[9, 9, 8]));
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut engine = engine(&feed, &notifier, &clock);

        let items = engine.fetch_new_items("snafudefi", None).await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_passes_watermark_and_page_size() {
        let feed = MockFeed::new().with_account("snafudefi", "42");
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut engine = engine(&feed, &notifier, &clock);

        engine.fetch_new_items("snafudefi", Some(ItemId(77))).await;

        let calls = feed.list_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].limit, DEFAULT_PAGE_SIZE);
        assert_eq!(calls[0].since_id, Some(ItemId(77)));
        assert_eq!(calls[0].account, AccountId("42".to_string()));
    }

    #[tokio::test]
    async fn test_rate_limit_sleeps_until_reset_then_retries() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .push_response(Err(FeedError::RateLimited(RateLimitSignal { reset_at: 1_090 })))
            .with_timeline(page(&[3]));
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(1_000);
        let mut engine = engine(&feed, &notifier, &clock);

        let items = engine.fetch_new_items("snafudefi", Some(ItemId(2))).await;

        assert_eq!(items.len(), 1);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(90)]);

        let calls = feed.list_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].since_id, Some(ItemId(2)));
        assert_eq!(calls[1].since_id, Some(ItemId(2)));
        // Account is resolved once; only the page request is retried
        assert_eq!(feed.resolve_call_count(), 1);
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_reset_in_past_waits_zero() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .push_response(Err(FeedError::RateLimited(RateLimitSignal { reset_at: 500 })));
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(1_000);
        let mut engine = engine(&feed, &notifier, &clock);

        engine.fetch_new_items("snafudefi", None).await;
        assert_eq!(clock.sleeps(), vec![Duration::ZERO]);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_are_unbounded() {
        let mut feed = MockFeed::new().with_account("snafudefi", "42");
        for n in 1..=10 {
            feed = feed.push_response(Err(FeedError::RateLimited(RateLimitSignal {
                reset_at: 1_000 + n * 15,
            })));
        }
        let feed = feed.with_timeline(page(&[1]));
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(1_000);
        let mut engine = engine(&feed, &notifier, &clock);

        let items = engine.fetch_new_items("snafudefi", None).await;
        assert_eq!(items.len(), 1);
        assert_eq!(clock.sleeps().len(), 10);
        assert_eq!(feed.list_calls().len(), 11);
    }

    #[tokio::test]
    async fn test_remote_error_notifies_once_and_returns_empty() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .push_response(Err(FeedError::Remote {
                status: 503,
                message: "over capacity".to_string(),
            }));
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut engine = engine(&feed, &notifier, &clock);

        let items = engine.fetch_new_items("snafudefi", None).await;

        assert!(items.is_empty());
        assert!(engine.dedup().is_empty());
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, FETCH_FAILURE_SUBJECT);
        assert!(sent[0].1.contains("over capacity"));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_handle_notifies() {
        let feed = MockFeed::new();
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut engine = engine(&feed, &notifier, &clock);

        let items = engine.fetch_new_items("ghost", None).await;

        assert!(items.is_empty());
        assert_eq!(notifier.count(), 1);
        assert!(notifier.sent()[0].1.contains("ghost"));
        assert!(feed.list_calls().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_resolution_is_retried() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .push_resolve_error(FeedError::RateLimited(RateLimitSignal { reset_at: 30 }))
            .with_timeline(page(&[1]));
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut engine = engine(&feed, &notifier, &clock);

        let items = engine.fetch_new_items("snafudefi", None).await;

        assert_eq!(items.len(), 1);
        assert_eq!(feed.resolve_call_count(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30)]);
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_failed_notification_is_swallowed() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .push_response(Err(FeedError::Network("reset".to_string())));
        let notifier = RecordingNotifier::failing();
        let clock = ManualClock::at(0);
        let mut engine = engine(&feed, &notifier, &clock);

        assert!(engine.fetch_new_items("snafudefi", None).await.is_empty());
        assert_eq!(notifier.count(), 1);
    }
}
