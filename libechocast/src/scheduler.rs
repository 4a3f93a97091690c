//! Scheduler loop
//!
//! Alternates between running one cycle and sleeping a fixed interval. A
//! cycle handles its own failures and always yields a [`CycleReport`]; a
//! panic escaping one is logged and the loop carries on after the normal
//! sleep.

use chrono::Timelike;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{BusinessHours, Config};
use crate::engine::{Clock, PollEngine, SystemClock};
use crate::error::{EchocastError, FeedError};
use crate::feed::FeedClient;
use crate::notifier::Notifier;
use crate::publisher::{PublishOutcome, ReplyTemplate, ResponsePublisher};

/// Sleep between cycles unless configured otherwise
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Sleeping,
}

/// Summary of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Authenticated username, when the credential check succeeded
    pub authenticated_as: Option<String>,
    pub new_items: usize,
    pub published: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct Scheduler {
    feed: Arc<dyn FeedClient>,
    engine: PollEngine,
    publisher: ResponsePublisher,
    clock: Arc<dyn Clock>,
    handle: String,
    interval: Duration,
    business_hours: Option<BusinessHours>,
    verify_each_cycle: bool,
    state: LoopState,
}

impl Scheduler {
    pub fn new(
        feed: Arc<dyn FeedClient>,
        notifier: Arc<dyn Notifier>,
        template: ReplyTemplate,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            engine: PollEngine::new(feed.clone(), notifier).with_clock(clock.clone()),
            publisher: ResponsePublisher::new(feed.clone(), template.clone()),
            feed,
            clock,
            handle: template.handle,
            interval: DEFAULT_POLL_INTERVAL,
            business_hours: None,
            verify_each_cycle: true,
            state: LoopState::Sleeping,
        }
    }

    /// Wire a scheduler from loaded configuration
    pub fn from_config(
        config: &Config,
        feed: Arc<dyn FeedClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::new(feed, notifier, ReplyTemplate::from_config(&config.watch))
            .with_interval(Duration::from_secs(config.watch.poll_interval))
            .with_business_hours(config.watch.business_hours)
            .with_page_size(config.watch.page_size)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.engine = self.engine.with_page_size(page_size);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.engine = self.engine.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_business_hours(mut self, hours: Option<BusinessHours>) -> Self {
        self.business_hours = hours;
        self
    }

    /// Skip the per-cycle credential check
    pub fn without_verification(mut self) -> Self {
        self.verify_each_cycle = false;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn engine(&self) -> &PollEngine {
        &self.engine
    }

    fn within_business_hours(&self) -> bool {
        let Some(hours) = self.business_hours else {
            return true;
        };
        match chrono::DateTime::from_timestamp(self.clock.now(), 0) {
            Some(now) => hours.contains(now.hour()),
            None => true,
        }
    }

    /// Run one full fetch-filter-publish pass
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.state = LoopState::Running;
        let mut report = CycleReport::default();

        if self.verify_each_cycle {
            match self.feed.verify_credentials().await {
                Ok(identity) => {
                    debug!(username = %identity.username, "Credentials verified");
                    report.authenticated_as = Some(identity.username);
                }
                Err(e) => {
                    if matches!(e, EchocastError::Feed(FeedError::Unauthorized(_))) {
                        error!("Authentication failed, check your credentials: {}", e);
                    } else {
                        error!("Authentication check failed: {}", e);
                    }
                }
            }
        }

        let watermark = self.engine.watermark();
        let items = self.engine.fetch_new_items(&self.handle, watermark).await;
        report.new_items = items.len();
        if items.is_empty() {
            info!("No new items to process");
            return report;
        }

        let publish_now = self.within_business_hours();
        for item in &items {
            info!(item_id = %item.id, "Processing item");
            let outcome = if publish_now {
                self.publisher.publish(item).await
            } else {
                PublishOutcome::Skipped
            };
            match outcome {
                PublishOutcome::Published(_) => report.published += 1,
                PublishOutcome::Rejected(_) | PublishOutcome::Failed(_) => report.failed += 1,
                PublishOutcome::Skipped => {
                    info!(item_id = %item.id, "Outside business hours, not publishing");
                    report.skipped += 1;
                }
            }
        }

        report
    }

    /// Run one cycle inside the failure boundary
    ///
    /// Returns `None` when the cycle panicked.
    pub async fn run_guarded(&mut self) -> Option<CycleReport> {
        match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(report) => Some(report),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Cycle panicked: {}", message);
                None
            }
        }
    }

    /// Sleep for the poll interval, waking early if `shutdown` is set
    async fn sleep_interval(&mut self, shutdown: &AtomicBool) {
        self.state = LoopState::Sleeping;
        debug!("Waiting {}s for the next iteration", self.interval.as_secs());

        let mut remaining = self.interval;
        while !remaining.is_zero() {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            let step = remaining.min(Duration::from_secs(1));
            self.clock.sleep(step).await;
            remaining -= step;
        }
    }

    /// Cycle and sleep until `shutdown` is set
    pub async fn run(&mut self, shutdown: &AtomicBool) {
        info!(
            handle = %self.handle,
            interval_secs = self.interval.as_secs(),
            "Starting watch loop"
        );
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping watch loop");
                break;
            }

            if let Some(report) = self.run_guarded().await {
                info!(
                    new_items = report.new_items,
                    published = report.published,
                    failed = report.failed,
                    skipped = report.skipped,
                    "Cycle complete"
                );
            } else {
                warn!("Cycle ended early, will retry after the interval");
            }

            self.sleep_interval(shutdown).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ManualClock;
    use crate::error::{FeedError, Result};
    use crate::feed::mock::MockFeed;
    use crate::notifier::RecordingNotifier;
    use crate::types::{AccountId, AccountIdentity, Item, ItemId, PublishResult};
    use async_trait::async_trait;

    fn template() -> ReplyTemplate {
        ReplyTemplate {
            handle: "snafudefi".to_string(),
            mention: "elonmusk".to_string(),
            display_name: "Snafu".to_string(),
        }
    }

    fn scheduler(feed: &MockFeed, notifier: &RecordingNotifier, clock: &ManualClock) -> Scheduler {
        Scheduler::new(Arc::new(feed.clone()), Arc::new(notifier.clone()), template())
            .with_clock(Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_cycle_publishes_new_items_in_order() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .with_timeline(vec![Item::new(8u64, "eight"), Item::new(7u64, "seven")]);
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut scheduler = scheduler(&feed, &notifier, &clock);

        let report = scheduler.run_cycle().await;

        assert_eq!(report.new_items, 2);
        assert_eq!(report.published, 2);
        let published = feed.published();
        assert!(published[0].contains("/status/8"));
        assert!(published[1].contains("/status/7"));
        assert_eq!(scheduler.state(), LoopState::Running);
    }

    #[tokio::test]
    async fn test_cycle_with_every_call_failing_still_reports() {
        let feed = MockFeed::new()
            .unauthorized("revoked")
            .push_resolve_error(FeedError::Remote {
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut scheduler = scheduler(&feed, &notifier, &clock);

        let report = scheduler.run_guarded().await;

        assert_eq!(report, Some(CycleReport::default()));
        assert_eq!(notifier.count(), 1);
        assert!(feed.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_block_next_item() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .with_timeline(vec![Item::new(7u64, "seven"), Item::new(8u64, "eight")])
            .fail_publish_when("/status/7", FeedError::Network("reset".to_string()));
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut scheduler = scheduler(&feed, &notifier, &clock);

        let report = scheduler.run_cycle().await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.published, 1);
        assert!(feed.published()[0].contains("/status/8"));
        assert!(!scheduler.engine().dedup().is_new(ItemId(7)));
    }

    #[tokio::test]
    async fn test_second_cycle_uses_watermark() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .push_response(Ok(vec![Item::new(5u64, "five"), Item::new(3u64, "three")]));
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut scheduler = scheduler(&feed, &notifier, &clock);

        scheduler.run_cycle().await;
        let report = scheduler.run_cycle().await;

        assert_eq!(report.new_items, 0);
        let calls = feed.list_calls();
        assert_eq!(calls[0].since_id, None);
        assert_eq!(calls[1].since_id, Some(ItemId(5)));
    }

    #[tokio::test]
    async fn test_auth_failure_does_not_stop_cycle() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .unauthorized("expired")
            .with_timeline(vec![Item::new(1u64, "one")]);
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut scheduler = scheduler(&feed, &notifier, &clock);

        let report = scheduler.run_cycle().await;

        assert!(report.authenticated_as.is_none());
        assert_eq!(report.published, 1);
        assert_eq!(feed.verify_call_count(), 1);
    }

    #[tokio::test]
    async fn test_without_verification_skips_credential_check() {
        let feed = MockFeed::new().with_account("snafudefi", "42");
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut scheduler = scheduler(&feed, &notifier, &clock).without_verification();

        scheduler.run_cycle().await;
        assert_eq!(feed.verify_call_count(), 0);
    }

    #[tokio::test]
    async fn test_outside_business_hours_items_are_skipped_but_seen() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .with_timeline(vec![Item::new(1u64, "one")]);
        let notifier = RecordingNotifier::new();
        // 1970-01-01T03:00:00Z
        let clock = ManualClock::at(3 * 3600);
        let mut scheduler = scheduler(&feed, &notifier, &clock)
            .with_business_hours(Some(BusinessHours { start: 9, end: 17 }));

        let report = scheduler.run_cycle().await;

        assert_eq!(report.skipped, 1);
        assert!(feed.publish_attempts().is_empty());
        assert!(!scheduler.engine().dedup().is_new(ItemId(1)));
    }

    #[tokio::test]
    async fn test_inside_business_hours_publishes() {
        let feed = MockFeed::new()
            .with_account("snafudefi", "42")
            .with_timeline(vec![Item::new(1u64, "one")]);
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(10 * 3600);
        let mut scheduler = scheduler(&feed, &notifier, &clock)
            .with_business_hours(Some(BusinessHours { start: 9, end: 17 }));

        let report = scheduler.run_cycle().await;
        assert_eq!(report.published, 1);
    }

    #[tokio::test]
    async fn test_run_sleeps_interval_between_cycles_and_stops() {
        let feed = MockFeed::new().with_account("snafudefi", "42");
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut scheduler =
            scheduler(&feed, &notifier, &clock).with_interval(Duration::from_secs(60));
        let shutdown = AtomicBool::new(false);

        scheduler.run_guarded().await;
        scheduler.sleep_interval(&shutdown).await;
        assert_eq!(scheduler.state(), LoopState::Sleeping);
        assert_eq!(clock.total_slept(), Duration::from_secs(60));

        shutdown.store(true, Ordering::Relaxed);
        scheduler.run(&shutdown).await;
        // Already shut down: no further cycle ran
        assert_eq!(feed.list_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let feed = MockFeed::new().with_account("snafudefi", "42");
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut scheduler = scheduler(&feed, &notifier, &clock);
        let shutdown = AtomicBool::new(true);

        scheduler.sleep_interval(&shutdown).await;
        assert!(clock.sleeps().is_empty());
    }

    struct PanickingFeed;

    #[async_trait]
    impl FeedClient for PanickingFeed {
        async fn resolve_account(&self, _handle: &str) -> Result<AccountId> {
            panic!("feed exploded");
        }

        async fn list_recent_items(
            &self,
            _account: &AccountId,
            _limit: usize,
            _since_id: Option<ItemId>,
        ) -> Result<Vec<Item>> {
            Ok(Vec::new())
        }

        async fn publish_item(&self, _text: &str) -> Result<PublishResult> {
            Ok(PublishResult::default())
        }

        async fn verify_credentials(&self) -> Result<AccountIdentity> {
            Err(FeedError::Unauthorized("no".to_string()).into())
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    #[tokio::test]
    async fn test_panic_in_cycle_is_contained() {
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::at(0);
        let mut scheduler = Scheduler::new(Arc::new(PanickingFeed), Arc::new(notifier), template())
            .with_clock(Arc::new(clock));

        assert!(scheduler.run_guarded().await.is_none());
        // The loop is still usable afterwards
        assert!(scheduler.run_guarded().await.is_none());
    }

    #[test]
    fn test_from_config_applies_watch_settings() {
        let mut config = Config::default();
        config.watch.poll_interval = 15;
        config.watch.business_hours = Some(BusinessHours { start: 8, end: 20 });

        let feed = MockFeed::new();
        let scheduler =
            Scheduler::from_config(&config, Arc::new(feed), Arc::new(RecordingNotifier::new()));

        assert_eq!(scheduler.interval, Duration::from_secs(15));
        assert_eq!(scheduler.business_hours, Some(BusinessHours { start: 8, end: 20 }));
        assert_eq!(scheduler.handle, "snafudefi");
    }
}
