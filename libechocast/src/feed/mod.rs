//! Remote feed abstraction and implementations
//!
//! The poll engine and publisher only talk to the remote through
//! [`FeedClient`], so the X implementation can be swapped for the scripted
//! [`mock::MockFeed`] in tests.
//!
//! # Examples
//!
//! ```no_run
//! use libechocast::feed::{FeedClient, mock::MockFeed};
//! use libechocast::types::Item;
//!
//! # async fn example() -> libechocast::error::Result<()> {
//! let feed = MockFeed::new()
//!     .with_account("snafudefi", "42")
//!     .with_timeline(vec![Item::new(101u64, "hello")]);
//!
//! let account = feed.resolve_account("snafudefi").await?;
//! let items = feed.list_recent_items(&account, 5, None).await?;
//! assert_eq!(items.len(), 1);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AccountId, AccountIdentity, Item, ItemId, PublishResult};

pub mod x;

// Mock feed is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Read and write access to a social feed
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Resolve a public handle (without the leading `@`) to an account id
    ///
    /// # Errors
    ///
    /// Returns `FeedError::NotFound` if the handle does not exist.
    async fn resolve_account(&self, handle: &str) -> Result<AccountId>;

    /// List up to `limit` of the account's most recent items, newest first
    ///
    /// When `since_id` is set only items strictly newer than it are requested.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::RateLimited` when throttled, or a remote/network
    /// error otherwise.
    async fn list_recent_items(
        &self,
        account: &AccountId,
        limit: usize,
        since_id: Option<ItemId>,
    ) -> Result<Vec<Item>>;

    /// Publish a new post as the authenticated account
    async fn publish_item(&self, text: &str) -> Result<PublishResult>;

    /// Check the credentials and return the account they belong to
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Unauthorized` if the credentials are rejected.
    async fn verify_credentials(&self) -> Result<AccountIdentity>;

    /// Lowercase identifier of the backing service (e.g. "x", "mock")
    fn name(&self) -> &str;
}
