//! Core types for Echocast

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a remote post
///
/// X post ids are snowflakes, so numeric order follows creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(ItemId)
    }
}

impl From<u64> for ItemId {
    fn from(id: u64) -> Self {
        ItemId(id)
    }
}

/// A single post fetched from the watched account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub text: String,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Remote account identifier resolved from a handle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId(pub String);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The account the credentials belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    pub id: AccountId,
    pub username: String,
}

/// Throttling signal from the remote: retry no earlier than `reset_at` (unix seconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSignal {
    pub reset_at: i64,
}

impl RateLimitSignal {
    /// Seconds to wait from `now`, never negative
    pub fn wait_secs(&self, now: i64) -> u64 {
        self.reset_at.saturating_sub(now).max(0) as u64
    }
}

/// Outcome of a publish request as reported by the remote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishResult {
    pub ids: Vec<String>,
    pub errors: Vec<String>,
}

impl PublishResult {
    pub fn published(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
            errors: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}
