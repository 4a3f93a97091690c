//! Mock feed implementation for testing
//!
//! A scripted [`FeedClient`] that records every call. Timeline reads pop
//! queued responses first and fall back to a fixed timeline once the queue
//! is drained. The mock never filters by `since_id` itself, so tests see
//! exactly what the engine does with a raw page.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::error::{FeedError, Result};
use crate::feed::FeedClient;
use crate::types::{AccountId, AccountIdentity, Item, ItemId, PublishResult};

/// A recorded `list_recent_items` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCall {
    pub account: AccountId,
    pub limit: usize,
    pub since_id: Option<ItemId>,
}

#[derive(Debug, Default)]
struct MockState {
    accounts: HashMap<String, AccountId>,
    resolve_errors: VecDeque<FeedError>,
    queued: VecDeque<std::result::Result<Vec<Item>, FeedError>>,
    timeline: Vec<Item>,
    publish_failures: Vec<(String, FeedError)>,
    publish_rejections: Vec<(String, String)>,
    identity: Option<AccountIdentity>,
    auth_error: Option<String>,
    resolve_calls: usize,
    list_calls: Vec<ListCall>,
    publish_attempts: Vec<String>,
    published: Vec<String>,
    verify_calls: usize,
}

/// Mock feed for testing
///
/// Cloning shares the underlying state, so a test can hand one clone to the
/// engine and inspect calls through another.
#[derive(Debug, Clone, Default)]
pub struct MockFeed {
    state: Arc<Mutex<MockState>>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` resolvable to `id`
    pub fn with_account(self, handle: &str, id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .accounts
            .insert(handle.to_string(), AccountId(id.to_string()));
        self
    }

    /// Fail the next handle resolution with `error`
    pub fn push_resolve_error(self, error: FeedError) -> Self {
        self.state.lock().unwrap().resolve_errors.push_back(error);
        self
    }

    /// Timeline returned whenever no queued response is pending
    pub fn with_timeline(self, items: Vec<Item>) -> Self {
        self.state.lock().unwrap().timeline = items;
        self
    }

    /// Queue a one-shot timeline response
    pub fn push_response(self, response: std::result::Result<Vec<Item>, FeedError>) -> Self {
        self.state.lock().unwrap().queued.push_back(response);
        self
    }

    /// Fail any publish whose text contains `needle`
    pub fn fail_publish_when(self, needle: &str, error: FeedError) -> Self {
        self.state
            .lock()
            .unwrap()
            .publish_failures
            .push((needle.to_string(), error));
        self
    }

    /// Answer any publish whose text contains `needle` with a rejection
    pub fn reject_publish_when(self, needle: &str, reason: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .publish_rejections
            .push((needle.to_string(), reason.to_string()));
        self
    }

    pub fn with_identity(self, id: &str, username: &str) -> Self {
        self.state.lock().unwrap().identity = Some(AccountIdentity {
            id: AccountId(id.to_string()),
            username: username.to_string(),
        });
        self
    }

    /// Reject credential checks with `FeedError::Unauthorized`
    pub fn unauthorized(self, message: &str) -> Self {
        self.state.lock().unwrap().auth_error = Some(message.to_string());
        self
    }

    pub fn resolve_call_count(&self) -> usize {
        self.state.lock().unwrap().resolve_calls
    }

    pub fn list_calls(&self) -> Vec<ListCall> {
        self.state.lock().unwrap().list_calls.clone()
    }

    /// Every text passed to `publish_item`, including failed ones
    pub fn publish_attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().publish_attempts.clone()
    }

    /// Texts that were published successfully
    pub fn published(&self) -> Vec<String> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn verify_call_count(&self) -> usize {
        self.state.lock().unwrap().verify_calls
    }
}

#[async_trait]
impl FeedClient for MockFeed {
    async fn resolve_account(&self, handle: &str) -> Result<AccountId> {
        let mut state = self.state.lock().unwrap();
        state.resolve_calls += 1;

        if let Some(error) = state.resolve_errors.pop_front() {
            return Err(error.into());
        }

        state
            .accounts
            .get(handle)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(handle.to_string()).into())
    }

    async fn list_recent_items(
        &self,
        account: &AccountId,
        limit: usize,
        since_id: Option<ItemId>,
    ) -> Result<Vec<Item>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls.push(ListCall {
            account: account.clone(),
            limit,
            since_id,
        });

        match state.queued.pop_front() {
            Some(Ok(items)) => Ok(items),
            Some(Err(error)) => Err(error.into()),
            None => Ok(state.timeline.clone()),
        }
    }

    async fn publish_item(&self, text: &str) -> Result<PublishResult> {
        let mut state = self.state.lock().unwrap();
        state.publish_attempts.push(text.to_string());

        if let Some((_, error)) = state
            .publish_failures
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
        {
            return Err(error.clone().into());
        }

        if let Some((_, reason)) = state
            .publish_rejections
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
        {
            return Ok(PublishResult {
                ids: Vec::new(),
                errors: vec![reason.clone()],
            });
        }

        state.published.push(text.to_string());
        Ok(PublishResult::published(format!(
            "mock-{}",
            uuid::Uuid::new_v4()
        )))
    }

    async fn verify_credentials(&self) -> Result<AccountIdentity> {
        let mut state = self.state.lock().unwrap();
        state.verify_calls += 1;

        if let Some(message) = &state.auth_error {
            return Err(FeedError::Unauthorized(message.clone()).into());
        }

        Ok(state.identity.clone().unwrap_or_else(|| AccountIdentity {
            id: AccountId("0".to_string()),
            username: "mock".to_string(),
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
