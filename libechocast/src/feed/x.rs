//! X (Twitter) API v2 client
//!
//! Reads use the app bearer token. Writes and the credential check are made
//! on behalf of the account and are signed with OAuth 1.0a (HMAC-SHA1).

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha1::Sha1;
use std::time::Duration;

use crate::config::{Secrets, XConfig};
use crate::error::{EchocastError, FeedError, Result};
use crate::feed::FeedClient;
use crate::types::{AccountId, AccountIdentity, Item, ItemId, PublishResult, RateLimitSignal};

type HmacSha1 = Hmac<Sha1>;

/// X refuses `max_results` outside this range on user timelines
const MIN_PAGE: usize = 5;
const MAX_PAGE: usize = 100;

/// User-context credentials for OAuth 1.0a signing
pub struct OAuthCredentials {
    pub consumer_key: SecretString,
    pub consumer_secret: SecretString,
    pub token: SecretString,
    pub token_secret: SecretString,
}

/// Quota information X attaches to every rate-limited endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub remaining: Option<u32>,
    pub reset_at: Option<i64>,
}

impl RateLimitStatus {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            remaining: header_value(headers, "x-rate-limit-remaining"),
            reset_at: header_value(headers, "x-rate-limit-reset"),
        }
    }
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    fn describe(&self) -> String {
        self.detail
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
    #[serde(default)]
    text: String,
}

pub struct XClient {
    http: reqwest::Client,
    api_base: String,
    bearer_token: SecretString,
    oauth: OAuthCredentials,
}

impl XClient {
    pub fn new(
        config: &XConfig,
        bearer_token: SecretString,
        oauth: OAuthCredentials,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .user_agent(concat!("echocast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bearer_token,
            oauth,
        })
    }

    /// Build a client from the credentials loaded at startup
    pub fn from_secrets(config: &XConfig, secrets: Secrets) -> Result<Self> {
        let oauth = OAuthCredentials {
            consumer_key: secrets.api_key,
            consumer_secret: secrets.api_secret,
            token: secrets.access_token,
            token_secret: secrets.access_secret,
        };
        Self::new(config, secrets.bearer_token, oauth)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| FeedError::Network(format!("{} request failed: {}", context, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &headers, &body, context, chrono::Utc::now().timestamp()).into())
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<Envelope<T>> {
        response
            .json::<Envelope<T>>()
            .await
            .map_err(|e| FeedError::Decode(format!("{}: {}", context, e)).into())
    }

    fn signed(&self, method: Method, url: &str) -> Result<reqwest::RequestBuilder> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = chrono::Utc::now().timestamp();
        let header = oauth1_header(method.as_str(), url, &[], &self.oauth, &nonce, timestamp)?;
        Ok(self.http.request(method, url).header(AUTHORIZATION, header))
    }
}

/// Translate a non-success HTTP status into a feed error
fn map_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    context: &str,
    now: i64,
) -> FeedError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let reset_at = header_value(headers, "x-rate-limit-reset").unwrap_or(now);
            FeedError::RateLimited(RateLimitSignal { reset_at })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FeedError::Unauthorized(format!("{} rejected ({}): {}", context, status, snippet(body)))
        }
        StatusCode::NOT_FOUND => FeedError::NotFound(format!("{}: {}", context, snippet(body))),
        _ => FeedError::Remote {
            status: status.as_u16(),
            message: format!("{}: {}", context, snippet(body)),
        },
    }
}

fn snippet(body: &str) -> &str {
    let body = body.trim();
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Build the `Authorization` header value for an OAuth 1.0a request
///
/// `params` are the request's query or form parameters; JSON bodies are not
/// part of the signature.
pub fn oauth1_header(
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    creds: &OAuthCredentials,
    nonce: &str,
    timestamp: i64,
) -> Result<String> {
    let timestamp = timestamp.to_string();
    let oauth_params = [
        ("oauth_consumer_key", creds.consumer_key.expose_secret()),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp.as_str()),
        ("oauth_token", creds.token.expose_secret()),
        ("oauth_version", "1.0"),
    ];

    let mut pairs: Vec<(String, String)> = oauth_params
        .iter()
        .chain(params.iter())
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    pairs.sort();

    let param_string = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        encode(url),
        encode(&param_string)
    );
    let signing_key = format!(
        "{}&{}",
        encode(creds.consumer_secret.expose_secret()),
        encode(creds.token_secret.expose_secret())
    );

    let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes())
        .map_err(|e| EchocastError::InvalidInput(format!("OAuth signing key: {}", e)))?;
    mac.update(base_string.as_bytes());
    let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    let mut header_params: Vec<(&str, String)> = oauth_params
        .iter()
        .map(|(k, v)| (*k, encode(v)))
        .collect();
    header_params.push(("oauth_signature", encode(&signature)));
    header_params.sort();

    let fields = header_params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("OAuth {}", fields))
}

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[async_trait]
impl FeedClient for XClient {
    async fn resolve_account(&self, handle: &str) -> Result<AccountId> {
        let handle = handle.trim_start_matches('@');
        let url = self.url(&format!("/2/users/by/username/{}", encode(handle)));
        tracing::debug!(handle = handle, "Resolving X account");

        let request = self
            .http
            .get(&url)
            .bearer_auth(self.bearer_token.expose_secret());
        let response = self.send(request, "user lookup").await?;
        let envelope: Envelope<UserData> = Self::decode(response, "user lookup").await?;

        match envelope.data {
            Some(user) => Ok(AccountId(user.id)),
            None => {
                let reason = envelope
                    .errors
                    .first()
                    .map(ApiError::describe)
                    .unwrap_or_else(|| "no user data".to_string());
                Err(FeedError::NotFound(format!("@{}: {}", handle, reason)).into())
            }
        }
    }

    async fn list_recent_items(
        &self,
        account: &AccountId,
        limit: usize,
        since_id: Option<ItemId>,
    ) -> Result<Vec<Item>> {
        let url = self.url(&format!("/2/users/{}/tweets", encode(&account.0)));
        let max_results = limit.clamp(MIN_PAGE, MAX_PAGE).to_string();

        let mut query = vec![
            ("max_results", max_results),
            ("tweet.fields", "id,text".to_string()),
        ];
        if let Some(since) = since_id {
            query.push(("since_id", since.to_string()));
        }

        let request = self
            .http
            .get(&url)
            .bearer_auth(self.bearer_token.expose_secret())
            .query(&query);
        let response = self.send(request, "timeline").await?;

        let quota = RateLimitStatus::from_headers(response.headers());
        tracing::debug!(
            remaining = ?quota.remaining,
            reset_at = ?quota.reset_at,
            "Timeline rate limit status"
        );

        let envelope: Envelope<Vec<TweetData>> = Self::decode(response, "timeline").await?;
        let tweets = envelope.data.unwrap_or_default();

        let mut items = Vec::with_capacity(tweets.len());
        for tweet in tweets {
            let id = tweet
                .id
                .parse::<ItemId>()
                .map_err(|e| FeedError::Decode(format!("tweet id {:?}: {}", tweet.id, e)))?;
            items.push(Item { id, text: tweet.text });
        }
        Ok(items)
    }

    async fn publish_item(&self, text: &str) -> Result<PublishResult> {
        let url = self.url("/2/tweets");
        let request = self
            .signed(Method::POST, &url)?
            .json(&serde_json::json!({ "text": text }));

        let response = self.send(request, "create post").await?;
        let envelope: Envelope<TweetData> = Self::decode(response, "create post").await?;

        Ok(PublishResult {
            ids: envelope.data.map(|t| t.id).into_iter().collect(),
            errors: envelope.errors.iter().map(ApiError::describe).collect(),
        })
    }

    async fn verify_credentials(&self) -> Result<AccountIdentity> {
        let url = self.url("/2/users/me");
        let response = self.send(self.signed(Method::GET, &url)?, "credential check").await?;
        let envelope: Envelope<UserData> = Self::decode(response, "credential check").await?;

        let user = envelope.data.ok_or_else(|| {
            FeedError::Unauthorized("no user returned for credentials".to_string())
        })?;
        Ok(AccountIdentity {
            id: AccountId(user.id),
            username: user.username,
        })
    }

    fn name(&self) -> &str {
        "x"
    }
}
