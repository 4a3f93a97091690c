//! Error types for Echocast

use thiserror::Error;

use crate::types::RateLimitSignal;

pub type Result<T> = std::result::Result<T, EchocastError>;

#[derive(Error, Debug)]
pub enum EchocastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl EchocastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            EchocastError::InvalidInput(_) => 3,
            EchocastError::Config(_) => 2,
            EchocastError::Feed(FeedError::Unauthorized(_)) => 2,
            EchocastError::Feed(_) => 1,
            EchocastError::Notify(_) => 1,
        }
    }

    /// The rate-limit signal carried by this error, if any
    pub fn rate_limit(&self) -> Option<RateLimitSignal> {
        match self {
            EchocastError::Feed(FeedError::RateLimited(signal)) => Some(*signal),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

#[derive(Error, Debug, Clone)]
pub enum FeedError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Rate limited until {}", .0.reset_at)]
    RateLimited(RateLimitSignal),

    #[error("Remote error (status {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid email address: {0}")]
    Address(String),

    #[error("Failed to build message: {0}")]
    Message(String),

    #[error("SMTP transport failed: {0}")]
    Transport(String),
}
