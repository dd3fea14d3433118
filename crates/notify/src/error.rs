//! Error types for the notification engine.

use std::fmt;

use thiserror::Error;

use crate::model::Flow;

/// Errors returned by the activity, pull request and identity providers.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Network, auth or decoding failure
    #[error("request failed: {0}")]
    Request(String),

    /// The call did not complete within the configured timeout
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}

/// Errors returned by a message sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The chat API answered with an error payload
    #[error("{method} failed: {error}")]
    Api { method: &'static str, error: String },

    /// The chat API answered `ok` but omitted a field we need
    #[error("{method} response is missing `{field}`")]
    MissingField {
        method: &'static str,
        field: &'static str,
    },

    /// Rate limited by the chat service
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Sink is not configured
    #[error("sink not configured: {0}")]
    NotConfigured(String),

    /// The call did not complete within the configured timeout
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors reading or writing stored message references.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors loading or validating the bot configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure of a single rule iteration.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("{provider} provider failed for activity {activity}: {source}")]
    Provider {
        provider: &'static str,
        activity: String,
        #[source]
        source: ProviderError,
    },

    #[error("sending to {destination} failed: {source}")]
    Sink {
        destination: String,
        #[source]
        source: SinkError,
    },

    #[error("message reference store failed for {destination}: {source}")]
    Store {
        destination: String,
        #[source]
        source: StoreError,
    },
}

/// A rule that failed while the others kept running.
#[derive(Debug)]
pub struct RuleFailure {
    pub flow: Flow,
    /// Position of the rule in its configured list
    pub rule: usize,
    pub error: RuleError,
}

impl fmt::Display for RuleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rule {}: {}", self.flow, self.rule, self.error)
    }
}

/// Errors surfaced by [`crate::Notifier`] entry points.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The activity itself is malformed; nothing was sent
    #[error("configuration error: {0}")]
    Configuration(String),

    /// One or more rules failed; every other rule still ran
    #[error("{} notification rule(s) failed: {}", .0.len(), join_failures(.0))]
    RulesFailed(Vec<RuleFailure>),
}

fn join_failures(failures: &[RuleFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
