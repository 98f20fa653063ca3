use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("missing required configuration field: {field}")]
    MissingField { field: &'static str },
    #[error("invalid configuration for {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
    #[error("configuration error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client")]
    Client {
        #[source]
        source: reqwest::Error,
    },
    #[error("request failed: {source}")]
    Request {
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid TLS material in {path}: {message}")]
    Tls { path: PathBuf, message: String },
    #[error("token request rejected with status {status}: {body}")]
    AuthFailure {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("token request timed out after {elapsed_ms}ms")]
    TokenTimeout { elapsed_ms: u128 },
    #[error("invalid JSON payload: {message}")]
    Json { message: String },
    #[error("invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("precondition violated: {0}")]
    Precondition(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(source: reqwest::Error) -> Self {
        Self::Request { source }
    }
}

impl TransportError {
    /// Whether the failure is a network-level timeout, as opposed to a
    /// rejection or a connection failure.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Request { source } => source.is_timeout(),
            Self::TokenTimeout { .. } => true,
            _ => false,
        }
    }
}

/// Classification of a delivery attempt that did not succeed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    NetworkTimeout,
    AuthExpired,
    RateLimited,
    ServerError(u16),
    Rejected(u16),
    MalformedResponse,
    Transport,
    AuthFailure,
    Disabled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkTimeout => f.write_str("network timeout"),
            Self::AuthExpired => f.write_str("authorization expired"),
            Self::RateLimited => f.write_str("rate limited"),
            Self::ServerError(code) => write!(f, "server error {code}"),
            Self::Rejected(code) => write!(f, "rejected with status {code}"),
            Self::MalformedResponse => f.write_str("malformed response"),
            Self::Transport => f.write_str("transport failure"),
            Self::AuthFailure => f.write_str("authentication failure"),
            Self::Disabled => f.write_str("disabled by configuration"),
        }
    }
}

impl Error {
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Notify(NotifyError::Precondition(_)))
    }
}
