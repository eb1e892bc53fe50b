use std::fmt;

use http::StatusCode;

/// Errors returned while building a [`Publisher`](crate::Publisher) or
/// [`Receiver`](crate::Receiver) from configuration.
///
/// These fail fast at construction and are never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingToken,
    MissingBaseUrl,
    MissingTopic,
    MissingSigningKey,
    MissingNextSigningKey,

    /// HTTP timeout is below one millisecond.
    TimeoutTooShort,

    /// A backoff bound is below one millisecond.
    BackoffTooShort,

    /// Minimum backoff exceeds maximum backoff.
    BackoffRange,

    /// The environment could not be read or deserialized.
    Source(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingToken =>
                write!(f, "'QSTASH_TOKEN' is required"),
            ConfigError::MissingBaseUrl =>
                write!(f, "qstash url is required"),
            ConfigError::MissingTopic =>
                write!(f, "topic is required"),
            ConfigError::MissingSigningKey =>
                write!(f, "'QSTASH_SIGNING_KEY' is required"),
            ConfigError::MissingNextSigningKey =>
                write!(f, "'QSTASH_NEXT_SIGNING_KEY' is required"),
            ConfigError::TimeoutTooShort =>
                write!(f, "http client timeout must be at least 1 millisecond"),
            ConfigError::BackoffTooShort =>
                write!(f, "http client backoff must be at least 1 millisecond"),
            ConfigError::BackoffRange =>
                write!(f, "http client min backoff must be less than or equal to max backoff"),
            ConfigError::Source(message) =>
                write!(f, "could not load configuration: {}", message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<::config::ConfigError> for ConfigError {
    fn from(err: ::config::ConfigError) -> Self {
        ConfigError::Source(err.to_string())
    }
}

/// Classification of a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Network,
    Other,
}

/// Failure reported by the underlying send capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportErrorKind::Timeout =>
                write!(f, "request timed out: {}", self.message),
            TransportErrorKind::Network =>
                write!(f, "network error: {}", self.message),
            TransportErrorKind::Other =>
                write!(f, "transport error: {}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors returned by [`Publisher::publish`](crate::Publisher::publish).
///
/// Validation variants (`InvalidHeader`, `ConflictingDeduplication`) are
/// raised before any network I/O.
#[derive(Debug)]
pub enum PublishError {
    /// A custom header does not carry the `Upstash-Forward-` prefix.
    InvalidHeader {
        name: String,
    },

    /// A custom id was combined with content based deduplication.
    ConflictingDeduplication,

    /// The identifier generator failed.
    IdGeneration(String),

    /// A header name or value could not be encoded.
    InvalidRequest(String),

    /// Every attempt failed at the transport level.
    Transport(TransportError),

    /// The broker answered outside of 2xx.
    Status {
        status: StatusCode,
        body: String,
    },

    /// The broker's success response was not the expected JSON.
    Decode(serde_json::Error),

    /// The caller-supplied deadline elapsed first.
    DeadlineExceeded,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::InvalidHeader { name } =>
                write!(f, "header '{}' must start with 'Upstash-Forward-'", name),
            PublishError::ConflictingDeduplication =>
                write!(f, "cannot combine content based deduplication with a custom deduplication id"),
            PublishError::IdGeneration(message) =>
                write!(f, "could not generate message id: {}", message),
            PublishError::InvalidRequest(message) =>
                write!(f, "could not create request: {}", message),
            PublishError::Transport(err) =>
                write!(f, "could not complete request: {}", err),
            PublishError::Status { status, body } =>
                write!(f, "bad request status {}: {}", status.as_u16(), body),
            PublishError::Decode(err) =>
                write!(f, "could not decode response: {}", err),
            PublishError::DeadlineExceeded =>
                write!(f, "publish deadline exceeded"),
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PublishError::Transport(err) => Some(err),
            PublishError::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for PublishError {
    fn from(err: TransportError) -> Self {
        PublishError::Transport(err)
    }
}
