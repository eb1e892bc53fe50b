use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::retry::BackoffPolicy;

/// Default broker publish endpoint.
pub const DEFAULT_BASE_URL: &str = "https://qstash.upstash.io/v2/publish";

/// Values picked up from `QSTASH_*` environment variables.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvSettings {
    token: Option<String>,
    url: Option<String>,
    signing_key: Option<String>,
    next_signing_key: Option<String>,
}

fn load_env() -> Result<EnvSettings, ConfigError> {
    let source = ::config::Config::builder()
        .add_source(::config::Environment::with_prefix("QSTASH"))
        .build()?;
    Ok(source.try_deserialize()?)
}

/// Publisher configuration.
///
/// Defaults:
/// - base_url: `https://qstash.upstash.io/v2/publish`
/// - timeout: 1 second
/// - min_backoff: 200 milliseconds
/// - max_backoff: 1 second
/// - retries: 5
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Bearer token sent with every publish.
    pub token: String,

    /// Broker publish endpoint; the topic is appended as a path segment.
    pub base_url: String,

    pub topic: String,

    /// Timeout of a single HTTP attempt.
    pub timeout: Duration,

    pub min_backoff: Duration,
    pub max_backoff: Duration,

    /// Retries after the first attempt.
    pub retries: u32,

    /// Log every broker response.
    pub verbose: bool,
}

impl PublisherConfig {
    /// Create a configuration with an explicit token.
    pub fn new(token: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            topic: topic.into(),
            ..Default::default()
        }
    }

    /// Create a configuration from `QSTASH_TOKEN` and `QSTASH_URL`.
    ///
    /// Unset variables keep their defaults; `with_*` calls made afterwards
    /// take precedence.
    pub fn from_env(topic: impl Into<String>) -> Result<Self, ConfigError> {
        let env = load_env()?;
        let mut config = Self {
            topic: topic.into(),
            ..Default::default()
        };
        if let Some(token) = env.token {
            config.token = token;
        }
        if let Some(url) = env.url {
            config.base_url = url;
        }
        Ok(config)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_min_backoff(mut self, min_backoff: Duration) -> Self {
        self.min_backoff = min_backoff;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.base_url.is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        if self.topic.is_empty() {
            return Err(ConfigError::MissingTopic);
        }
        if self.timeout < Duration::from_millis(1) {
            return Err(ConfigError::TimeoutTooShort);
        }
        self.backoff_policy().map(|_| ())
    }

    pub fn backoff_policy(&self) -> Result<BackoffPolicy, ConfigError> {
        BackoffPolicy::new(self.min_backoff, self.max_backoff, self.retries)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        let backoff = BackoffPolicy::default();
        Self {
            token: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            topic: String::new(),
            timeout: Duration::from_secs(1),
            min_backoff: backoff.min(),
            max_backoff: backoff.max(),
            retries: backoff.retries(),
            verbose: false,
        }
    }
}

/// Receiver configuration: the current and next signing keys.
#[derive(Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    pub signing_key: String,
    pub next_signing_key: String,

    /// Allowed clock skew for `exp` and `nbf`; zero by default.
    pub clock_tolerance: Duration,
}

impl ReceiverConfig {
    pub fn new(signing_key: impl Into<String>, next_signing_key: impl Into<String>) -> Self {
        Self {
            signing_key: signing_key.into(),
            next_signing_key: next_signing_key.into(),
            clock_tolerance: Duration::ZERO,
        }
    }

    /// Create a configuration from `QSTASH_SIGNING_KEY` and
    /// `QSTASH_NEXT_SIGNING_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env = load_env()?;
        Ok(Self::new(
            env.signing_key.unwrap_or_default(),
            env.next_signing_key.unwrap_or_default(),
        ))
    }

    pub fn with_signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = key.into();
        self
    }

    pub fn with_next_signing_key(mut self, key: impl Into<String>) -> Self {
        self.next_signing_key = key.into();
        self
    }

    pub fn with_clock_tolerance(mut self, tolerance: Duration) -> Self {
        self.clock_tolerance = tolerance;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_key.is_empty() {
            return Err(ConfigError::MissingSigningKey);
        }
        if self.next_signing_key.is_empty() {
            return Err(ConfigError::MissingNextSigningKey);
        }
        Ok(())
    }
}

// Keys stay out of debug output.
impl std::fmt::Debug for ReceiverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverConfig")
            .field("signing_key", &"<redacted>")
            .field("next_signing_key", &"<redacted>")
            .field("clock_tolerance", &self.clock_tolerance)
            .finish()
    }
}
