use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use crate::config::PublisherConfig;
use crate::error::{ConfigError, PublishError};
use crate::id::IdGenerator;
use crate::telemetry::metric_inc;
use crate::transport::{PublishRequest, Transport, TransportResponse};
use crate::types::{format_duration, Message, PublishOptions};

#[cfg(feature = "http")]
use crate::id::RandomIdGenerator;
#[cfg(feature = "http")]
use crate::retry::RetryingTransport;
#[cfg(feature = "http")]
use crate::transport::HttpTransport;

/// Prefix every custom message header must carry.
pub const FORWARD_PREFIX: &str = "upstash-forward-";

pub const DEDUPLICATION_ID_HEADER: HeaderName = HeaderName::from_static("upstash-deduplication-id");
pub const CONTENT_BASED_DEDUPLICATION_HEADER: HeaderName =
    HeaderName::from_static("upstash-content-based-deduplication");
pub const DELAY_HEADER: HeaderName = HeaderName::from_static("upstash-delay");
pub const SCHEDULE_HEADER: HeaderName = HeaderName::from_static("upstash-schedule");
pub const RETRIES_HEADER: HeaderName = HeaderName::from_static("upstash-retries");

#[cfg(feature = "tracing")]
fn log_response(url: &str, response: &TransportResponse) {
    tracing::info!(
        url,
        status = response.status.as_u16(),
        body = %String::from_utf8_lossy(&response.body),
        "broker response"
    );
}

#[cfg(not(feature = "tracing"))]
fn log_response(_url: &str, _response: &TransportResponse) {}

#[derive(Debug, Deserialize)]
struct BrokerResponse {
    #[serde(rename = "messageId")]
    message_id: String,
}

/// Publishes messages to a single topic.
///
/// The transport and id generator are injected; [`Publisher::new`] wires the
/// defaults (a retrying `reqwest` transport and random ids). A publisher is
/// immutable after construction and can be shared across tasks.
#[derive(Clone)]
pub struct Publisher {
    token: String,
    url: String,
    transport: Arc<dyn Transport>,
    ids: Arc<dyn IdGenerator>,
    verbose: bool,
}

impl Publisher {
    /// Build a publisher with the default HTTP transport.
    #[cfg(feature = "http")]
    pub fn new(config: PublisherConfig) -> Result<Self, ConfigError> {
        let policy = config.backoff_policy()?;
        let transport = RetryingTransport::new(HttpTransport::new(config.timeout), policy);
        Self::with_parts(config, transport, RandomIdGenerator::new())
    }

    /// Build a publisher for `topic` from `QSTASH_TOKEN` / `QSTASH_URL`.
    #[cfg(feature = "http")]
    pub fn from_env(topic: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(PublisherConfig::from_env(topic)?)
    }

    /// Build a publisher around caller supplied collaborators.
    ///
    /// Retry settings in `config` are validated but only apply if `transport`
    /// itself retries.
    pub fn with_parts<T, G>(config: PublisherConfig, transport: T, ids: G) -> Result<Self, ConfigError>
    where
        T: Transport + 'static,
        G: IdGenerator + 'static,
    {
        config.validate()?;
        Ok(Self {
            token: config.token,
            url: format!("{}/{}", config.base_url.trim_end_matches('/'), config.topic),
            transport: Arc::new(transport),
            ids: Arc::new(ids),
            verbose: config.verbose,
        })
    }

    /// Topic URL every message is posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Publish one message.
    ///
    /// On success `message.id` is replaced with the id assigned by the
    /// broker. Validation failures are returned before anything is sent.
    pub async fn publish(&self, message: &mut Message, options: PublishOptions) -> Result<(), PublishError> {
        let request = self.build_request(message, &options)?;

        let response = match self.transport.send(&request).await {
            Ok(response) => response,
            Err(err) => {
                metric_inc("qstash.publish.failure");
                #[cfg(feature = "tracing")]
                tracing::warn!(url = %self.url, error = %err, "publish failed");
                return Err(err.into());
            }
        };

        if self.verbose {
            log_response(&self.url, &response);
        }

        if !response.status.is_success() {
            metric_inc("qstash.publish.failure");
            return Err(PublishError::Status {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        let decoded: BrokerResponse =
            serde_json::from_slice(&response.body).map_err(PublishError::Decode)?;
        message.id = decoded.message_id;

        metric_inc("qstash.publish.success");
        #[cfg(feature = "tracing")]
        tracing::debug!(url = %self.url, id = %message.id, "published message");
        Ok(())
    }

    /// Publish with a delivery delay.
    pub async fn publish_with_delay(
        &self,
        message: &mut Message,
        delay: Duration,
        options: PublishOptions,
    ) -> Result<(), PublishError> {
        self.publish(message, options.with_delay(delay)).await
    }

    /// Publish on a cron schedule, see <https://crontab.guru/>.
    pub async fn publish_with_schedule(
        &self,
        message: &mut Message,
        cron: impl Into<String>,
        options: PublishOptions,
    ) -> Result<(), PublishError> {
        self.publish(message, options.with_schedule(cron)).await
    }

    /// Publish, giving up after `deadline`.
    ///
    /// The deadline covers every attempt and backoff sleep; pending work is
    /// cancelled when it elapses.
    pub async fn publish_within(
        &self,
        deadline: Duration,
        message: &mut Message,
        options: PublishOptions,
    ) -> Result<(), PublishError> {
        tokio::time::timeout(deadline, self.publish(message, options))
            .await
            .map_err(|_| PublishError::DeadlineExceeded)?
    }

    fn build_request(&self, message: &Message, options: &PublishOptions) -> Result<PublishRequest, PublishError> {
        for name in message.headers.keys() {
            // HeaderName is always lowercase.
            if !name.as_str().starts_with(FORWARD_PREFIX) {
                return Err(PublishError::InvalidHeader {
                    name: name.as_str().to_string(),
                });
            }
        }
        let mut headers = message.headers.clone();

        let has_id = !message.id.is_empty();
        if has_id && options.content_based_deduplication {
            return Err(PublishError::ConflictingDeduplication);
        } else if options.content_based_deduplication {
            headers.insert(CONTENT_BASED_DEDUPLICATION_HEADER, HeaderValue::from_static("true"));
        } else if has_id {
            headers.insert(DEDUPLICATION_ID_HEADER, header_value(&message.id)?);
        } else {
            let id = self
                .ids
                .generate()
                .map_err(|err| PublishError::IdGeneration(err.to_string()))?;
            headers.insert(DEDUPLICATION_ID_HEADER, header_value(&id)?);
        }

        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", self.token))?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(delay) = options.delay.filter(|d| !d.is_zero()) {
            headers.insert(DELAY_HEADER, header_value(&format_duration(delay))?);
        }
        if let Some(schedule) = options.schedule.as_deref().filter(|s| !s.is_empty()) {
            headers.insert(SCHEDULE_HEADER, header_value(schedule)?);
        }
        if let Some(retries) = options.retries.filter(|r| *r > 0) {
            headers.insert(RETRIES_HEADER, HeaderValue::from(retries));
        }

        Ok(PublishRequest {
            url: self.url.clone(),
            headers,
            body: message.body.clone(),
        })
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("url", &self.url)
            .field("verbose", &self.verbose)
            .finish()
    }
}

fn header_value(value: &str) -> Result<HeaderValue, PublishError> {
    HeaderValue::from_str(value).map_err(|err| PublishError::InvalidRequest(err.to_string()))
}
