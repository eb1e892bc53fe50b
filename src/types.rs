use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;

/// A message published to, or received from, a topic.
///
/// On the publish path `id` is either a caller supplied deduplication id or
/// empty; a successful publish overwrites it with the id the broker assigned.
/// On the receive path it is the `Upstash-Message-Id` of the delivery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Message identifier.
    pub id: String,

    /// Headers forwarded to (or received from) the consumer.
    ///
    /// When publishing, every key must start with `Upstash-Forward-`.
    pub headers: HeaderMap,

    /// Opaque payload.
    pub body: Bytes,

    /// How many times the broker has already retried this delivery.
    pub retried: u32,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Use a custom deduplication id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Per-publish options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Delay before the broker delivers the message.
    pub delay: Option<Duration>,

    /// Cron expression for recurring delivery.
    pub schedule: Option<String>,

    /// Override for the broker's delivery retry count.
    pub retries: Option<u32>,

    /// Let the broker derive the deduplication id from the content.
    pub content_based_deduplication: bool,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Deliver on a cron schedule, see <https://crontab.guru/>.
    pub fn with_schedule(mut self, cron: impl Into<String>) -> Self {
        self.schedule = Some(cron.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Replaces the generated unique id with a content derived one.
    ///
    /// Identical payloads published within the broker's deduplication window
    /// are then dropped.
    pub fn with_content_based_deduplication(mut self) -> Self {
        self.content_based_deduplication = true;
        self
    }
}

/// Format a duration the way the broker's `Upstash-Delay` header expects,
/// e.g. `1s`, `1m30s`, `1h0m0s`, `1.5s`, `250ms`.
pub(crate) fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    if duration < Duration::from_secs(1) {
        let nanos = duration.as_nanos();
        if nanos < 1_000 {
            return format!("{}ns", nanos);
        }
        if nanos < 1_000_000 {
            return format!("{}us", trim_fraction(nanos, 1_000));
        }
        return format!("{}ms", trim_fraction(nanos, 1_000_000));
    }

    let total_secs = duration.as_secs();
    let hours = total_secs / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = trim_fraction(
        u128::from(total_secs % 60) * 1_000_000_000 + u128::from(duration.subsec_nanos()),
        1_000_000_000,
    );

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// `value / unit` rendered with the shortest exact decimal fraction.
fn trim_fraction(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let fraction = value % unit;
    if fraction == 0 {
        return whole.to_string();
    }

    let width = unit.to_string().len() - 1;
    let digits = format!("{:0width$}", fraction, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}
