//! Client for a hosted HTTP message queue.
//!
//! This crate covers both ends of a single topic:
//!
//! - [`Publisher`] posts messages to the broker over HTTP, choosing a
//!   deduplication id for every publish and retrying failed attempts with
//!   exponential backoff.
//! - [`Receiver`] verifies webhook deliveries (a JWT signed with the current
//!   or next signing key and bound to the body's SHA-256) before handing them
//!   to application code, and turns the handler's [`Acknowledgement`] into the
//!   HTTP status the broker expects.
//!
//! ## Non-Guarantees
//! - Queuing, fan-out and delivery scheduling are the broker's job
//! - No server or router is started; hosts pass requests to the receiver
//!
//! ## Features
//! - `http` (default): `reqwest` transport and [`Publisher::new`]
//! - `tracing` (default): structured logs
//! - `metrics`: counters for publishes and deliveries

mod config;
mod error;
mod id;
mod publisher;
mod receiver;
mod retry;
mod signing;
mod telemetry;
mod transport;
mod types;

pub use config::{PublisherConfig, ReceiverConfig, DEFAULT_BASE_URL};
pub use error::{ConfigError, PublishError, TransportError, TransportErrorKind};
pub use id::{IdError, IdGenerator, RandomIdGenerator};
pub use publisher::{
    Publisher,
    CONTENT_BASED_DEDUPLICATION_HEADER,
    DEDUPLICATION_ID_HEADER,
    DELAY_HEADER,
    FORWARD_PREFIX,
    RETRIES_HEADER,
    SCHEDULE_HEADER,
};
pub use receiver::{
    Acknowledgement,
    MessageHandler,
    ReceiveOutcome,
    Receiver,
    MESSAGE_ID_HEADER,
    RETRIED_HEADER,
    SIGNATURE_HEADER,
};
pub use retry::{BackoffPolicy, RetryingTransport};
pub use signing::{body_hash, sign, VerificationError, Verifier, ISSUER};
pub use transport::{PublishRequest, Transport, TransportResponse};
pub use types::{Message, PublishOptions};

#[cfg(feature = "http")]
pub use transport::HttpTransport;
