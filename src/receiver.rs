use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use http::{HeaderMap, Request, Response, StatusCode};

use crate::config::ReceiverConfig;
use crate::error::ConfigError;
use crate::signing::{VerificationError, Verifier};
use crate::telemetry::{metric_inc, trace_event};
use crate::types::Message;

pub const SIGNATURE_HEADER: &str = "upstash-signature";
pub const MESSAGE_ID_HEADER: &str = "upstash-message-id";
pub const RETRIED_HEADER: &str = "upstash-retried";

/// What the application decided about a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Processed; the broker stops delivering it.
    Ack,

    /// Not processed; the broker retries delivery.
    Nack,
}

/// Application callback for verified messages.
///
/// Runs on the request's task; long work here holds the request open.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Acknowledgement;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Acknowledgement> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Acknowledgement {
        (self)(message).await
    }
}

/// Terminal state of one inbound delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Handler acknowledged. Answered with 200.
    Acknowledged,

    /// Handler returned `Nack` or panicked. Answered with 422 so the broker
    /// retries.
    Unacknowledged,

    /// Signature failed against every key. Answered with 401; the handler was
    /// never called.
    Rejected(VerificationError),
}

impl ReceiveOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            ReceiveOutcome::Acknowledged => StatusCode::OK,
            ReceiveOutcome::Unacknowledged => StatusCode::UNPROCESSABLE_ENTITY,
            ReceiveOutcome::Rejected(_) => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn into_response(self) -> Response<String> {
        let status = self.status();
        let body = match self {
            ReceiveOutcome::Acknowledged => String::new(),
            ReceiveOutcome::Unacknowledged =>
                "message was not acknowledged by the receiver".to_string(),
            ReceiveOutcome::Rejected(err) => err.to_string(),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        response
    }
}

/// Verifies inbound webhook deliveries and hands them to a [`MessageHandler`].
///
/// Holds only the read-only signing keys, so one instance can serve
/// concurrent requests.
#[derive(Debug, Clone)]
pub struct Receiver {
    verifier: Verifier,
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            verifier: Verifier::new(&config),
        })
    }

    /// Build a receiver from `QSTASH_SIGNING_KEY` / `QSTASH_NEXT_SIGNING_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(ReceiverConfig::from_env()?)
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Verify one delivery, run the handler and report the outcome.
    ///
    /// Exactly one outcome is produced per call; nothing is written until the
    /// handler has returned.
    pub async fn receive<H>(&self, headers: &HeaderMap, body: Bytes, handler: &H) -> ReceiveOutcome
    where
        H: MessageHandler + ?Sized,
    {
        let token = header_str(headers, SIGNATURE_HEADER).unwrap_or_default();
        if let Err(err) = self.verifier.verify(&body, token) {
            metric_inc("qstash.receive.rejected");
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %err, "rejected message with invalid signature");
            return ReceiveOutcome::Rejected(err);
        }

        let message = Message {
            id: header_str(headers, MESSAGE_ID_HEADER).unwrap_or_default().to_string(),
            headers: headers.clone(),
            body,
            retried: header_str(headers, RETRIED_HEADER)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(id = %message.id, retried = message.retried, "dispatching message");

        match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
            Ok(Acknowledgement::Ack) => {
                metric_inc("qstash.receive.acknowledged");
                ReceiveOutcome::Acknowledged
            }
            Ok(Acknowledgement::Nack) => {
                metric_inc("qstash.receive.unacknowledged");
                trace_event("qstash.receive.unacknowledged");
                ReceiveOutcome::Unacknowledged
            }
            Err(_) => {
                metric_inc("qstash.receive.handler_panicked");
                trace_event("qstash.receive.handler_panicked");
                ReceiveOutcome::Unacknowledged
            }
        }
    }

    /// [`receive`](Self::receive) for a whole `http::Request`, returning the
    /// response to send back to the broker.
    pub async fn handle_request<H>(&self, request: Request<Bytes>, handler: &H) -> Response<String>
    where
        H: MessageHandler + ?Sized,
    {
        let (parts, body) = request.into_parts();
        self.receive(&parts.headers, body, handler)
            .await
            .into_response()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
