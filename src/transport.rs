#[cfg(feature = "http")]
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::error::TransportError;

/// A fully built publish request.
///
/// The URL is kept as a plain string; the broker base URL is joined with the
/// topic verbatim.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Raw broker response as seen by the publisher.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Sends one POST request and returns the broker's answer.
///
/// Non-2xx responses are returned as `Ok`; only failures to obtain a response
/// at all are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &PublishRequest) -> Result<TransportResponse, TransportError>;
}

/// Default transport backed by `reqwest`.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

#[cfg(feature = "http")]
impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &PublishRequest) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(&request.url)
            .headers(request.headers.clone())
            .body(request.body.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(TransportResponse { status, body })
    }
}

#[cfg(feature = "http")]
fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::timeout(err.to_string())
    } else if err.is_builder() {
        TransportError::new(crate::error::TransportErrorKind::Other, err.to_string())
    } else {
        TransportError::network(err.to_string())
    }
}
