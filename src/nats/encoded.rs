//! JSON-encoded connection
//!
//! Wraps a core connection so callers publish, request and subscribe with
//! typed values instead of raw bytes.

use async_nats::Client;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::nats::client::connect;
use crate::types::{NatsmqError, Result};

/// Default request timeout for request/reply calls
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The JSON codec used on the wire
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
        Ok(serde_json::to_vec(value)?.into())
    }

    pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Core connection with JSON encoding
#[derive(Clone)]
pub struct EncodedConnection {
    client: Client,
    request_timeout: Duration,
}

impl EncodedConnection {
    /// Wrap an existing connection
    pub fn new(client: Client) -> Self {
        Self {
            client,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Connect through the factory and wrap the result
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = connect(config).await?;
        info!(
            parent: &config.span,
            broker = %config.broker(),
            "Successfully created encoded connection"
        );
        Ok(Self::new(client))
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Get the underlying NATS client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Publish a value as JSON
    pub async fn publish<T: Serialize + ?Sized>(&self, subject: &str, value: &T) -> Result<()> {
        let payload = JsonCodec::encode(value)?;
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| NatsmqError::Publish(e.to_string()))
    }

    /// Send a JSON request and decode the JSON reply
    pub async fn request<T, R>(&self, subject: &str, value: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = JsonCodec::encode(value)?;
        let message = tokio::time::timeout(
            self.request_timeout,
            self.client.request(subject.to_string(), payload),
        )
        .await
        .map_err(|_| NatsmqError::Request(format!("Request to {} timed out", subject)))?
        .map_err(|e| NatsmqError::Request(e.to_string()))?;

        JsonCodec::decode(&message.payload)
    }

    /// Subscribe and decode each message. Messages that fail to decode are
    /// yielded as errors; the subscription keeps going.
    pub async fn subscribe<T>(&self, subject: &str) -> Result<impl Stream<Item = Result<T>>>
    where
        T: DeserializeOwned,
    {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| NatsmqError::Nats(format!("Subscribe failed: {}", e)))?;

        Ok(subscriber.map(|message| JsonCodec::decode::<T>(&message.payload)))
    }

    /// Flush pending messages
    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| NatsmqError::Nats(format!("Flush failed: {}", e)))
    }
}
