//! Streaming connection
//!
//! Persistent, acknowledged publishing against a named cluster. Each cluster
//! is backed by a stream of the same name capturing `<cluster>.>`, and a
//! channel `orders` is published on subject `<cluster>.orders`.
//!
//! Two publish styles are offered:
//! - `publish` / `publish_async` return errors to the caller
//! - `send_message` / `send_async_message` log failures and drop the message

use async_nats::{HeaderMap, HeaderValue};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::{validate_channel, Config, DEFAULT_ACK_WAIT};
use crate::nats::client::{ConnectionFactory, KeepAlive};
use crate::nats::encoded::JsonCodec;
use crate::nats::lifecycle::{ConnectionObserver, LifecycleEvent};
use crate::nats::transport::{Ack, JetStreamTransport, StreamTransport, MSG_ID_HEADER};
use crate::types::{NatsmqError, Result};

/// Keep-alive for streaming connections: ping every 15s, lost after 5 misses
pub const STREAMING_KEEP_ALIVE: KeepAlive = KeepAlive {
    interval: Duration::from_secs(15),
    max_missed: 5,
};

/// Client id presented to the cluster: the base id plus the connect time in
/// unix seconds, so a restarted process does not reuse its previous id
pub fn derive_client_id(base: &str, connected_at: DateTime<Utc>) -> String {
    format!("{}-{}", base, connected_at.timestamp())
}

/// Subject a channel is published on
pub fn channel_subject(cluster_id: &str, channel: &str) -> String {
    format!("{}.{}", cluster_id, channel)
}

/// Logs when the client gives up reconnecting. A deliberate `stop` drains
/// the client instead, so it never reports here.
struct ConnectionLostObserver {
    client_id: String,
    keep_alive: KeepAlive,
    span: Span,
}

impl ConnectionLostObserver {
    fn is_lost(event: &LifecycleEvent) -> bool {
        *event == LifecycleEvent::ReconnectsExhausted
    }
}

impl ConnectionObserver for ConnectionLostObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        if Self::is_lost(event) {
            warn!(
                parent: &self.span,
                client_id = %self.client_id,
                ping_interval_secs = self.keep_alive.interval.as_secs(),
                max_missed_pings = self.keep_alive.max_missed,
                "Connection lost"
            );
        }
    }
}

/// Acknowledgement of an async publish, resolved in the background
#[derive(Debug)]
pub struct AckHandle {
    correlation_id: String,
    handle: JoinHandle<Result<Ack>>,
}

impl AckHandle {
    /// Id carried by the message in its `Nats-Msg-Id` header
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait for the acknowledgement (after the ack handler has run)
    pub async fn wait(self) -> Result<Ack> {
        self.handle
            .await
            .map_err(|e| NatsmqError::Ack(format!("Ack task failed: {e}")))?
    }
}

/// A message ready to hand to the transport
struct Outgoing {
    transport: Arc<dyn StreamTransport>,
    subject: String,
    correlation_id: String,
    headers: HeaderMap,
    payload: Bytes,
}

/// Acknowledged publisher for one cluster
pub struct StreamingConnection {
    client_id: String,
    cluster_id: String,
    ack_wait: Duration,
    /// None before connecting and after `stop`
    transport: RwLock<Option<Arc<dyn StreamTransport>>>,
    span: Span,
}

impl StreamingConnection {
    /// A connection with no transport attached yet
    pub fn new(client_id: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            cluster_id: cluster_id.into(),
            ack_wait: DEFAULT_ACK_WAIT,
            transport: RwLock::new(None),
            span: Span::current(),
        }
    }

    /// Attach the transport messages are published through
    pub fn with_transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.transport = RwLock::new(Some(transport));
        self
    }

    /// Record the ack wait the transport was configured with
    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    /// Set the span log lines are recorded under
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Connect to the broker and the cluster's stream
    pub async fn connect(config: &Config) -> Result<Self> {
        config.validate()?;

        let cluster_id = config.streaming.cluster_id.clone();
        let client_id = derive_client_id(&config.streaming.client_id, Utc::now());
        let ack_wait = config.streaming.ack_wait();
        let span = info_span!(parent: &config.span, "nats-streaming", client_id = %client_id);

        let lost = Arc::new(ConnectionLostObserver {
            client_id: client_id.clone(),
            keep_alive: STREAMING_KEEP_ALIVE,
            span: span.clone(),
        });

        let client = ConnectionFactory::new(config)
            .with_name(client_id.clone())
            .with_keep_alive(STREAMING_KEEP_ALIVE)
            .with_observer(lost)
            .connect()
            .await
            .inspect_err(|e| {
                error!(
                    parent: &span,
                    broker = %config.broker(),
                    err = %e,
                    "Failed to set nats server connection"
                );
            })?;

        let transport = JetStreamTransport::new(
            client,
            &cluster_id,
            config.streaming.js_domain.as_deref(),
            ack_wait,
        )
        .await
        .inspect_err(|e| {
            error!(
                parent: &span,
                client_id = %client_id,
                cluster_id = %cluster_id,
                err = %e,
                "Failed to set stream connection"
            );
        })?;

        info!(
            parent: &span,
            broker = %config.broker(),
            cluster_id = %cluster_id,
            client_id = %client_id,
            ack_wait_ms = ack_wait.as_millis() as u64,
            "Initialized nats-streaming conn"
        );

        Ok(Self::new(client_id, cluster_id)
            .with_transport(Arc::new(transport))
            .with_ack_wait(ack_wait)
            .with_span(span))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn ack_wait(&self) -> Duration {
        self.ack_wait
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.read().await.is_some()
    }

    /// Close the connection. Safe to call more than once; close errors are
    /// logged and not returned so shutdown can always proceed.
    pub async fn stop(&self) {
        let transport = self.transport.write().await.take();
        let Some(transport) = transport else {
            debug!(parent: &self.span, client_id = %self.client_id, "Connection already closed");
            return;
        };

        debug!(parent: &self.span, client_id = %self.client_id, "Closing connection");
        if let Err(e) = transport.close().await {
            error!(
                parent: &self.span,
                client_id = %self.client_id,
                err = %e,
                "Unable to stop nats-streaming server connection"
            );
        }
    }

    /// Log the outcome of an acknowledgement
    pub fn default_ack_handler(&self, correlation_id: &str, outcome: &Result<Ack>) {
        let _enter = self.span.enter();
        log_ack(correlation_id, outcome);
    }

    /// Publish and wait for the acknowledgement
    pub async fn publish<T: Serialize + ?Sized>(&self, channel: &str, data: &T) -> Result<Ack> {
        let out = self.prepare(channel, data).await?;

        let pending = out
            .transport
            .publish(out.subject, out.headers, out.payload)
            .await
            .inspect_err(|e| self.log_publish_error(channel, &out.correlation_id, e))?;

        let ack = pending
            .await
            .inspect_err(|e| self.log_publish_error(channel, &out.correlation_id, e))?;

        info!(
            parent: &self.span,
            chan = %channel,
            correlation_id = %out.correlation_id,
            stream = %ack.stream,
            sequence = ack.sequence,
            async_publish = false,
            "Sent message"
        );
        Ok(ack)
    }

    /// Publish without waiting for the acknowledgement; it is logged by the
    /// default ack handler when it arrives
    pub async fn publish_async<T: Serialize + ?Sized>(
        &self,
        channel: &str,
        data: &T,
    ) -> Result<AckHandle> {
        self.publish_async_with(channel, data, log_ack).await
    }

    /// Publish without waiting; `handler` receives the correlation id and the
    /// acknowledgement outcome on a background task
    pub async fn publish_async_with<T, F>(
        &self,
        channel: &str,
        data: &T,
        handler: F,
    ) -> Result<AckHandle>
    where
        T: Serialize + ?Sized,
        F: FnOnce(&str, &Result<Ack>) + Send + 'static,
    {
        let out = self.prepare(channel, data).await?;

        let pending = out
            .transport
            .publish(out.subject, out.headers, out.payload)
            .await
            .inspect_err(|e| self.log_publish_error(channel, &out.correlation_id, e))?;

        info!(
            parent: &self.span,
            chan = %channel,
            correlation_id = %out.correlation_id,
            async_publish = true,
            "Published"
        );

        let correlation_id = out.correlation_id;
        let task_id = correlation_id.clone();
        let handle = tokio::spawn(
            async move {
                let outcome = pending.await;
                handler(task_id.as_str(), &outcome);
                outcome
            }
            .instrument(self.span.clone()),
        );

        Ok(AckHandle {
            correlation_id,
            handle,
        })
    }

    /// Publish and wait for the ack; failures are logged and the message dropped
    pub async fn send_message<T: Serialize + ?Sized>(&self, channel: &str, data: &T) {
        if let Err(e) = self.publish(channel, data).await {
            self.log_dropped(channel, &e);
        }
    }

    /// Publish in the background; failures are logged and the message dropped
    pub async fn send_async_message<T: Serialize + ?Sized>(&self, channel: &str, data: &T) {
        if let Err(e) = self.publish_async(channel, data).await {
            self.log_dropped(channel, &e);
        }
    }

    /// Like `send_async_message`, with a custom ack handler
    pub async fn send_async_message_with<T, F>(&self, channel: &str, data: &T, handler: F)
    where
        T: Serialize + ?Sized,
        F: FnOnce(&str, &Result<Ack>) + Send + 'static,
    {
        if let Err(e) = self.publish_async_with(channel, data, handler).await {
            self.log_dropped(channel, &e);
        }
    }

    async fn prepare<T: Serialize + ?Sized>(&self, channel: &str, data: &T) -> Result<Outgoing> {
        validate_channel(channel).inspect_err(|e| {
            error!(parent: &self.span, chan = %channel, err = %e, "Invalid channel");
        })?;

        let transport = self
            .transport
            .read()
            .await
            .clone()
            .ok_or(NatsmqError::NotConnected)?;

        let payload = JsonCodec::encode(data).inspect_err(|e| {
            error!(parent: &self.span, chan = %channel, err = %e, "Unable to marshal data");
        })?;

        let correlation_id = Uuid::new_v4().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            MSG_ID_HEADER,
            HeaderValue::from_str(&correlation_id)
                .map_err(|e| NatsmqError::Publish(format!("Invalid header: {}", e)))?,
        );

        Ok(Outgoing {
            transport,
            subject: channel_subject(&self.cluster_id, channel),
            correlation_id,
            headers,
            payload,
        })
    }

    fn log_publish_error(&self, channel: &str, correlation_id: &str, err: &NatsmqError) {
        error!(
            parent: &self.span,
            client_id = %self.client_id,
            chan = %channel,
            correlation_id = %correlation_id,
            err = %err,
            "Error publishing message"
        );
    }

    fn log_dropped(&self, channel: &str, err: &NatsmqError) {
        match err {
            NatsmqError::NotConnected => {
                debug!(parent: &self.span, chan = %channel, "Not connected, message dropped");
            }
            _ => {
                debug!(parent: &self.span, chan = %channel, err = %err, "Message dropped");
            }
        }
    }
}

/// Log an acknowledgement outcome under the current span
fn log_ack(correlation_id: &str, outcome: &Result<Ack>) {
    match outcome {
        Ok(ack) => info!(
            correlation_id = %correlation_id,
            stream = %ack.stream,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "Received ack for message"
        ),
        Err(e) => error!(
            correlation_id = %correlation_id,
            err = %e,
            "Error publishing message"
        ),
    }
}
