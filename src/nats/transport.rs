//! Stream transport for acknowledged publishing
//!
//! `StreamTransport` is the seam between the streaming connection and the
//! broker. `JetStreamTransport` is the production implementation.

use async_nats::jetstream::{self, context::PublishAckFuture, publish::PublishAck};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::info;

use crate::types::{NatsmqError, Result};

/// Header JetStream uses to identify a message
pub const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// Broker acknowledgement for a published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Stream that stored the message
    pub stream: String,
    /// Sequence number within the stream
    pub sequence: u64,
    /// Whether the broker had already seen this message id
    pub duplicate: bool,
}

impl From<PublishAck> for Ack {
    fn from(ack: PublishAck) -> Self {
        Self {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        }
    }
}

/// Acknowledgement that has not arrived yet
pub type PendingAck = BoxFuture<'static, Result<Ack>>;

/// Publishes messages that the broker acknowledges
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Hand a message to the broker. Resolves once the message is sent; the
    /// returned future resolves with the acknowledgement.
    async fn publish(&self, subject: String, headers: HeaderMap, payload: Bytes)
        -> Result<PendingAck>;

    /// Close the underlying connection
    async fn close(&self) -> Result<()>;
}

/// JetStream-backed transport
pub struct JetStreamTransport {
    client: Client,
    context: jetstream::Context,
}

impl JetStreamTransport {
    /// Create the transport and make sure the cluster's stream exists
    pub async fn new(
        client: Client,
        cluster_id: &str,
        domain: Option<&str>,
        ack_wait: Duration,
    ) -> Result<Self> {
        let mut context = match domain {
            Some(domain) => jetstream::with_domain(client.clone(), domain),
            None => jetstream::new(client.clone()),
        };
        context.set_timeout(ack_wait);

        let transport = Self { client, context };
        transport.ensure_stream(cluster_id).await?;
        Ok(transport)
    }

    /// Stream settings for a cluster: file storage, every channel under it
    pub fn stream_config(cluster_id: &str) -> jetstream::stream::Config {
        jetstream::stream::Config {
            name: cluster_id.to_string(),
            subjects: vec![format!("{}.>", cluster_id)],
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        }
    }

    async fn ensure_stream(&self, cluster_id: &str) -> Result<()> {
        self.context
            .get_or_create_stream(Self::stream_config(cluster_id))
            .await
            .map_err(|e| NatsmqError::Stream(format!("Failed to create stream {cluster_id}: {e}")))?;

        info!("Using stream {} with subjects {}.>", cluster_id, cluster_id);
        Ok(())
    }
}

#[async_trait]
impl StreamTransport for JetStreamTransport {
    async fn publish(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<PendingAck> {
        let pending: PublishAckFuture = self
            .context
            .publish_with_headers(subject, headers, payload)
            .await
            .map_err(|e| NatsmqError::Publish(e.to_string()))?;

        Ok(Box::pin(async move {
            pending
                .await
                .map(Ack::from)
                .map_err(|e| NatsmqError::Ack(e.to_string()))
        }))
    }

    async fn close(&self) -> Result<()> {
        self.client
            .drain()
            .await
            .map_err(|e| NatsmqError::Nats(format!("Drain failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_for_cluster() {
        let config = JetStreamTransport::stream_config("test-cluster");
        assert_eq!(config.name, "test-cluster");
        assert_eq!(config.subjects, vec!["test-cluster.>".to_string()]);
        assert_eq!(config.storage, jetstream::stream::StorageType::File);
    }

    #[test]
    fn test_ack_from_publish_ack() {
        let ack: PublishAck = serde_json::from_str(
            r#"{"stream":"test-cluster","seq":42,"duplicate":true}"#,
        )
        .unwrap();
        let ack = Ack::from(ack);
        assert_eq!(ack.stream, "test-cluster");
        assert_eq!(ack.sequence, 42);
        assert!(ack.duplicate);
    }
}
