//! NATS connection management
//!
//! - `client`: connection factory with reconnect policy
//! - `lifecycle`: connection event observers
//! - `encoded`: JSON-encoded core connection
//! - `transport`: acknowledged stream transport (JetStream)
//! - `streaming`: streaming connection and publish helpers

pub mod client;
pub mod encoded;
pub mod lifecycle;
pub mod streaming;
pub mod transport;

pub use client::{connect, ConnectionFactory, KeepAlive, ReconnectPolicy};
pub use encoded::{EncodedConnection, JsonCodec};
pub use lifecycle::{ConnectionObserver, EventDispatcher, LifecycleEvent, LoggingObserver};
pub use streaming::{AckHandle, StreamingConnection, STREAMING_KEEP_ALIVE};
pub use transport::{Ack, JetStreamTransport, PendingAck, StreamTransport};
