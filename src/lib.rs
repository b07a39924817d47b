//! natsmq - connection management for NATS and JetStream
//!
//! Builds NATS connections with a fixed reconnect policy and lifecycle
//! logging, and layers JSON publish helpers on top.
//!
//! ## Components
//!
//! - **Connection factory**: core connections with reconnect/backoff and
//!   lifecycle callbacks
//! - **Encoded connection**: JSON publish, request and subscribe on the core
//!   connection
//! - **Streaming connection**: acknowledged publishing to a cluster's stream,
//!   with synchronous and asynchronous send helpers

pub mod config;
pub mod logging;
pub mod nats;
pub mod types;

pub use config::{Args, Config, NatsArgs, StreamingArgs};
pub use nats::{Ack, EncodedConnection, StreamingConnection};
pub use types::{NatsmqError, Result};
