//! Configuration for natsmq
//!
//! CLI arguments and environment variable handling using clap.
//! The core connection and the streaming layer each get their own
//! argument group so they can be flattened into any binary.

use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::Span;

use crate::logging::LogFormat;
use crate::types::{NatsmqError, Result};

/// Ack wait used when none (or a non-positive one) is configured
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);

/// Default connect timeout for the initial connection
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// natsmq - publish JSON messages over NATS and JetStream
#[derive(Parser, Debug, Clone)]
#[command(name = "natsmq")]
#[command(about = "Publish JSON payloads over NATS core or JetStream")]
pub struct Args {
    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Streaming layer configuration
    #[command(flatten)]
    pub streaming: StreamingArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Operations the binary can run
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Publish a JSON payload to a channel on the streaming layer
    Publish {
        /// Channel name, relative to the cluster
        channel: String,

        /// JSON payload
        payload: String,

        /// Return after handing off and report the ack from the background
        #[arg(long = "async")]
        async_publish: bool,
    },

    /// Publish a JSON payload on the core connection (no acknowledgement)
    Emit {
        /// Subject to publish on
        subject: String,

        /// JSON payload
        payload: String,
    },
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,

    /// NATS token (optional, ignored when user/password are set)
    #[arg(long, env = "NATS_TOKEN")]
    pub nats_token: Option<String>,

    /// Timeout for establishing the initial connection, in seconds
    #[arg(long, env = "NATS_CONNECT_TIMEOUT_SECS", default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,

    /// Require TLS on the connection
    #[arg(long, env = "NATS_REQUIRE_TLS", default_value = "false")]
    pub require_tls: bool,
}

/// Streaming (JetStream) configuration
#[derive(Parser, Debug, Clone)]
pub struct StreamingArgs {
    /// Cluster identifier; also names the backing stream
    #[arg(long, env = "NATS_CLUSTER_ID", default_value = "test-cluster")]
    pub cluster_id: String,

    /// Base client identifier; the connect timestamp is appended
    #[arg(long, env = "NATS_CLIENT_ID", default_value = "natsmq")]
    pub client_id: String,

    /// Publish ack wait in milliseconds (zero or negative uses the default)
    #[arg(long, env = "NATS_ACK_TIMEOUT_MS", default_value_t = 0, allow_negative_numbers = true)]
    pub ack_timeout_ms: i64,

    /// JetStream domain (optional)
    #[arg(long, env = "NATS_JS_DOMAIN")]
    pub js_domain: Option<String>,
}

impl NatsArgs {
    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl StreamingArgs {
    /// Effective ack wait (falls back to DEFAULT_ACK_WAIT when not positive)
    pub fn ack_wait(&self) -> Duration {
        effective_ack_wait(self.ack_timeout_ms)
    }
}

/// Resolve a configured ack timeout in milliseconds to the wait actually used
pub fn effective_ack_wait(ack_timeout_ms: i64) -> Duration {
    if ack_timeout_ms > 0 {
        Duration::from_millis(ack_timeout_ms as u64)
    } else {
        DEFAULT_ACK_WAIT
    }
}

/// Everything the connection factory and streaming layer consume.
///
/// The span is the logging context: every line emitted by connections built
/// from this config is recorded under it.
#[derive(Debug, Clone)]
pub struct Config {
    pub nats: NatsArgs,
    pub streaming: StreamingArgs,
    pub span: Span,
}

impl Config {
    /// Create a config logging under the current span
    pub fn new(nats: NatsArgs, streaming: StreamingArgs) -> Self {
        Self {
            nats,
            streaming,
            span: Span::current(),
        }
    }

    /// Set the parent span for log lines
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Broker address
    pub fn broker(&self) -> &str {
        &self.nats.nats_url
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.nats.nats_url.trim().is_empty() {
            return Err(NatsmqError::Config("NATS_URL must not be empty".to_string()));
        }

        if self.streaming.client_id.trim().is_empty() {
            return Err(NatsmqError::Config(
                "NATS_CLIENT_ID must not be empty".to_string(),
            ));
        }

        validate_cluster_id(&self.streaming.cluster_id)
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config::new(args.nats, args.streaming)
    }
}

/// Cluster ids double as stream names, so they must be a single subject token
pub fn validate_cluster_id(cluster_id: &str) -> Result<()> {
    if cluster_id.is_empty() {
        return Err(NatsmqError::Config(
            "NATS_CLUSTER_ID must not be empty".to_string(),
        ));
    }

    if let Some(c) = cluster_id
        .chars()
        .find(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>' | '/' | '\\'))
    {
        return Err(NatsmqError::Config(format!(
            "NATS_CLUSTER_ID contains invalid character {c:?}: {cluster_id}"
        )));
    }

    Ok(())
}

/// Channels are one or more dot-separated tokens below the cluster subject
pub fn validate_channel(channel: &str) -> Result<()> {
    if channel.is_empty() {
        return Err(NatsmqError::Config("channel must not be empty".to_string()));
    }

    if channel.split('.').any(str::is_empty) {
        return Err(NatsmqError::Config(format!(
            "channel has an empty token: {channel}"
        )));
    }

    if let Some(c) = channel
        .chars()
        .find(|c| c.is_whitespace() || matches!(c, '*' | '>'))
    {
        return Err(NatsmqError::Config(format!(
            "channel contains invalid character {c:?}: {channel}"
        )));
    }

    Ok(())
}
