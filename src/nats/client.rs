//! NATS connection factory
//!
//! Builds core connections with a fixed reconnect policy and lifecycle
//! logging. Retrying is left to the client library; this module only
//! supplies its parameters.

use async_nats::{Client, ConnectOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, Span};

use crate::config::{Config, NatsArgs};
use crate::nats::lifecycle::{ConnectionObserver, EventDispatcher, LoggingObserver};
use crate::types::Result;

/// Delay between reconnect attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Total time spent reconnecting before giving up
pub const RECONNECT_TOTAL_WAIT: Duration = Duration::from_secs(10 * 60);

/// Reconnect parameters handed to the client library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub total_wait: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: RECONNECT_DELAY,
            total_wait: RECONNECT_TOTAL_WAIT,
        }
    }
}

impl ReconnectPolicy {
    /// Number of attempts that fit in the total wait
    pub fn max_reconnects(&self) -> usize {
        if self.delay.is_zero() {
            return 0;
        }
        (self.total_wait.as_millis() / self.delay.as_millis()) as usize
    }

    /// Wait before connect attempt `attempts`. The client library counts the
    /// initial dial as attempt 1, which must not be delayed.
    pub fn reconnect_delay(&self, attempts: usize) -> Duration {
        if attempts <= 1 {
            Duration::ZERO
        } else {
            self.delay
        }
    }
}

/// Keep-alive ping parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub interval: Duration,
    pub max_missed: u32,
}

impl KeepAlive {
    /// How long the server can stay silent before the connection counts as lost
    pub fn lost_after(&self) -> Duration {
        self.interval * self.max_missed
    }
}

/// Builds core NATS connections
pub struct ConnectionFactory {
    args: NatsArgs,
    policy: ReconnectPolicy,
    keep_alive: Option<KeepAlive>,
    name: Option<String>,
    observers: Vec<Arc<dyn ConnectionObserver>>,
    span: Span,
}

impl ConnectionFactory {
    /// Create a factory for the broker in `config`
    pub fn new(config: &Config) -> Self {
        let span = info_span!(parent: &config.span, "nats", broker = %config.broker());
        Self {
            args: config.nats.clone(),
            policy: ReconnectPolicy::default(),
            keep_alive: None,
            name: None,
            observers: Vec::new(),
            span,
        }
    }

    /// Set the connection name presented to the server
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Override the reconnect policy
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the keep-alive ping interval
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Add an observer next to the default logging one
    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Connect options with policy, credentials and callbacks applied
    pub fn connect_options(&self) -> ConnectOptions {
        let policy = self.policy;

        let mut options = ConnectOptions::new()
            .connection_timeout(self.args.connect_timeout())
            .max_reconnects(self.policy.max_reconnects())
            .reconnect_delay_callback(move |attempts| policy.reconnect_delay(attempts))
            .require_tls(self.args.require_tls);

        if let Some(ref name) = self.name {
            options = options.name(name);
        }

        if let Some(keep_alive) = self.keep_alive {
            options = options.ping_interval(keep_alive.interval);
        }

        if let (Some(user), Some(pass)) = (&self.args.nats_user, &self.args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        } else if let Some(ref token) = self.args.nats_token {
            options = options.token(token.clone());
        }

        let mut observers: Vec<Arc<dyn ConnectionObserver>> = vec![Arc::new(LoggingObserver::new(
            self.args.nats_url.clone(),
            self.policy.total_wait,
            self.span.clone(),
        ))];
        observers.extend(self.observers.iter().cloned());
        let dispatcher = Arc::new(EventDispatcher::new(observers));

        options.event_callback(move |event| {
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.dispatch(event) }
        })
    }

    /// Connect to the broker. Failures are returned as-is; the reconnect
    /// policy only applies once a first connection succeeded.
    pub async fn connect(&self) -> Result<Client> {
        let url = &self.args.nats_url;
        info!(parent: &self.span, "Connecting to NATS at {}", url);

        let client = match self.connect_options().connect(url.as_str()).await {
            Ok(client) => client,
            Err(e) => {
                error!(parent: &self.span, err = %e, "Failed to connect to NATS at {}", url);
                return Err(e.into());
            }
        };

        info!(
            parent: &self.span,
            max_reconnects = self.policy.max_reconnects(),
            "Connected to NATS at {}",
            url
        );
        Ok(client)
    }
}

/// Connect to the broker in `config` with the default policy
pub async fn connect(config: &Config) -> Result<Client> {
    ConnectionFactory::new(config).connect().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamingArgs;
    use crate::types::NatsmqError;
    use std::time::Instant;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Minimal server: sends INFO and answers every PING with PONG
    async fn spawn_local_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let info = format!(
                        "INFO {{\"server_id\":\"local\",\"version\":\"2.10.0\",\"host\":\"127.0.0.1\",\"port\":{port},\"max_payload\":1048576,\"proto\":1,\"headers\":true}}\r\n"
                    );
                    if write.write_all(info.as_bytes()).await.is_err() {
                        return;
                    }
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if line.starts_with("PING") && write.write_all(b"PONG\r\n").await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        format!("nats://127.0.0.1:{port}")
    }

    fn config_for(url: &str) -> Config {
        Config::new(
            NatsArgs {
                nats_url: url.to_string(),
                nats_user: None,
                nats_password: None,
                nats_token: None,
                connect_timeout_secs: 1,
                require_tls: false,
            },
            StreamingArgs {
                cluster_id: "test-cluster".to_string(),
                client_id: "natsmq-test".to_string(),
                ack_timeout_ms: 0,
                js_domain: None,
            },
        )
    }

    #[test]
    fn test_default_policy_attempts() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay, Duration::from_secs(10));
        assert_eq!(policy.total_wait, Duration::from_secs(600));
        assert_eq!(policy.max_reconnects(), 60);
    }

    #[test]
    fn test_custom_policy_attempts() {
        let policy = ReconnectPolicy {
            delay: Duration::from_millis(1500),
            total_wait: Duration::from_secs(30),
        };
        assert_eq!(policy.max_reconnects(), 20);

        let zero = ReconnectPolicy {
            delay: Duration::ZERO,
            total_wait: Duration::from_secs(30),
        };
        assert_eq!(zero.max_reconnects(), 0);
    }

    #[test]
    fn test_first_attempt_is_not_delayed() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.reconnect_delay(0), Duration::ZERO);
        assert_eq!(policy.reconnect_delay(1), Duration::ZERO);
        assert_eq!(policy.reconnect_delay(2), Duration::from_secs(10));
        assert_eq!(policy.reconnect_delay(60), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_initial_connect_is_immediate() {
        let url = spawn_local_server().await;

        let started = Instant::now();
        let client = connect(&config_for(&url)).await.unwrap();
        let elapsed = started.elapsed();

        assert!(
            elapsed < Duration::from_secs(5),
            "initial connect took {elapsed:?}"
        );
        drop(client);
    }

    #[test]
    fn test_keep_alive_window() {
        let keep_alive = KeepAlive {
            interval: Duration::from_secs(15),
            max_missed: 5,
        };
        assert_eq!(keep_alive.lost_after(), Duration::from_secs(75));
    }

    #[test]
    fn test_factory_uses_default_policy() {
        let factory = ConnectionFactory::new(&config_for("nats://127.0.0.1:4222"));
        assert_eq!(factory.policy().max_reconnects(), 60);
    }

    #[tokio::test]
    async fn test_connect_failure_is_returned() {
        // Nothing listens on port 1
        let started = Instant::now();
        let result = connect(&config_for("nats://127.0.0.1:1")).await;
        assert!(matches!(result, Err(NatsmqError::Connect(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
