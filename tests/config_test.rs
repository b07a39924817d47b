//! Configuration and connection setup tests

use clap::Parser;
use natsmq::config::{Args, Command, Config, DEFAULT_ACK_WAIT};
use natsmq::logging::LogFormat;
use natsmq::nats::{EncodedConnection, StreamingConnection};
use natsmq::NatsmqError;
use std::time::Duration;

fn args(extra: &[&str]) -> Args {
    let mut argv = vec!["natsmq"];
    argv.extend_from_slice(extra);
    argv.extend_from_slice(&["publish", "orders", "{}"]);
    Args::try_parse_from(argv).expect("valid args")
}

#[test]
fn test_defaults() {
    let args = args(&[]);
    assert_eq!(args.nats.nats_url, "nats://127.0.0.1:4222");
    assert_eq!(args.nats.connect_timeout_secs, 5);
    assert!(!args.nats.require_tls);
    assert_eq!(args.streaming.cluster_id, "test-cluster");
    assert_eq!(args.streaming.client_id, "natsmq");
    assert_eq!(args.streaming.ack_wait(), DEFAULT_ACK_WAIT);
    assert_eq!(args.log_format, LogFormat::Text);
    assert!(matches!(
        args.command,
        Command::Publish {
            async_publish: false,
            ..
        }
    ));
}

#[test]
fn test_all_flags() {
    let args = args(&[
        "--nats-url",
        "nats://broker:4222",
        "--nats-user",
        "svc",
        "--nats-password",
        "secret",
        "--connect-timeout-secs",
        "2",
        "--cluster-id",
        "events",
        "--client-id",
        "billing",
        "--ack-timeout-ms",
        "2500",
        "--js-domain",
        "hub",
        "--log-format",
        "json",
    ]);

    assert_eq!(args.nats.nats_user.as_deref(), Some("svc"));
    assert_eq!(args.nats.connect_timeout(), Duration::from_secs(2));
    assert_eq!(args.streaming.ack_wait(), Duration::from_millis(2500));
    assert_eq!(args.streaming.js_domain.as_deref(), Some("hub"));
    assert_eq!(args.log_format, LogFormat::Json);

    let config = Config::from(args);
    assert_eq!(config.broker(), "nats://broker:4222");
    assert!(config.validate().is_ok());
}

#[tokio::test]
async fn test_streaming_connect_rejects_bad_cluster_id() {
    let config = Config::from(args(&["--cluster-id", "events.v1"]));

    let result = StreamingConnection::connect(&config).await;
    assert!(matches!(result, Err(NatsmqError::Config(_))));
}

#[tokio::test]
async fn test_encoded_connect_failure_is_returned() {
    let config = Config::from(args(&[
        "--nats-url",
        "nats://127.0.0.1:1",
        "--connect-timeout-secs",
        "1",
    ]));

    let result = EncodedConnection::connect(&config).await;
    assert!(matches!(result, Err(NatsmqError::Connect(_))));
}
