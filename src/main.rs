//! natsmq - publish JSON payloads over NATS core or JetStream

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use natsmq::{
    config::{Args, Command, Config},
    logging,
    nats::{EncodedConnection, StreamingConnection},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_format)?;

    let command = args.command.clone();
    let config = Config::from(args);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  natsmq");
    info!("======================================");
    info!("NATS: {}", config.broker());
    info!("Cluster: {}", config.streaming.cluster_id);
    info!("Client: {}", config.streaming.client_id);
    info!("Ack wait: {:?}", config.streaming.ack_wait());
    info!("======================================");

    match command {
        Command::Publish {
            channel,
            payload,
            async_publish,
        } => {
            let value: serde_json::Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;

            let conn = StreamingConnection::connect(&config).await?;

            let result = if async_publish {
                match conn.publish_async(&channel, &value).await {
                    Ok(handle) => {
                        info!("Waiting for ack of {}", handle.correlation_id());
                        handle.wait().await
                    }
                    Err(e) => Err(e),
                }
            } else {
                conn.publish(&channel, &value).await
            };

            conn.stop().await;

            let ack = result?;
            info!(
                "Stored on stream {} at sequence {}{}",
                ack.stream,
                ack.sequence,
                if ack.duplicate { " (duplicate)" } else { "" }
            );
        }
        Command::Emit { subject, payload } => {
            let value: serde_json::Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;

            let conn = EncodedConnection::connect(&config).await?;
            conn.publish(&subject, &value).await?;
            conn.flush().await?;
            info!("Published to {}", subject);
        }
    }

    info!("Shutdown complete");
    Ok(())
}
