//! ActivityMQ consumer CLI: prints every message of a topic until Ctrl-C.

use activitymq::client::{ErrorKind, KafkaClient, StartOffset};
use activitymq::handlers::log_message;
use activitymq::{telemetry, Config};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "activitymq-consumer")]
#[command(about = "Print messages arriving on a Kafka topic")]
struct Cli {
    /// Kafka topic to consume
    #[arg(long)]
    topic: String,

    /// Consumer group ID
    #[arg(long)]
    group: Option<String>,

    /// Kafka bootstrap servers
    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS")]
    bootstrap_servers: Option<String>,

    /// Only read messages produced after startup
    #[arg(long)]
    from_latest: bool,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(servers) = &cli.bootstrap_servers {
        config.kafka.bootstrap_servers = servers.clone();
    }
    telemetry::init(&config.logging, config.kafka.debug);
    telemetry::install_panic_hook();

    info!("Starting Kafka consumer for topic: {}", cli.topic);
    info!("Using bootstrap servers: {}", config.kafka.bootstrap_servers);

    let start_offset = if cli.from_latest {
        StartOffset::Latest
    } else {
        config.kafka.consumer.start_offset
    };

    let client = KafkaClient::new(config.kafka.clone()).await?;
    let Some(mut subscription) = client
        .create_consumer(&cli.topic, cli.group.as_deref(), start_offset)
        .await
    else {
        error!("Failed to create consumer. Exiting.");
        client.shutdown(Duration::from_secs(1)).await;
        std::process::exit(1);
    };

    info!("Consumer started. Listening for messages on topic: {}", cli.topic);
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Consumer stopped by user");
                break;
            }
            next = subscription.next() => match next {
                Some(Ok(message)) => log_message(message.key.as_deref(), &message.value),
                Some(Err(e)) if e.kind() == ErrorKind::Deserialization => {
                    error!("Skipping malformed message: {}", e);
                }
                Some(Err(e)) => {
                    error!("Error in consumer: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    subscription.close().await;
    client.shutdown(config.service.shutdown_grace()).await;
    info!("Consumer closed");
    Ok(())
}
