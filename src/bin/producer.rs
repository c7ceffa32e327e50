//! ActivityMQ producer CLI: sends one message and exits.

use activitymq::client::KafkaClient;
use activitymq::events::sample_message;
use activitymq::{telemetry, Config};
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "activitymq-producer")]
#[command(about = "Send a test message to a Kafka topic")]
struct Cli {
    /// Kafka topic to produce to
    #[arg(long)]
    topic: String,

    /// Type of message to send (event_type)
    #[arg(long)]
    message_type: Option<String>,

    /// Message key
    #[arg(long)]
    key: Option<String>,

    /// Custom JSON message to send
    #[arg(long)]
    custom_message: Option<String>,

    /// Kafka bootstrap servers
    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS")]
    bootstrap_servers: Option<String>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn build_message(cli: &Cli) -> Result<Value> {
    match &cli.custom_message {
        Some(raw) => serde_json::from_str(raw).context("Invalid JSON in custom message"),
        None => Ok(sample_message(&cli.topic, cli.message_type.as_deref())),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(servers) = &cli.bootstrap_servers {
        config.kafka.bootstrap_servers = servers.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    telemetry::init(&config.logging, config.kafka.debug);
    telemetry::install_panic_hook();

    info!("Starting Kafka producer for topic: {}", cli.topic);
    info!("Using bootstrap servers: {}", config.kafka.bootstrap_servers);

    let message = match build_message(&cli) {
        Ok(message) => message,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let client = KafkaClient::new(config.kafka).await?;
    let sent = client.send(&cli.topic, &message, cli.key.as_deref()).await;
    client.shutdown(Duration::from_secs(1)).await;

    if sent {
        info!("Successfully sent message to topic {}", cli.topic);
        info!("Message: {}", message);
        Ok(())
    } else {
        error!("Failed to send message to topic {}", cli.topic);
        std::process::exit(1);
    }
}
