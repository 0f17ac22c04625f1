use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use ecomarket_messaging_core::{LoyaltyActivator, QueueSpec};
use ecomarket_messaging_rabbitmq::{RabbitConsumer, RabbitMqOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts = RabbitMqOptions::from_env().with_service("loyalty");
    let consumer = RabbitConsumer::new(opts, QueueSpec::loyalty());

    tokio::select! {
        res = consumer.run(Arc::new(LoyaltyActivator)) => res?,
        _ = tokio::signal::ctrl_c() => info!("loyalty consumer shutting down"),
    }
    Ok(())
}
