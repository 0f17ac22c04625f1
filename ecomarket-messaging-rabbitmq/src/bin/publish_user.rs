use std::sync::Arc;

use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ecomarket_messaging_core::{Publisher, UserCreated};
use ecomarket_messaging_rabbitmq::{RabbitMqOptions, RabbitPublisher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let nombre = args.next().context("usage: publish_user <nombre> <email>")?;
    let email = args.next().context("usage: publish_user <nombre> <email>")?;

    let user = UserCreated {
        user_id: Uuid::new_v4().to_string(),
        nombre,
        email,
    };

    let transport = Arc::new(RabbitPublisher::new(RabbitMqOptions::from_env()));
    let publisher = Publisher::new(transport);

    if !publisher.publish_user_created(&user).await {
        bail!("event publication failed after all retries");
    }
    println!("{}", user.user_id);
    Ok(())
}
