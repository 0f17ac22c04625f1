use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions},
    types::FieldTable,
    BasicProperties, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::warn;

use crate::options::RabbitMqOptions;
use ecomarket_messaging_core::{MessagingError, PublishTransport, USER_EVENTS_EXCHANGE};

/// Single-shot publishing transport: every send opens its own connection,
/// declares the fanout exchange, publishes the message as persistent and
/// tears the connection down again. Isolation over throughput; pooling
/// belongs in a different [`PublishTransport`] implementation.
pub struct RabbitPublisher {
    opts: RabbitMqOptions,
}

impl RabbitPublisher {
    pub fn new(opts: RabbitMqOptions) -> Self {
        Self { opts }
    }
}

#[async_trait]
impl PublishTransport for RabbitPublisher {
    async fn send(&self, body: &[u8]) -> Result<(), MessagingError> {
        let conn = Connection::connect(&self.opts.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        let ch = conn
            .create_channel()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        if self.opts.confirms {
            ch.confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| MessagingError::Connection(e.to_string()))?;
        }

        ch.exchange_declare(
            USER_EVENTS_EXCHANGE,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                auto_delete: false,
                internal: false,
                nowait: false,
                passive: false,
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::Topology(e.to_string()))?;

        // routing key is ignored by fanout; delivery_mode 2 asks the broker
        // to persist the message
        let confirm = ch
            .basic_publish(
                USER_EVENTS_EXCHANGE,
                "",
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await
            .map_err(|e| MessagingError::Publish(e.to_string()))?
            .await
            .map_err(|e| MessagingError::Publish(e.to_string()))?;

        if confirm.is_nack() {
            return Err(MessagingError::Publish("publisher confirm NACK".into()));
        }

        if let Err(e) = conn.close(200, "publish complete").await {
            warn!("closing publish connection failed: {e}");
        }
        Ok(())
    }
}
