use std::sync::Arc;

use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{error, info, warn};

use crate::options::{retry_queue, RabbitMqOptions};
use ecomarket_messaging_core::{
    dispatch, MessagingError, QueueSpec, UserEventHandler, Verdict, DEAD_LETTER_EXCHANGE,
    USER_EVENTS_EXCHANGE,
};

const RETRY_HEADER: &str = "x-retries";

/// Receive loop for one queue. Owns its connection and channel exclusively;
/// topology is declared once at startup and deliveries are processed one at
/// a time (prefetch bounds the in-flight count).
pub struct RabbitConsumer {
    opts: RabbitMqOptions,
    spec: QueueSpec,
}

impl RabbitConsumer {
    pub fn new(opts: RabbitMqOptions, spec: QueueSpec) -> Self {
        Self { opts, spec }
    }

    /// Consumes until the delivery stream ends (connection loss) or the
    /// calling task is cancelled. Dropping the future closes the channel;
    /// anything unacked becomes redeliverable to other instances of the
    /// same queue.
    pub async fn run(&self, handler: Arc<dyn UserEventHandler>) -> Result<(), MessagingError> {
        let conn = Connection::connect(&self.opts.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        let ch = conn
            .create_channel()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        let queue_name = self.declare_topology(&ch).await?;

        ch.basic_qos(self.opts.prefetch, BasicQosOptions { global: false })
            .await
            .map_err(|e| MessagingError::Topology(e.to_string()))?;

        let mut consumer = ch
            .basic_consume(
                &queue_name,
                &format!("consumer-{}", self.opts.service),
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::Subscribe(e.to_string()))?;

        info!(
            "consuming queue={} exchange={}",
            queue_name, USER_EVENTS_EXCHANGE
        );

        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(d) => self.process(&ch, &queue_name, d, handler.as_ref()).await,
                Err(e) => {
                    error!("delivery error: {e}");
                    return Err(MessagingError::Subscribe(e.to_string()));
                }
            }
        }

        Ok(())
    }

    /// Declares the shared exchanges and this consumer's queue. Safe to
    /// repeat: every declaration is idempotent as long as the properties
    /// match what already exists.
    async fn declare_topology(&self, ch: &Channel) -> Result<String, MessagingError> {
        for exchange in [USER_EVENTS_EXCHANGE, DEAD_LETTER_EXCHANGE] {
            ch.exchange_declare(
                exchange,
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
        }

        let queue_name = match &self.spec {
            QueueSpec::Durable { name } => {
                let mut args = FieldTable::default();
                args.insert(
                    "x-dead-letter-exchange".into(),
                    AMQPValue::LongString(DEAD_LETTER_EXCHANGE.into()),
                );

                ch.queue_declare(
                    name,
                    QueueDeclareOptions {
                        durable: true,
                        auto_delete: false,
                        exclusive: false,
                        nowait: false,
                        passive: false,
                    },
                    args,
                )
                .await
                .map_err(|e| MessagingError::Topology(e.to_string()))?;

                // delay queue: parks a failed message for retry_ttl_ms, then
                // expires it back onto the main queue via the default exchange
                let retry = retry_queue(name);
                let mut retry_args = FieldTable::default();
                retry_args.insert(
                    "x-dead-letter-exchange".into(),
                    AMQPValue::LongString("".into()),
                );
                retry_args.insert(
                    "x-dead-letter-routing-key".into(),
                    AMQPValue::LongString(name.as_str().into()),
                );
                retry_args.insert(
                    "x-message-ttl".into(),
                    AMQPValue::LongLongInt(i64::from(self.opts.retry_ttl_ms)),
                );

                ch.queue_declare(
                    &retry,
                    QueueDeclareOptions {
                        durable: true,
                        auto_delete: false,
                        exclusive: false,
                        nowait: false,
                        passive: false,
                    },
                    retry_args,
                )
                .await
                .map_err(|e| MessagingError::Topology(e.to_string()))?;

                name.clone()
            }
            QueueSpec::Ephemeral => {
                let queue = ch
                    .queue_declare(
                        "",
                        QueueDeclareOptions {
                            durable: false,
                            auto_delete: true,
                            exclusive: true,
                            nowait: false,
                            passive: false,
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| MessagingError::Topology(e.to_string()))?;
                queue.name().as_str().to_string()
            }
        };

        ch.queue_bind(
            &queue_name,
            USER_EVENTS_EXCHANGE,
            "",
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::Topology(e.to_string()))?;

        Ok(queue_name)
    }

    async fn process(
        &self,
        ch: &Channel,
        queue: &str,
        delivery: Delivery,
        handler: &dyn UserEventHandler,
    ) {
        let retries = retry_count(&delivery.properties);

        match dispatch(handler, &delivery.data, retries).await {
            Verdict::Ack => {
                if let Err(e) = delivery.ack(BasicAckOptions { multiple: false }).await {
                    error!("ack failed on {queue}: {e}");
                }
            }
            Verdict::DeadLetter(reason) => {
                warn!("dead-lettering message from {queue}: {reason:?}");
                nack_no_requeue(&delivery, queue).await;
            }
            Verdict::Redeliver { retries } => {
                if self.spec.is_durable() {
                    match schedule_redelivery(ch, queue, &delivery.data, retries).await {
                        Ok(()) => {
                            if let Err(e) = delivery.ack(BasicAckOptions { multiple: false }).await
                            {
                                error!("ack after redelivery failed on {queue}: {e}");
                            }
                        }
                        Err(e) => {
                            // keep a durable trace of the failure instead of
                            // dropping the message on the floor
                            error!("scheduling redelivery for {queue} failed: {e}");
                            nack_no_requeue(&delivery, queue).await;
                        }
                    }
                } else {
                    warn!("handler failed on ephemeral queue {queue}; dropping delivery");
                    nack_no_requeue(&delivery, queue).await;
                }
            }
        }
    }
}

async fn nack_no_requeue(delivery: &Delivery, queue: &str) {
    if let Err(e) = delivery
        .nack(BasicNackOptions {
            multiple: false,
            requeue: false,
        })
        .await
    {
        error!("nack failed on {queue}: {e}");
    }
}

/// Re-enqueues the body on the queue's delay queue with the bumped retry
/// header, addressing it through the default exchange.
async fn schedule_redelivery(
    ch: &Channel,
    queue: &str,
    body: &[u8],
    retries: u32,
) -> Result<(), MessagingError> {
    let mut headers = FieldTable::default();
    headers.insert(RETRY_HEADER.into(), AMQPValue::LongInt(retries as i32));

    ch.basic_publish(
        "",
        &retry_queue(queue),
        BasicPublishOptions {
            mandatory: false,
            immediate: false,
        },
        body,
        BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_headers(headers),
    )
    .await
    .map_err(|e| MessagingError::Publish(e.to_string()))?
    .await
    .map_err(|e| MessagingError::Publish(e.to_string()))?;

    Ok(())
}

/// Times this delivery has already failed, 0 when the header is absent or
/// unreadable.
fn retry_count(props: &BasicProperties) -> u32 {
    props
        .headers()
        .as_ref()
        .and_then(|table| {
            table
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == RETRY_HEADER)
                .map(|(_, value)| value)
        })
        .and_then(header_u32)
        .unwrap_or(0)
}

fn header_u32(value: &AMQPValue) -> Option<u32> {
    match value {
        AMQPValue::ShortShortInt(n) => u32::try_from(*n).ok(),
        AMQPValue::ShortShortUInt(n) => Some(u32::from(*n)),
        AMQPValue::ShortInt(n) => u32::try_from(*n).ok(),
        AMQPValue::ShortUInt(n) => Some(u32::from(*n)),
        AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
        AMQPValue::LongUInt(n) => Some(*n),
        AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props_with_retries(value: AMQPValue) -> BasicProperties {
        let mut headers = FieldTable::default();
        headers.insert(RETRY_HEADER.into(), value);
        BasicProperties::default().with_headers(headers)
    }

    #[test]
    fn missing_header_defaults_to_zero() {
        assert_eq!(retry_count(&BasicProperties::default()), 0);
    }

    #[test]
    fn reads_integer_header_variants() {
        assert_eq!(retry_count(&props_with_retries(AMQPValue::LongInt(2))), 2);
        assert_eq!(
            retry_count(&props_with_retries(AMQPValue::LongLongInt(3))),
            3
        );
        assert_eq!(
            retry_count(&props_with_retries(AMQPValue::ShortShortUInt(1))),
            1
        );
    }

    #[test]
    fn unreadable_header_defaults_to_zero() {
        assert_eq!(
            retry_count(&props_with_retries(AMQPValue::LongString("two".into()))),
            0
        );
        assert_eq!(retry_count(&props_with_retries(AMQPValue::LongInt(-1))), 0);
    }
}
