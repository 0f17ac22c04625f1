mod consumer;
mod options;
mod publisher;

pub use consumer::RabbitConsumer;
pub use options::{retry_queue, RabbitMqOptions};
pub use publisher::RabbitPublisher;
