// ecomarket-messaging-core/src/topology.rs

/// Durable fanout exchange every `UsuarioCreado` event is published to.
pub const USER_EVENTS_EXCHANGE: &str = "user_events";

/// Sink for rejected deliveries. Declared by every participant; what happens
/// past it belongs to the operations side.
pub const DEAD_LETTER_EXCHANGE: &str = "dead_letters";

pub const EMAIL_QUEUE: &str = "email_queue";
pub const LOYALTY_QUEUE: &str = "loyalty_queue";
pub const ANALYTICS_QUEUE: &str = "analytics_queue";

/// Shape of the queue a consumer binds to the fanout exchange.
///
/// Durable queues survive restarts, dead-letter into
/// [`DEAD_LETTER_EXCHANGE`], and get a companion delay queue for bounded
/// handler retries. Ephemeral queues are server-named, exclusive and
/// auto-delete: anything undelivered at disconnect is accepted loss.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueSpec {
    Durable { name: String },
    Ephemeral,
}

impl QueueSpec {
    pub fn durable(name: impl Into<String>) -> Self {
        Self::Durable { name: name.into() }
    }

    pub fn email() -> Self {
        Self::durable(EMAIL_QUEUE)
    }

    pub fn loyalty() -> Self {
        Self::durable(LOYALTY_QUEUE)
    }

    pub fn analytics() -> Self {
        Self::durable(ANALYTICS_QUEUE)
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable { .. })
    }
}
