// ecomarket-messaging-core/src/handler.rs
use crate::{MessagingError, UserEvent};
use async_trait::async_trait;

/// Business strategy invoked by the consumer runtime for each delivery.
///
/// `accepts` is the schema gate: a delivery the handler does not accept is
/// rejected without requeue. `handle` runs synchronously with respect to the
/// consuming channel; failures are values, never panics.
#[async_trait]
pub trait UserEventHandler: Send + Sync {
    fn accepts(&self, event: &UserEvent) -> bool;

    async fn handle(&self, event: &UserEvent) -> Result<(), MessagingError>;
}
