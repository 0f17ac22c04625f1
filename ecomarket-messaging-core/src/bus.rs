// ecomarket-messaging-core/src/bus.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info};

use crate::{EventEnvelope, MessagingError, UserCreated};

/// One publication attempt against the broker. Injected into [`Publisher`]
/// so pooled or multiplexed transports can be substituted without touching
/// the retry contract.
#[async_trait]
pub trait PublishTransport: Send + Sync {
    async fn send(&self, body: &[u8]) -> Result<(), MessagingError>;
}

/// Bounded linear backoff: attempt `n` (1-based) waits `backoff * n` after
/// failing.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

/// Best-effort event publication. Failure is a return value, never an error
/// that aborts the caller: the triggering action must succeed regardless of
/// delivery outcome. The backoff sleep blocks the calling task for its
/// duration (and is cancelled by dropping the future), so request-path
/// callers run `publish_*` on a spawned task.
pub struct Publisher {
    transport: Arc<dyn PublishTransport>,
    policy: RetryPolicy,
}

impl Publisher {
    pub fn new(transport: Arc<dyn PublishTransport>) -> Self {
        Self::with_policy(transport, RetryPolicy::default())
    }

    pub fn with_policy(transport: Arc<dyn PublishTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn publish_user_created(&self, user: &UserCreated) -> bool {
        self.publish(&EventEnvelope::user_created(user.clone()))
            .await
    }

    pub async fn publish<T>(&self, envelope: &EventEnvelope<T>) -> bool
    where
        T: Serialize + Send + Sync + 'static,
    {
        let body = match serde_json::to_vec(envelope) {
            Ok(body) => body,
            Err(e) => {
                error!("cannot encode {} envelope: {e}", envelope.event_type);
                return false;
            }
        };

        let mut attempt = 0;
        while attempt < self.policy.max_attempts {
            match self.transport.send(&body).await {
                Ok(()) => {
                    info!(
                        "event {} published: id={}",
                        envelope.event_type, envelope.event_id
                    );
                    return true;
                }
                Err(e) => {
                    attempt += 1;
                    error!(
                        "error publishing {} (attempt {attempt}/{}): {e}",
                        envelope.event_type, self.policy.max_attempts
                    );
                    sleep(self.policy.delay_for(attempt)).await;
                }
            }
        }

        error!(
            "could not publish {} after {} attempts",
            envelope.event_type, self.policy.max_attempts
        );
        false
    }
}
