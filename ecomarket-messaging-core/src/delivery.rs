// ecomarket-messaging-core/src/delivery.rs
use tracing::warn;

use crate::{UserEvent, UserEventHandler};

/// Redeliveries granted to a failing handler before the message is
/// dead-lettered for good.
pub const MAX_HANDLER_RETRIES: u32 = 3;

/// Why a delivery was rejected without requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ParseFailed,
    SchemaMismatch,
    RetryBudgetExhausted,
}

/// Terminal decision for one delivery. The broker adapter maps this onto
/// ack / nack / scheduled-redelivery primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ack,
    DeadLetter(RejectReason),
    Redeliver { retries: u32 },
}

/// Runs one delivery through the acknowledgment state machine.
///
/// `retries` is the `x-retries` value carried by the delivery (0 when the
/// header is absent). The budget check runs before the handler, so a message
/// that already spent its budget is never executed again.
pub async fn dispatch(handler: &dyn UserEventHandler, body: &[u8], retries: u32) -> Verdict {
    let event = match UserEvent::parse(body) {
        Ok(event) => event,
        Err(e) => {
            warn!("discarding undecodable delivery: {e}");
            return Verdict::DeadLetter(RejectReason::ParseFailed);
        }
    };

    if !handler.accepts(&event) {
        return Verdict::DeadLetter(RejectReason::SchemaMismatch);
    }

    if retries >= MAX_HANDLER_RETRIES {
        return Verdict::DeadLetter(RejectReason::RetryBudgetExhausted);
    }

    match handler.handle(&event).await {
        Ok(()) => Verdict::Ack,
        Err(e) => {
            warn!("handler failed (retries so far: {retries}): {e}");
            Verdict::Redeliver {
                retries: retries + 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessagingError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubHandler {
        accept: bool,
        fail: bool,
        calls: AtomicU32,
    }

    impl StubHandler {
        fn new(accept: bool, fail: bool) -> Self {
            Self {
                accept,
                fail,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UserEventHandler for StubHandler {
        fn accepts(&self, _event: &UserEvent) -> bool {
            self.accept
        }

        async fn handle(&self, _event: &UserEvent) -> Result<(), MessagingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(MessagingError::Handler("smtp down".into()))
            } else {
                Ok(())
            }
        }
    }

    const BODY: &[u8] = br#"{"user_id":"u1","nombre":"Ana","email":"ana@x.com"}"#;

    #[tokio::test]
    async fn undecodable_body_is_dead_lettered_without_running_handler() {
        let handler = StubHandler::new(true, false);
        let verdict = dispatch(&handler, b"{{nope", 0).await;
        assert_eq!(verdict, Verdict::DeadLetter(RejectReason::ParseFailed));
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn irrelevant_shape_is_dead_lettered() {
        let handler = StubHandler::new(false, false);
        let verdict = dispatch(&handler, BODY, 0).await;
        assert_eq!(verdict, Verdict::DeadLetter(RejectReason::SchemaMismatch));
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn successful_handler_acks() {
        let handler = StubHandler::new(true, false);
        assert_eq!(dispatch(&handler, BODY, 0).await, Verdict::Ack);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn failing_handler_schedules_redelivery_with_incremented_count() {
        let handler = StubHandler::new(true, true);
        assert_eq!(
            dispatch(&handler, BODY, 0).await,
            Verdict::Redeliver { retries: 1 }
        );
        assert_eq!(
            dispatch(&handler, BODY, 2).await,
            Verdict::Redeliver { retries: 3 }
        );
        assert_eq!(handler.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_budget_dead_letters_even_if_handler_would_succeed() {
        let handler = StubHandler::new(true, false);
        for retries in [MAX_HANDLER_RETRIES, MAX_HANDLER_RETRIES + 1] {
            let verdict = dispatch(&handler, BODY, retries).await;
            assert_eq!(
                verdict,
                Verdict::DeadLetter(RejectReason::RetryBudgetExhausted)
            );
        }
        assert_eq!(handler.calls(), 0);
    }
}
