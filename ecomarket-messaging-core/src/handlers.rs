// ecomarket-messaging-core/src/handlers.rs
use async_trait::async_trait;
use tracing::info;

use crate::{MessagingError, UserEvent, UserEventHandler};

/// Sends the welcome email for a new user. Only deliveries carrying an email
/// address are relevant here.
pub struct EmailNotifier;

#[async_trait]
impl UserEventHandler for EmailNotifier {
    fn accepts(&self, event: &UserEvent) -> bool {
        event.email().is_some()
    }

    async fn handle(&self, event: &UserEvent) -> Result<(), MessagingError> {
        let email = event
            .email()
            .ok_or_else(|| MessagingError::Handler("delivery without email".into()))?;
        // Real dispatch (SMTP, provider API) would go here.
        info!("sending welcome email to {}", email);
        Ok(())
    }
}

/// Activates the loyalty program for the new user id.
pub struct LoyaltyActivator;

#[async_trait]
impl UserEventHandler for LoyaltyActivator {
    fn accepts(&self, event: &UserEvent) -> bool {
        event.user_id().is_some()
    }

    async fn handle(&self, event: &UserEvent) -> Result<(), MessagingError> {
        let user_id = event
            .user_id()
            .ok_or_else(|| MessagingError::Handler("delivery without user id".into()))?;
        info!("activating loyalty benefits for {}", user_id);
        Ok(())
    }
}

/// Records every parsed event, whatever its shape.
pub struct AnalyticsRecorder;

#[async_trait]
impl UserEventHandler for AnalyticsRecorder {
    fn accepts(&self, _event: &UserEvent) -> bool {
        true
    }

    async fn handle(&self, event: &UserEvent) -> Result<(), MessagingError> {
        let meta = event.meta();
        info!(
            "analytics: event received: {} id={}",
            meta.event_type.as_deref().unwrap_or("<none>"),
            meta.event_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "<none>".into()),
        );
        Ok(())
    }
}
