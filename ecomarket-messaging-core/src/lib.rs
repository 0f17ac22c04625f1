pub mod bus;
pub mod delivery;
pub mod error;
pub mod event;
pub mod handler;
pub mod handlers;
pub mod topology;

pub use bus::{PublishTransport, Publisher, RetryPolicy};
pub use delivery::{dispatch, RejectReason, Verdict, MAX_HANDLER_RETRIES};
pub use error::MessagingError;
pub use event::{EventEnvelope, EventMeta, UserCreated, UserEvent, EVENT_TYPE_USER_CREATED};
pub use handler::UserEventHandler;
pub use handlers::{AnalyticsRecorder, EmailNotifier, LoyaltyActivator};
pub use topology::{
    QueueSpec, ANALYTICS_QUEUE, DEAD_LETTER_EXCHANGE, EMAIL_QUEUE, LOYALTY_QUEUE,
    USER_EVENTS_EXCHANGE,
};
