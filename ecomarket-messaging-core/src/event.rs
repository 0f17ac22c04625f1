// ecomarket-messaging-core/src/event.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MessagingError;

/// Tag stamped on every envelope produced by this service.
pub const EVENT_TYPE_USER_CREATED: &str = "UsuarioCreado";

/// Domain payload for a freshly registered user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserCreated {
    pub user_id: String,
    pub nombre: String,
    pub email: String,
}

/// Wire envelope: enrichment fields plus the domain payload flattened to the
/// top level, so downstream consumers see `user_id`/`nombre`/`email` directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    bound(
        serialize = "TEvent: Serialize",
        deserialize = "TEvent: serde::de::Deserialize<'de>"
    )
)]
pub struct EventEnvelope<TEvent>
where
    TEvent: Send + Sync + 'static,
{
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at_utc: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TEvent,
}

impl<TEvent> EventEnvelope<TEvent>
where
    TEvent: Send + Sync + 'static + Serialize,
{
    pub fn new(event_type: &str, event: TEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            occurred_at_utc: Utc::now(),
            event,
        }
    }
}

impl EventEnvelope<UserCreated> {
    pub fn user_created(event: UserCreated) -> Self {
        Self::new(EVENT_TYPE_USER_CREATED, event)
    }
}

/// Out-of-band metadata a consumer may or may not find on an incoming body.
/// Legacy producers omit `event_type` entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMeta {
    pub event_type: Option<String>,
    pub event_id: Option<Uuid>,
}

impl EventMeta {
    pub fn is_user_created(&self) -> bool {
        self.event_type.as_deref() == Some(EVENT_TYPE_USER_CREATED)
    }
}

/// Incoming payload, classified once at parse time by which discriminating
/// fields are present. Handlers match on the variant instead of probing keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEvent {
    HasEmail {
        email: String,
        user_id: Option<String>,
        nombre: Option<String>,
        meta: EventMeta,
    },
    HasUserId {
        user_id: String,
        nombre: Option<String>,
        meta: EventMeta,
    },
    Unrecognized {
        meta: EventMeta,
    },
}

#[derive(Debug, Deserialize)]
struct RawUserEvent {
    event_type: Option<String>,
    event_id: Option<Uuid>,
    #[serde(alias = "id")]
    user_id: Option<String>,
    #[serde(alias = "name")]
    nombre: Option<String>,
    email: Option<String>,
}

impl UserEvent {
    /// Decodes a message body. Anything that is not a JSON object with
    /// correctly typed fields is a parse failure, not an `Unrecognized`.
    pub fn parse(body: &[u8]) -> Result<Self, MessagingError> {
        let raw: RawUserEvent = serde_json::from_slice(body)
            .map_err(|e| MessagingError::Serialization(e.to_string()))?;

        let meta = EventMeta {
            event_type: raw.event_type,
            event_id: raw.event_id,
        };

        Ok(match (raw.email, raw.user_id) {
            (Some(email), user_id) => Self::HasEmail {
                email,
                user_id,
                nombre: raw.nombre,
                meta,
            },
            (None, Some(user_id)) => Self::HasUserId {
                user_id,
                nombre: raw.nombre,
                meta,
            },
            (None, None) => Self::Unrecognized { meta },
        })
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::HasEmail { meta, .. }
            | Self::HasUserId { meta, .. }
            | Self::Unrecognized { meta } => meta,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Self::HasEmail { email, .. } => Some(email),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::HasEmail { user_id, .. } => user_id.as_deref(),
            Self::HasUserId { user_id, .. } => Some(user_id),
            Self::Unrecognized { .. } => None,
        }
    }
}
