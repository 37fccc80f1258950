use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Fully-qualified user id of a bot identity or a room member (`@bot:example.org`).
    UserId
);
string_id!(
    /// Room id (`!abc:example.org`).
    RoomId
);
string_id!(
    /// Event id returned by the homeserver for a sent event.
    EventId
);
string_id!(
    /// Opaque service identifier, unique across the whole host.
    ServiceId
);

/// Connection settings for one bot identity.
///
/// Compared by full equality to detect no-op updates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub user_id: UserId,
    pub homeserver_url: String,
    pub access_token: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub sync: bool,
    #[serde(default)]
    pub auto_join_rooms: bool,
    /// Pushed to the homeserver whenever it changes.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Regex patterns matched against the user id of a verification requester.
    #[serde(default)]
    pub accept_verification_from_users: Vec<String>,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.user_id.as_str().trim().is_empty() {
            return Err(Error::Validation("user_id is required".to_string()));
        }
        if self.homeserver_url.trim().is_empty() {
            return Err(Error::Validation("homeserver_url is required".to_string()));
        }
        if self.access_token.trim().is_empty() {
            return Err(Error::Validation("access_token is required".to_string()));
        }
        self.verification_patterns()?;
        Ok(())
    }

    /// Compile `accept_verification_from_users` into anchored regexes.
    pub fn verification_patterns(&self) -> Result<Vec<Regex>> {
        self.accept_verification_from_users
            .iter()
            .map(|p| {
                Regex::new(&format!("^(?:{p})$")).map_err(|e| {
                    Error::Validation(format!("invalid verification pattern {p:?}: {e}"))
                })
            })
            .collect()
    }
}

/// Persisted description of one configured service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: ServiceId,
    pub service_type: String,
    /// The bot identity this service speaks through.
    pub user_id: UserId,
    /// Rooms the service is bound to. Empty means every room the identity is in.
    #[serde(default)]
    pub rooms: Vec<RoomId>,
    /// Variant-specific settings, interpreted only by the service itself.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ServiceRecord {
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(Error::Validation("service id is required".to_string()));
        }
        if self.service_type.trim().is_empty() {
            return Err(Error::Validation("service type is required".to_string()));
        }
        if self.user_id.as_str().trim().is_empty() {
            return Err(Error::Validation("service user_id is required".to_string()));
        }
        Ok(())
    }

    pub fn is_bound_to(&self, room: &RoomId) -> bool {
        self.rooms.is_empty() || self.rooms.iter().any(|r| r == room)
    }
}

pub const MSGTYPE_TEXT: &str = "m.text";
pub const MSGTYPE_NOTICE: &str = "m.notice";

pub const EVENT_ROOM_MESSAGE: &str = "m.room.message";
pub const EVENT_ROOM_ENCRYPTED: &str = "m.room.encrypted";

/// Outgoing `m.room.message` content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub msgtype: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
}

impl Content {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            msgtype: MSGTYPE_TEXT.to_string(),
            body: body.into(),
            format: None,
            formatted_body: None,
        }
    }

    pub fn notice(body: impl Into<String>) -> Self {
        Self {
            msgtype: MSGTYPE_NOTICE.to_string(),
            ..Self::text(body)
        }
    }

    pub fn html_notice(body: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            msgtype: MSGTYPE_NOTICE.to_string(),
            body: body.into(),
            format: Some("org.matrix.custom.html".to_string()),
            formatted_body: Some(html.into()),
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
