use std::{
    collections::BTreeSet,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::{
    domain::{ClientConfig, EventId, RoomId, UserId},
    events::{EncryptedEvent, RoomMessage, SyncEvent},
    Result,
};

/// Receiver for events produced by [`ProtocolClient::sync`].
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, event: SyncEvent);
}

/// Port for one live connection to the chat network.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    fn user_id(&self) -> &UserId;

    /// Long-poll the homeserver and push every event into `sink`.
    ///
    /// Returns `Ok(())` on a clean end of stream (including after
    /// [`ProtocolClient::stop_sync`]) and `Err` on a transient failure.
    async fn sync(&self, sink: Arc<dyn EventSink>) -> Result<()>;

    /// Ask a running `sync` to return. Idempotent.
    fn stop_sync(&self);

    async fn send_event(
        &self,
        room: &RoomId,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<EventId>;

    async fn joined_members(&self, room: &RoomId) -> Result<Vec<UserId>>;

    async fn is_encrypted(&self, room: &RoomId) -> Result<bool>;

    async fn join_room(&self, room: &RoomId) -> Result<()>;

    async fn set_display_name(&self, name: &str) -> Result<()>;
}

/// Rotation limits of an outbound group session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_age: Duration,
    pub max_messages: u64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_messages: 100,
        }
    }
}

/// Snapshot of the current outbound group session of a room.
#[derive(Clone, Debug)]
pub struct OutboundSession {
    pub session_id: String,
    pub created_at: Instant,
    pub message_count: u64,
    /// Members the session keys were shared with. Empty until the first share.
    pub shared_with: BTreeSet<UserId>,
    pub rotation: RotationPolicy,
}

impl OutboundSession {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.rotation.max_age
            || self.message_count >= self.rotation.max_messages
    }

    pub fn is_shared(&self) -> bool {
        !self.shared_with.is_empty()
    }

    pub fn is_shared_with(&self, members: &BTreeSet<UserId>) -> bool {
        self.is_shared() && &self.shared_with == members
    }
}

/// Port for the end-to-end group encryption machinery of one identity.
#[async_trait]
pub trait GroupCrypto: Send + Sync {
    async fn outbound_session(&self, room: &RoomId) -> Result<Option<OutboundSession>>;

    /// Establish a fresh outbound session for `room` and share it with `members`.
    async fn share_session(&self, room: &RoomId, members: &[UserId]) -> Result<()>;

    /// Encrypt `content` with the room's current outbound session.
    async fn encrypt(
        &self,
        room: &RoomId,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<serde_json::Value>;

    async fn decrypt(&self, event: &EncryptedEvent) -> Result<RoomMessage>;

    async fn accept_verification(&self, sender: &UserId, transaction_id: &str) -> Result<()>;
}

/// The collaborators a [`ClientFactory`] hands back for one identity.
#[derive(Clone)]
pub struct ClientParts {
    pub client: Arc<dyn ProtocolClient>,
    pub crypto: Arc<dyn GroupCrypto>,
}

/// Builds protocol clients from stored configuration.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(&self, config: &ClientConfig) -> Result<ClientParts>;
}
