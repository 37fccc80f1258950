//! Encrypted send path.
//!
//! Plain rooms get the payload as-is. Encrypted rooms get it through the room's
//! outbound group session, which is re-established and shared with the current
//! joined members whenever it is missing, expired or was shared with a
//! different member set. There is no plaintext fallback.

use std::{collections::BTreeSet, sync::Arc, time::Instant};

use tracing::{debug, info};

use crate::{
    domain::{EventId, RoomId, UserId, EVENT_ROOM_ENCRYPTED},
    locks::{KeyedLocks, StripedLocks},
    ports::{GroupCrypto, OutboundSession, ProtocolClient},
    rooms::RoomStateCache,
    Result,
};

// Per-identity pool for serializing encrypted sends; rooms beyond this share stripes.
const ROOM_LOCK_STRIPES: usize = 64;

/// Whether the room's outbound session must be replaced before the next send.
pub fn needs_refresh(
    session: Option<&OutboundSession>,
    members: &BTreeSet<UserId>,
    now: Instant,
) -> bool {
    match session {
        None => true,
        Some(s) => s.is_expired(now) || !s.is_shared_with(members),
    }
}

pub struct EncryptedSender {
    client: Arc<dyn ProtocolClient>,
    crypto: Arc<dyn GroupCrypto>,
    rooms: Arc<RoomStateCache>,
    // One in-flight encrypted send per room, so racing sends refresh at most once.
    room_locks: StripedLocks,
}

impl EncryptedSender {
    pub fn new(
        client: Arc<dyn ProtocolClient>,
        crypto: Arc<dyn GroupCrypto>,
        rooms: Arc<RoomStateCache>,
    ) -> Self {
        Self {
            client,
            crypto,
            rooms,
            room_locks: StripedLocks::new(ROOM_LOCK_STRIPES),
        }
    }

    pub async fn send(
        &self,
        room: &RoomId,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<EventId> {
        if !self.room_is_encrypted(room).await? {
            return self.client.send_event(room, event_type, content).await;
        }

        let _guard = self.room_locks.lock(room.as_str()).await;

        let members = self.room_members(room).await?;
        let session = self.crypto.outbound_session(room).await?;
        if needs_refresh(session.as_ref(), &members, Instant::now()) {
            info!(
                room_id = %room,
                members = members.len(),
                previous = session.as_ref().map(|s| s.session_id.as_str()),
                "sharing new outbound group session"
            );
            let members: Vec<UserId> = members.into_iter().collect();
            self.crypto.share_session(room, &members).await?;
        } else {
            debug!(room_id = %room, "reusing outbound group session");
        }

        let encrypted = self.crypto.encrypt(room, event_type, content).await?;
        self.client
            .send_event(room, EVENT_ROOM_ENCRYPTED, encrypted)
            .await
    }

    async fn room_is_encrypted(&self, room: &RoomId) -> Result<bool> {
        if let Some(v) = self.rooms.is_encrypted(room) {
            return Ok(v);
        }
        let v = self.client.is_encrypted(room).await?;
        self.rooms.set_encrypted(room, v);
        Ok(v)
    }

    async fn room_members(&self, room: &RoomId) -> Result<BTreeSet<UserId>> {
        if let Some(m) = self.rooms.members(room) {
            return Ok(m);
        }
        let fetched = self.client.joined_members(room).await?;
        self.rooms.set_members(room, fetched.iter().cloned());
        Ok(fetched.into_iter().collect())
    }
}
