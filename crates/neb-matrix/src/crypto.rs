use async_trait::async_trait;
use neb_core::{
    domain::{RoomId, UserId},
    errors::Error,
    events::{EncryptedEvent, RoomMessage},
    ports::{GroupCrypto, OutboundSession},
    Result,
};
use tracing::warn;

/// Crypto manager for identities without an olm machine.
///
/// Every operation that would need key material fails, so encrypted rooms
/// refuse to send instead of leaking plaintext.
#[derive(Debug, Default)]
pub struct NoGroupCrypto;

fn unavailable(what: &str) -> Error {
    Error::Crypto(format!("{what}: end-to-end encryption is not available"))
}

#[async_trait]
impl GroupCrypto for NoGroupCrypto {
    async fn outbound_session(&self, _room: &RoomId) -> Result<Option<OutboundSession>> {
        Ok(None)
    }

    async fn share_session(&self, room: &RoomId, _members: &[UserId]) -> Result<()> {
        Err(unavailable(&format!("share session in {room}")))
    }

    async fn encrypt(
        &self,
        room: &RoomId,
        _event_type: &str,
        _content: serde_json::Value,
    ) -> Result<serde_json::Value> {
        Err(unavailable(&format!("encrypt for {room}")))
    }

    async fn decrypt(&self, event: &EncryptedEvent) -> Result<RoomMessage> {
        Err(unavailable(&format!("decrypt in {}", event.room_id)))
    }

    async fn accept_verification(&self, sender: &UserId, transaction_id: &str) -> Result<()> {
        warn!(sender = %sender, transaction_id, "cannot verify without encryption support");
        Err(unavailable("accept verification"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fails_closed() {
        let c = NoGroupCrypto;
        let room = RoomId::from("!r:x");
        assert!(c.outbound_session(&room).await.unwrap().is_none());
        assert!(matches!(
            c.share_session(&room, &[]).await,
            Err(Error::Crypto(_))
        ));
        assert!(matches!(
            c.encrypt(&room, "m.room.message", serde_json::json!({})).await,
            Err(Error::Crypto(_))
        ));
    }
}
