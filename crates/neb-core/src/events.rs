use crate::domain::{RoomId, UserId, MSGTYPE_NOTICE};

/// Inbound events delivered by a protocol client's sync stream.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    Message(RoomMessage),
    Member(MemberEvent),
    Encrypted(EncryptedEvent),
    /// The room switched on encryption (`m.room.encryption` state).
    Encryption { room_id: RoomId },
    VerificationRequest(VerificationRequest),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomMessage {
    pub room_id: RoomId,
    pub sender: UserId,
    pub msgtype: String,
    pub body: String,
}

impl RoomMessage {
    pub fn is_notice(&self) -> bool {
        self.msgtype == MSGTYPE_NOTICE
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
    Knock,
}

impl Membership {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "join" => Some(Membership::Join),
            "invite" => Some(Membership::Invite),
            "leave" => Some(Membership::Leave),
            "ban" => Some(Membership::Ban),
            "knock" => Some(Membership::Knock),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberEvent {
    pub room_id: RoomId,
    pub sender: UserId,
    /// The member whose state changed (the event's state key).
    pub user_id: UserId,
    pub membership: Membership,
}

/// An `m.room.encrypted` event, passed through opaquely to the crypto manager.
#[derive(Clone, Debug)]
pub struct EncryptedEvent {
    pub room_id: RoomId,
    pub sender: UserId,
    pub content: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationRequest {
    pub sender: UserId,
    pub transaction_id: String,
}
