//! Translation of `/sync` responses into [`SyncEvent`]s.

use neb_core::{
    domain::{RoomId, UserId, EVENT_ROOM_ENCRYPTED, EVENT_ROOM_MESSAGE},
    errors::Error,
    events::{EncryptedEvent, MemberEvent, Membership, RoomMessage, SyncEvent, VerificationRequest},
    Result,
};
use serde_json::Value;

const EVENT_ROOM_MEMBER: &str = "m.room.member";
const EVENT_ROOM_ENCRYPTION: &str = "m.room.encryption";
const EVENT_VERIFICATION_REQUEST: &str = "m.key.verification.request";

#[derive(Debug)]
pub struct SyncBatch {
    pub next_batch: String,
    pub events: Vec<SyncEvent>,
}

/// Parse one `/sync` response body.
///
/// On the initial sync (`initial = true`) timeline messages are dropped so a
/// restarted bot does not answer history; state, invites and to-device
/// requests are still delivered.
pub fn parse_sync(payload: &Value, own_user: &UserId, initial: bool) -> Result<SyncBatch> {
    let next_batch = payload
        .get("next_batch")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("sync response missing next_batch".to_string()))?
        .to_string();

    let mut events = Vec::new();

    if let Some(joined) = payload.pointer("/rooms/join").and_then(Value::as_object) {
        for (room_id, room) in joined {
            let room_id = RoomId::new(room_id.as_str());
            for ev in array_at(room, "/state/events") {
                push_state_event(&mut events, &room_id, ev);
            }
            for ev in array_at(room, "/timeline/events") {
                if ev.get("state_key").is_some() {
                    push_state_event(&mut events, &room_id, ev);
                } else if !initial {
                    push_timeline_event(&mut events, &room_id, ev);
                }
            }
        }
    }

    if let Some(invited) = payload.pointer("/rooms/invite").and_then(Value::as_object) {
        for (room_id, room) in invited {
            let room_id = RoomId::new(room_id.as_str());
            for ev in array_at(room, "/invite_state/events") {
                push_state_event(&mut events, &room_id, ev);
            }
        }
    }

    if let Some(left) = payload.pointer("/rooms/leave").and_then(Value::as_object) {
        for room_id in left.keys() {
            events.push(SyncEvent::Member(MemberEvent {
                room_id: RoomId::new(room_id.as_str()),
                sender: own_user.clone(),
                user_id: own_user.clone(),
                membership: Membership::Leave,
            }));
        }
    }

    for ev in array_at(payload, "/to_device/events") {
        if str_at(ev, "/type") != Some(EVENT_VERIFICATION_REQUEST) {
            continue;
        }
        let (Some(sender), Some(txn)) = (str_at(ev, "/sender"), str_at(ev, "/content/transaction_id"))
        else {
            continue;
        };
        events.push(SyncEvent::VerificationRequest(VerificationRequest {
            sender: UserId::new(sender),
            transaction_id: txn.to_string(),
        }));
    }

    Ok(SyncBatch { next_batch, events })
}

fn push_state_event(out: &mut Vec<SyncEvent>, room_id: &RoomId, ev: &Value) {
    match str_at(ev, "/type") {
        Some(EVENT_ROOM_MEMBER) => {
            let (Some(sender), Some(user), Some(membership)) = (
                str_at(ev, "/sender"),
                str_at(ev, "/state_key"),
                str_at(ev, "/content/membership").and_then(Membership::parse),
            ) else {
                return;
            };
            out.push(SyncEvent::Member(MemberEvent {
                room_id: room_id.clone(),
                sender: UserId::new(sender),
                user_id: UserId::new(user),
                membership,
            }));
        }
        Some(EVENT_ROOM_ENCRYPTION) => out.push(SyncEvent::Encryption {
            room_id: room_id.clone(),
        }),
        _ => {}
    }
}

fn push_timeline_event(out: &mut Vec<SyncEvent>, room_id: &RoomId, ev: &Value) {
    let Some(sender) = str_at(ev, "/sender") else {
        return;
    };
    match str_at(ev, "/type") {
        Some(EVENT_ROOM_MESSAGE) => {
            let (Some(msgtype), Some(body)) = (str_at(ev, "/content/msgtype"), str_at(ev, "/content/body"))
            else {
                return;
            };
            out.push(SyncEvent::Message(RoomMessage {
                room_id: room_id.clone(),
                sender: UserId::new(sender),
                msgtype: msgtype.to_string(),
                body: body.to_string(),
            }));
        }
        Some(EVENT_ROOM_ENCRYPTED) => out.push(SyncEvent::Encrypted(EncryptedEvent {
            room_id: room_id.clone(),
            sender: UserId::new(sender),
            content: ev.get("content").cloned().unwrap_or(Value::Null),
        })),
        _ => {}
    }
}

fn array_at<'a>(v: &'a Value, pointer: &str) -> impl Iterator<Item = &'a Value> {
    v.pointer(pointer)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn str_at<'a>(v: &'a Value, pointer: &str) -> Option<&'a str> {
    v.pointer(pointer).and_then(Value::as_str)
}
